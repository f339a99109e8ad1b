use crate::config::{EngineConfig, DEFAULT_ENTROPY_THRESHOLD, DEFAULT_SAMPLE_BYTES};
use crate::io::{collect_regular_files, hash_file};
use crate::verification::entropy::{EntropyAnalyzer, EntropyReport};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WipeStatus {
    Verified,
    Warning,
    Error,
    /// Path absent; counts as erased
    FileNotFound,
}

/// Outcome of checking one path for residual data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub status: WipeStatus,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entropy: Option<f64>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_changed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<EntropyReport>,
}

impl VerificationReport {
    fn bare(status: WipeStatus, verified: bool, message: impl Into<String>) -> Self {
        Self {
            status,
            verified,
            message: Some(message.into()),
            file_size: None,
            entropy: None,
            issues: Vec::new(),
            current_hash: None,
            original_hash: None,
            hash_changed: None,
            analysis: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::bare(WipeStatus::Error, false, message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVerification {
    pub file: PathBuf,
    pub verification: VerificationReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub total_files: usize,
    pub verified: usize,
    pub warnings: usize,
    pub errors: usize,
    pub all_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub details: Vec<FileVerification>,
}

impl AggregateReport {
    fn failed(message: String) -> Self {
        Self {
            total_files: 0,
            verified: 0,
            warnings: 0,
            errors: 0,
            all_verified: false,
            error: Some(message),
            details: Vec::new(),
        }
    }

    fn from_details(details: Vec<FileVerification>) -> Self {
        let mut report = Self {
            total_files: details.len(),
            verified: 0,
            warnings: 0,
            errors: 0,
            all_verified: false,
            error: None,
            details: Vec::new(),
        };

        for detail in &details {
            if detail.verification.verified {
                report.verified += 1;
            } else if detail.verification.status == WipeStatus::Warning {
                report.warnings += 1;
            } else {
                report.errors += 1;
            }
        }

        report.all_verified = report.warnings == 0 && report.errors == 0;
        report.details = details;
        report
    }
}

/// Post-hoc check that files no longer hold recoverable content.
///
/// All checks are read-only and never fail; problems are reported through
/// [`WipeStatus::Error`] and the issue list.
#[derive(Debug, Clone)]
pub struct WipeVerifier {
    sample_bytes: usize,
    entropy_threshold: f64,
    workers: usize,
}

impl Default for WipeVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_BYTES, DEFAULT_ENTROPY_THRESHOLD)
    }
}

impl WipeVerifier {
    pub fn new(sample_bytes: usize, entropy_threshold: f64) -> Self {
        Self {
            sample_bytes,
            entropy_threshold,
            workers: num_cpus::get(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.sample_bytes, config.entropy_threshold).with_workers(config.verify_workers)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn verify_wipe_completeness(&self, path: &Path, original_hash: Option<&str>) -> VerificationReport {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return VerificationReport::bare(
                    WipeStatus::FileNotFound,
                    true,
                    "File does not exist (may have been deleted)",
                );
            }
            Err(e) => return VerificationReport::error(e.to_string()),
        };
        // Reading a FIFO or device node could block or never end
        if !metadata.is_file() {
            return VerificationReport::error(format!("{} is not a regular file", path.display()));
        }

        let analysis = match EntropyAnalyzer::analyze(path, self.sample_bytes) {
            Ok(analysis) => analysis,
            Err(e) => return VerificationReport::error(e.to_string()),
        };
        let current_hash = match hash_file(path) {
            Ok(hash) => hash,
            Err(e) => return VerificationReport::error(e.to_string()),
        };

        let mut issues = Vec::new();
        let mut is_wiped = analysis.entropy > self.entropy_threshold;
        if !is_wiped {
            issues.push(format!(
                "Low entropy ({:.2}) - may contain recoverable data",
                analysis.entropy
            ));
        }
        if let Some(finding) = analysis.patterns.finding() {
            issues.push(finding.to_string());
            is_wiped = false;
        }

        let verified = is_wiped && issues.is_empty();
        let mut report = VerificationReport {
            status: if verified { WipeStatus::Verified } else { WipeStatus::Warning },
            verified,
            message: None,
            file_size: Some(metadata.len()),
            entropy: Some(analysis.entropy),
            issues,
            current_hash: Some(current_hash.clone()),
            original_hash: None,
            hash_changed: None,
            analysis: Some(analysis),
        };

        if let Some(original) = original_hash {
            let changed = !current_hash.eq_ignore_ascii_case(original);
            report.original_hash = Some(original.to_string());
            report.hash_changed = Some(changed);
            if !changed {
                report.verified = false;
                report.status = WipeStatus::Warning;
                report
                    .issues
                    .push("File hash unchanged - data may not have been wiped".to_string());
            }
        }

        tracing::debug!(
            path = %path.display(),
            status = ?report.status,
            entropy = report.entropy.unwrap_or_default(),
            "Wipe completeness checked"
        );
        report
    }

    /// Check every regular file under `root`, fanning out over worker threads.
    pub fn verify_directory(&self, root: &Path) -> AggregateReport {
        if !root.is_dir() {
            return AggregateReport::failed(format!("{} is not a directory", root.display()));
        }

        let files = match collect_regular_files(root) {
            Ok(files) => files,
            Err(e) => return AggregateReport::failed(format!("{:#}", e)),
        };

        let per_worker = files.len().div_ceil(self.workers).max(1);
        let details: Vec<FileVerification> = thread::scope(|s| {
            let handles: Vec<_> = files
                .chunks(per_worker)
                .map(|chunk| {
                    s.spawn(move || {
                        chunk
                            .iter()
                            .map(|file| FileVerification {
                                file: file.clone(),
                                verification: self.verify_wipe_completeness(file, None),
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .zip(files.chunks(per_worker))
                .flat_map(|(handle, chunk)| {
                    handle.join().unwrap_or_else(|_| {
                        chunk
                            .iter()
                            .map(|file| FileVerification {
                                file: file.clone(),
                                verification: VerificationReport::error("verification worker panicked"),
                            })
                            .collect()
                    })
                })
                .collect()
        });

        let report = AggregateReport::from_details(details);
        tracing::info!(
            root = %root.display(),
            total = report.total_files,
            verified = report.verified,
            warnings = report.warnings,
            errors = report.errors,
            "Directory verification complete"
        );
        report
    }
}
