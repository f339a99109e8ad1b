use crate::io::read_head;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// Leading bytes examined for low byte-value cardinality
const CARDINALITY_WINDOW: usize = 100;

/// Fewer distinct values than this in the window marks a repeating pattern
const MIN_DISTINCT_BYTES: usize = 10;

/// Bytes of the sample echoed back as hex
const SAMPLE_HEX_BYTES: usize = 64;

/// Degenerate content patterns that disqualify a sample as wiped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternFlags {
    pub all_zeros: bool,
    pub all_ones: bool,
    pub low_cardinality: bool,
    pub looks_text: bool,
}

impl PatternFlags {
    pub fn any(&self) -> bool {
        self.all_zeros || self.all_ones || self.low_cardinality || self.looks_text
    }

    /// Finding for the most specific flag that is set.
    pub fn finding(&self) -> Option<&'static str> {
        if self.all_zeros {
            Some("File contains all zeros - not properly wiped")
        } else if self.all_ones {
            Some("File contains all ones - not properly wiped")
        } else if self.low_cardinality {
            Some("Repeating patterns detected - may be recoverable")
        } else if self.looks_text {
            Some("Readable text content detected - may be recoverable")
        } else {
            None
        }
    }
}

/// Content analysis of the head of a file.
///
/// Derived on demand; never stored as evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyReport {
    /// Shannon entropy of the sample in bits per byte, 0.0 to 8.0
    pub entropy: f64,
    pub patterns: PatternFlags,
    pub sample_size: usize,
    pub sample_hex: String,
}

pub struct EntropyAnalyzer;

impl EntropyAnalyzer {
    /// Analyze up to `sample_bytes` from the start of the file.
    pub fn analyze(path: &Path, sample_bytes: usize) -> io::Result<EntropyReport> {
        let sample = read_head(path, sample_bytes)?;
        Ok(Self::analyze_bytes(&sample))
    }

    pub fn analyze_bytes(sample: &[u8]) -> EntropyReport {
        EntropyReport {
            entropy: Self::calculate_entropy(sample),
            patterns: Self::detect_patterns(sample),
            sample_size: sample.len(),
            sample_hex: hex::encode(&sample[..sample.len().min(SAMPLE_HEX_BYTES)]),
        }
    }

    /// Shannon entropy over the byte-value histogram, in bits per byte.
    pub fn calculate_entropy(data: &[u8]) -> f64 {
        if data.is_empty() {
            return 0.0;
        }

        let mut frequency = [0u64; 256];
        for &byte in data {
            frequency[byte as usize] += 1;
        }

        let len = data.len() as f64;
        let mut entropy = 0.0;

        for &count in &frequency {
            if count > 0 {
                let probability = count as f64 / len;
                entropy -= probability * probability.log2();
            }
        }

        entropy
    }

    pub fn detect_patterns(sample: &[u8]) -> PatternFlags {
        // An empty sample carries no pattern at all
        if sample.is_empty() {
            return PatternFlags::default();
        }

        let low_cardinality = sample.len() >= CARDINALITY_WINDOW && {
            let mut seen = [false; 256];
            for &byte in &sample[..CARDINALITY_WINDOW] {
                seen[byte as usize] = true;
            }
            seen.iter().filter(|&&s| s).count() < MIN_DISTINCT_BYTES
        };

        PatternFlags {
            all_zeros: sample.iter().all(|&b| b == 0x00),
            all_ones: sample.iter().all(|&b| b == 0xFF),
            low_cardinality,
            looks_text: looks_text(sample),
        }
    }
}

/// Whether the sample, decoded as UTF-8 with invalid sequences dropped,
/// is non-empty printable text.
fn looks_text(sample: &[u8]) -> bool {
    let decoded = String::from_utf8_lossy(sample);
    let mut chars = decoded
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .peekable();

    if chars.peek().is_none() {
        return false;
    }

    chars.all(|c| matches!(c, ' ' | '\n' | '\r' | '\t') || !(c.is_control() || c.is_whitespace()))
}
