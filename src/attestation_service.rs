// Attestation Service - entry point for wipe, verification and ledger operations
//
// Wires the overwrite engine, the wipe verifier, certificate issuance and the
// tamper ledger to one key manager and one record store.

use crate::algorithms::{OverwriteEngine, OVERWRITE_METHOD};
use crate::collaborators::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::crypto::certificates::{
    Certificate, CertificateIssuer, CertificateVerifier, CoreFields, DeviceWipeCertificate,
    DeviceWipeRequest, FileCertificate, Issued, VerificationData,
};
use crate::crypto::keys::KeyManager;
use crate::io::{collect_regular_files, hash_file};
use crate::ledger::{LedgerStatus, LedgerVerification, TamperLedger, TamperLedgerEntry};
use crate::store::{MemoryRecordStore, RecordStore, SqliteRecordStore, CERTIFICATES};
use crate::verification::{AggregateReport, VerificationReport, WipeVerifier};
use crate::{AttestError, AttestResult};
use std::path::Path;
use std::sync::Arc;

/// Method label for mountpoint wipes
pub fn device_wipe_method(passes: u32) -> String {
    format!("Secure Wipe ({}-pass overwrite)", passes)
}

pub struct AttestationService {
    config: EngineConfig,
    keys: Arc<KeyManager>,
    store: Arc<dyn RecordStore>,
    engine: OverwriteEngine,
    verifier: WipeVerifier,
    issuer: CertificateIssuer,
    certificate_verifier: CertificateVerifier,
    ledger: TamperLedger,
}

impl AttestationService {
    /// Build the service from configuration with durable keys.
    ///
    /// An unusable certificate database is not fatal: the service falls back
    /// to an in-memory store and says so loudly.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let keys = Arc::new(KeyManager::durable(
            config.key_dir.clone(),
            config.auto_generate_keys,
        ));

        let store: Arc<dyn RecordStore> = match &config.store_path {
            Some(path) => match SqliteRecordStore::open(path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %format!("{:#}", e),
                        "Certificate database unavailable; records will not outlive this process"
                    );
                    Arc::new(MemoryRecordStore::new())
                }
            },
            None => Arc::new(MemoryRecordStore::new()),
        };

        Ok(Self::with_components(config, keys, store, Arc::new(SystemClock)))
    }

    pub fn with_components(
        config: EngineConfig,
        keys: Arc<KeyManager>,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let issuer = CertificateIssuer::new(
            Arc::clone(&keys),
            clock,
            Arc::clone(&store),
            config.cert_dir.clone(),
        );
        let certificate_verifier = CertificateVerifier::new(Arc::clone(&keys));
        let ledger = TamperLedger::new(Arc::clone(&keys), Arc::clone(&store));

        Self {
            verifier: WipeVerifier::from_config(&config),
            engine: OverwriteEngine::new(),
            config,
            keys,
            store,
            issuer,
            certificate_verifier,
            ledger,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ensure_keys(&self) -> AttestResult<()> {
        self.keys.ensure_keys()
    }

    pub fn public_key_pem(&self) -> AttestResult<String> {
        self.keys.public_key_pem()
    }

    /// Wipe `path` and attest it.
    ///
    /// A regular file yields a [`FileCertificate`]; a directory is treated as
    /// a mountpoint and yields a [`DeviceWipeCertificate`].
    pub fn wipe(&self, path: &Path, passes: u32) -> AttestResult<Issued<Certificate>> {
        if path.is_dir() {
            Ok(self.wipe_mountpoint(path, passes)?.map(Certificate::DeviceWipe))
        } else {
            Ok(self.wipe_file(path, passes)?.map(Certificate::File))
        }
    }

    pub fn wipe_file(&self, path: &Path, passes: u32) -> AttestResult<Issued<FileCertificate>> {
        self.engine.wipe(path, passes)?;
        self.issuer
            .issue_file_certificate(&path.display().to_string(), OVERWRITE_METHOD, passes)
    }

    /// Wipe every file under `mountpoint` and issue one device certificate.
    ///
    /// Files that cannot be wiped are counted and mark the certificate
    /// `INCOMPLETE`; an interrupt aborts the whole run without a certificate.
    pub fn wipe_mountpoint(
        &self,
        mountpoint: &Path,
        passes: u32,
    ) -> AttestResult<Issued<DeviceWipeCertificate>> {
        if passes == 0 {
            return Err(AttestError::InvalidInput(
                "at least one overwrite pass is required".to_string(),
            ));
        }
        if !mountpoint.is_dir() {
            return Err(AttestError::NotFound(format!(
                "mountpoint {}",
                mountpoint.display()
            )));
        }

        let files = collect_regular_files(mountpoint)
            .map_err(|e| AttestError::IoFailure(std::io::Error::other(format!("{:#}", e))))?;

        let files_hashed_before = files
            .iter()
            .filter(|file| match hash_file(file) {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!(path = %file.display(), error = %e, "Could not hash before wipe");
                    false
                }
            })
            .count() as u64;

        tracing::info!(
            mountpoint = %mountpoint.display(),
            files = files.len(),
            passes,
            "Starting mountpoint wipe"
        );

        let mut files_wiped = 0u64;
        let mut files_failed = 0u64;
        for file in &files {
            match self.engine.wipe(file, passes) {
                Ok(()) => files_wiped += 1,
                Err(AttestError::Interrupted) => {
                    tracing::error!(
                        mountpoint = %mountpoint.display(),
                        files_wiped,
                        remaining = files.len() as u64 - files_wiped - files_failed,
                        "Mountpoint wipe interrupted; no certificate issued"
                    );
                    return Err(AttestError::Interrupted);
                }
                Err(e) => {
                    tracing::error!(path = %file.display(), error = %e, "Failed to wipe file");
                    files_failed += 1;
                }
            }
        }

        self.issuer.issue_device_certificate(DeviceWipeRequest {
            device: mountpoint.display().to_string(),
            method: device_wipe_method(passes),
            files_wiped,
            verification_data: VerificationData {
                files_hashed_before,
                passes,
                files_failed,
            },
        })
    }

    pub fn verify_wipe(&self, path: &Path, original_hash: Option<&str>) -> VerificationReport {
        self.verifier.verify_wipe_completeness(path, original_hash)
    }

    pub fn verify_directory(&self, path: &Path) -> AggregateReport {
        self.verifier.verify_directory(path)
    }

    /// Whether the certificate's signature of record verifies.
    ///
    /// File certificates carry an embedded signature; device certificates are
    /// vouched for by their tamper ledger entry.
    pub fn verify_certificate_signature(&self, certificate: &Certificate) -> bool {
        match certificate {
            Certificate::File(cert) => self.certificate_verifier.verify(cert),
            Certificate::DeviceWipe(cert) => self
                .ledger
                .verify(&cert.id, &cert.core_fields())
                .is_verified(),
        }
    }

    pub fn verify_certificate_file(&self, path: &Path) -> bool {
        self.certificate_verifier.verify_json_file(path)
    }

    pub fn register_ledger_entry(
        &self,
        certificate: &DeviceWipeCertificate,
    ) -> AttestResult<TamperLedgerEntry> {
        self.ledger.register(certificate)
    }

    /// Register a stored certificate whose ledger registration failed earlier.
    pub fn register_stored_certificate(&self, cert_id: &str) -> AttestResult<TamperLedgerEntry> {
        let certificate = self
            .get_certificate(cert_id)?
            .ok_or_else(|| AttestError::NotFound(format!("certificate {}", cert_id)))?;
        self.ledger.register(&certificate)
    }

    /// Finish a degraded issuance: store the certificate if it is not yet
    /// stored, then register it.
    pub fn persist_certificate(
        &self,
        certificate: &DeviceWipeCertificate,
    ) -> AttestResult<TamperLedgerEntry> {
        self.issuer.persist_device_certificate(certificate)
    }

    pub fn verify_ledger(&self, cert_id: &str, fields: &CoreFields) -> LedgerVerification {
        self.ledger.verify(cert_id, fields)
    }

    /// Check the certificate as it sits in the store now against the ledger.
    pub fn verify_stored_certificate(&self, cert_id: &str) -> LedgerVerification {
        let outcome = |status: LedgerStatus, expected_hash: Option<String>, message: String| {
            LedgerVerification {
                status,
                cert_id: cert_id.to_string(),
                expected_hash,
                current_hash: None,
                message: Some(message),
            }
        };

        let fields = match self.store.get(CERTIFICATES, cert_id) {
            Ok(Some(record)) => serde_json::from_value::<CoreFields>(record)
                .map_err(|e| format!("stored certificate unreadable: {}", e)),
            Ok(None) => Err("certificate missing from store".to_string()),
            Err(e) => {
                return outcome(
                    LedgerStatus::Error,
                    None,
                    format!("certificate store unreachable: {}", e),
                )
            }
        };

        match fields {
            Ok(fields) => self.ledger.verify(cert_id, &fields),
            // A witnessed certificate that vanished or lost its core fields
            // was altered outside the engine
            Err(reason) => match self.ledger.entry(cert_id) {
                Ok(Some(entry)) => outcome(LedgerStatus::Tampered, Some(entry.hash), reason),
                Ok(None) => outcome(LedgerStatus::NotRegistered, None, reason),
                Err(e) => outcome(LedgerStatus::Error, None, format!("tamper ledger: {}", e)),
            },
        }
    }

    /// All stored device certificates, ordered by id.
    pub fn list_certificates(&self) -> AttestResult<Vec<DeviceWipeCertificate>> {
        let records = self
            .store
            .list(CERTIFICATES)
            .map_err(|e| AttestError::CollaboratorUnavailable(format!("certificate store: {}", e)))?;

        Ok(records
            .into_iter()
            .filter_map(|(id, record)| match serde_json::from_value(record) {
                Ok(cert) => Some(cert),
                Err(e) => {
                    tracing::warn!(cert_id = %id, error = %e, "Skipping unreadable certificate");
                    None
                }
            })
            .collect())
    }

    pub fn get_certificate(&self, cert_id: &str) -> AttestResult<Option<DeviceWipeCertificate>> {
        let record = self
            .store
            .get(CERTIFICATES, cert_id)
            .map_err(|e| AttestError::CollaboratorUnavailable(format!("certificate store: {}", e)))?;

        record
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| AttestError::InvalidInput(format!("certificate {} is unreadable: {}", cert_id, e)))
    }
}
