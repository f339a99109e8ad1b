use crate::collaborators::Clock;
use crate::crypto::canonical::{canonical_bytes, sha256_hex, SCHEMA_VERSION, SIGNATURE_FIELD};
use crate::crypto::keys::{KeyManager, SignatureScheme};
use crate::ledger::{TamperLedger, TamperLedgerEntry};
use crate::store::{DuplicateRecord, RecordStore, CERTIFICATES};
use crate::{AttestError, AttestResult};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Status of a device certificate whose every file was wiped
pub const STATUS_VALID: &str = "VALID";
/// Status of a device certificate where some files could not be wiped
pub const STATUS_INCOMPLETE: &str = "INCOMPLETE";

/// Length of the short random device certificate id
pub const CERT_ID_LEN: usize = 8;

const MAX_ID_ATTEMPTS: usize = 16;

/// Hex chars of the signature used in certificate file names
const SIGNATURE_TAG_LEN: usize = 16;

/// Signed attestation for a single wiped file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCertificate {
    pub schema_version: u32,
    pub device_name: String,
    pub wipe_method: String,
    pub passes: u32,
    pub timestamp: String,
    /// SHA-256 of `device_name` followed by `timestamp`
    pub content_hash: String,
    /// Hex RSA-PSS signature over the canonical form of the other fields
    pub signature: String,
}

impl FileCertificate {
    pub fn canonical_bytes(&self) -> anyhow::Result<Vec<u8>> {
        canonical_bytes(self, &[SIGNATURE_FIELD])
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationData {
    pub files_hashed_before: u64,
    pub passes: u32,
    #[serde(default)]
    pub files_failed: u64,
}

/// Attestation for a whole-device (mountpoint) wipe.
///
/// Carries no embedded signature; its signature of record is the tamper
/// ledger entry registered under the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceWipeCertificate {
    pub schema_version: u32,
    pub id: String,
    pub device: String,
    pub method: String,
    pub date: String,
    pub status: String,
    pub files_wiped: u64,
    pub verification_data: VerificationData,
}

impl DeviceWipeCertificate {
    pub fn core_fields(&self) -> CoreFields {
        CoreFields {
            id: self.id.clone(),
            device: self.device.clone(),
            method: self.method.clone(),
            date: self.date.clone(),
            status: self.status.clone(),
        }
    }
}

/// Fields of a device certificate witnessed by the tamper ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreFields {
    pub id: String,
    pub device: String,
    pub method: String,
    pub date: String,
    pub status: String,
}

impl CoreFields {
    pub fn canonical_bytes(&self) -> anyhow::Result<Vec<u8>> {
        canonical_bytes(self, &[])
    }

    pub fn canonical_hash(&self) -> anyhow::Result<String> {
        Ok(sha256_hex(self.canonical_bytes()?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Certificate {
    File(FileCertificate),
    DeviceWipe(DeviceWipeCertificate),
}

/// Request for a device certificate after a mountpoint wipe
#[derive(Debug, Clone)]
pub struct DeviceWipeRequest {
    pub device: String,
    pub method: String,
    pub files_wiped: u64,
    pub verification_data: VerificationData,
}

/// A freshly issued certificate plus the non-fatal failures met while
/// persisting or registering it.
#[derive(Debug)]
pub struct Issued<T> {
    pub certificate: T,
    pub degraded: Vec<AttestError>,
}

impl<T> Issued<T> {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Issued<U> {
        Issued {
            certificate: f(self.certificate),
            degraded: self.degraded,
        }
    }
}

pub struct CertificateIssuer {
    keys: Arc<KeyManager>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn RecordStore>,
    ledger: TamperLedger,
    cert_dir: Option<PathBuf>,
}

impl CertificateIssuer {
    pub fn new(
        keys: Arc<KeyManager>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn RecordStore>,
        cert_dir: Option<PathBuf>,
    ) -> Self {
        let ledger = TamperLedger::new(Arc::clone(&keys), Arc::clone(&store));
        Self {
            keys,
            clock,
            store,
            ledger,
            cert_dir,
        }
    }

    /// Issue and sign a certificate for a wiped file.
    ///
    /// Signing failures are fatal; a failure to write the JSON copy is
    /// reported in [`Issued::degraded`].
    pub fn issue_file_certificate(
        &self,
        device_name: &str,
        method: &str,
        passes: u32,
    ) -> AttestResult<Issued<FileCertificate>> {
        let timestamp = self
            .clock
            .now()
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string();

        let mut certificate = FileCertificate {
            schema_version: SCHEMA_VERSION,
            device_name: device_name.to_string(),
            wipe_method: method.to_string(),
            passes,
            content_hash: sha256_hex(format!("{}{}", device_name, timestamp)),
            timestamp,
            signature: String::new(),
        };

        let payload = certificate
            .canonical_bytes()
            .map_err(|e| AttestError::Crypto(format!("Failed to canonicalize certificate: {}", e)))?;
        let signature = self.keys.sign(&payload, SignatureScheme::Pss)?;
        certificate.signature = hex::encode(signature);

        let mut degraded = Vec::new();
        if let Some(dir) = &self.cert_dir {
            match save_certificate_json(dir, &certificate) {
                Ok(path) => {
                    tracing::info!(path = %path.display(), device = %device_name, "File certificate saved")
                }
                Err(e) => {
                    tracing::warn!(device = %device_name, error = %e, "Could not persist file certificate");
                    degraded.push(AttestError::CollaboratorUnavailable(format!(
                        "certificate directory {}: {}",
                        dir.display(),
                        e
                    )));
                }
            }
        }

        Ok(Issued {
            certificate,
            degraded,
        })
    }

    /// Issue a device certificate, store it and register it with the ledger.
    ///
    /// An id taken in the store is redrawn. Any other store failure skips
    /// ledger registration, since a witness without its certificate reads as
    /// tampering. Both steps are then reported in [`Issued::degraded`] and
    /// finished later with [`CertificateIssuer::persist_device_certificate`].
    pub fn issue_device_certificate(
        &self,
        request: DeviceWipeRequest,
    ) -> AttestResult<Issued<DeviceWipeCertificate>> {
        let status = if request.verification_data.files_failed == 0 {
            STATUS_VALID
        } else {
            STATUS_INCOMPLETE
        };

        let mut certificate = DeviceWipeCertificate {
            schema_version: SCHEMA_VERSION,
            id: short_id(),
            device: request.device,
            method: request.method,
            date: self.clock.now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status: status.to_string(),
            files_wiped: request.files_wiped,
            verification_data: request.verification_data,
        };

        let mut degraded = Vec::new();
        match self.store_with_fresh_id(&mut certificate) {
            Ok(()) => match self.ledger.register(&certificate) {
                Ok(_) => {
                    tracing::info!(cert_id = %certificate.id, device = %certificate.device, "Device certificate issued")
                }
                Err(e) => {
                    tracing::warn!(
                        cert_id = %certificate.id,
                        error = %e,
                        "Tamper ledger registration failed; retry with ledger-register"
                    );
                    degraded.push(e);
                }
            },
            Err(e) => {
                tracing::warn!(
                    cert_id = %certificate.id,
                    error = %format!("{:#}", e),
                    "Could not persist device certificate; ledger registration skipped"
                );
                degraded.push(AttestError::CollaboratorUnavailable(format!(
                    "certificate store: {:#}",
                    e
                )));
                degraded.push(AttestError::CollaboratorUnavailable(format!(
                    "tamper ledger: certificate {} is registered once it is stored",
                    certificate.id
                )));
            }
        }

        Ok(Issued {
            certificate,
            degraded,
        })
    }

    /// Store and register a certificate whose issuance ran degraded.
    ///
    /// Steps already done are kept, so this can be repeated until it
    /// succeeds. An id that holds a different certificate is rejected.
    pub fn persist_device_certificate(
        &self,
        certificate: &DeviceWipeCertificate,
    ) -> AttestResult<TamperLedgerEntry> {
        let unavailable =
            |what: &str, e: anyhow::Error| AttestError::CollaboratorUnavailable(format!("{}: {:#}", what, e));

        let record = serde_json::to_value(certificate)
            .map_err(|e| AttestError::InvalidInput(format!("certificate not encodable: {}", e)))?;

        match self.store.insert(CERTIFICATES, &certificate.id, &record) {
            Ok(()) => tracing::info!(cert_id = %certificate.id, "Device certificate stored"),
            Err(e) if DuplicateRecord::is_conflict(&e) => {
                let existing = self
                    .store
                    .get(CERTIFICATES, &certificate.id)
                    .map_err(|e| unavailable("certificate store", e))?
                    .map(serde_json::from_value::<DeviceWipeCertificate>);
                if !matches!(existing, Some(Ok(ref stored)) if stored == certificate) {
                    return Err(AttestError::InvalidInput(format!(
                        "certificate id {} already holds a different certificate",
                        certificate.id
                    )));
                }
            }
            Err(e) => return Err(unavailable("certificate store", e)),
        }

        if let Some(entry) = self
            .ledger
            .entry(&certificate.id)
            .map_err(|e| unavailable("tamper ledger", e))?
        {
            return Ok(entry);
        }
        self.ledger.register(certificate)
    }

    fn store_with_fresh_id(&self, certificate: &mut DeviceWipeCertificate) -> anyhow::Result<()> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let record = serde_json::to_value(&*certificate)?;
            match self.store.insert(CERTIFICATES, &certificate.id, &record) {
                Err(e) if DuplicateRecord::is_conflict(&e) => {
                    tracing::debug!(cert_id = %certificate.id, "Certificate id taken, drawing another");
                    certificate.id = short_id();
                }
                other => return other,
            }
        }
        Err(anyhow::anyhow!(
            "no free certificate id after {} attempts",
            MAX_ID_ATTEMPTS
        ))
    }
}

fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(CERT_ID_LEN);
    id
}

fn save_certificate_json(dir: &Path, certificate: &FileCertificate) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let safe_name: String = certificate
        .device_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    // The signature is randomized, so two certificates for the same file in
    // the same second still get distinct names
    let path = dir.join(format!(
        "{}_{}_{}_certificate.json",
        safe_name,
        &certificate.content_hash[..12],
        &certificate.signature[..SIGNATURE_TAG_LEN]
    ));

    // Certificates are append-only; never overwrite an earlier one
    let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
    file.write_all(serde_json::to_string_pretty(certificate)?.as_bytes())?;
    file.sync_all()?;
    Ok(path)
}

/// Checks embedded certificate signatures. Fails closed: anything that
/// cannot be verified is `false`.
pub struct CertificateVerifier {
    keys: Arc<KeyManager>,
}

impl CertificateVerifier {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    pub fn verify(&self, certificate: &FileCertificate) -> bool {
        let Ok(payload) = certificate.canonical_bytes() else {
            return false;
        };
        let Ok(signature) = hex::decode(&certificate.signature) else {
            return false;
        };

        match self.keys.verify(&payload, &signature, SignatureScheme::Pss) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(error = %e, "Certificate signature could not be checked");
                false
            }
        }
    }

    pub fn verify_json_file(&self, path: &Path) -> bool {
        match FileCertificate::from_json_file(path) {
            Ok(certificate) => self.verify(&certificate),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Unreadable certificate file");
                false
            }
        }
    }
}
