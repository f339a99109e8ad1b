//! Tamper ledger: an independently signed witness of every device certificate.
//!
//! Each entry stores the core fields of a certificate as registered, their
//! canonical SHA-256 and a deterministic RSA signature over the same
//! canonical bytes. Verification separates a corrupt or forged ledger entry
//! (`invalid_signature`) from a certificate that drifted since registration
//! (`tampered`).

use crate::crypto::canonical::{sha256_hex, SCHEMA_VERSION};
use crate::crypto::certificates::{CoreFields, DeviceWipeCertificate};
use crate::crypto::keys::{KeyManager, SignatureScheme};
use crate::store::{RecordStore, TAMPER_LEDGER};
use crate::{AttestError, AttestResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TamperLedgerEntry {
    pub schema_version: u32,
    pub cert_id: String,
    /// Canonical SHA-256 of the core fields at registration time
    pub hash: String,
    /// Hex RSA PKCS#1 v1.5 signature over the canonical core fields
    pub signature: String,
    pub device: String,
    pub method: String,
    pub date: String,
    pub status: String,
}

impl TamperLedgerEntry {
    /// Core fields as the ledger witnessed them.
    pub fn core_fields(&self) -> CoreFields {
        CoreFields {
            id: self.cert_id.clone(),
            device: self.device.clone(),
            method: self.method.clone(),
            date: self.date.clone(),
            status: self.status.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Verified,
    Tampered,
    InvalidSignature,
    NotRegistered,
    /// The ledger could not be consulted at all
    Error,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Verified => "verified",
            LedgerStatus::Tampered => "tampered",
            LedgerStatus::InvalidSignature => "invalid_signature",
            LedgerStatus::NotRegistered => "not_registered",
            LedgerStatus::Error => "error",
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerVerification {
    pub status: LedgerStatus,
    pub cert_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LedgerVerification {
    fn new(status: LedgerStatus, cert_id: &str) -> Self {
        Self {
            status,
            cert_id: cert_id.to_string(),
            expected_hash: None,
            current_hash: None,
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_verified(&self) -> bool {
        self.status == LedgerStatus::Verified
    }
}

pub struct TamperLedger {
    keys: Arc<KeyManager>,
    store: Arc<dyn RecordStore>,
}

impl TamperLedger {
    pub fn new(keys: Arc<KeyManager>, store: Arc<dyn RecordStore>) -> Self {
        Self { keys, store }
    }

    /// Register `certificate` under its id.
    ///
    /// An id can be registered once; a second registration is rejected
    /// rather than replacing the witness.
    pub fn register(&self, certificate: &DeviceWipeCertificate) -> AttestResult<TamperLedgerEntry> {
        let core = certificate.core_fields();
        let payload = core
            .canonical_bytes()
            .map_err(|e| AttestError::Crypto(format!("Failed to canonicalize core fields: {}", e)))?;

        let existing = self
            .store
            .get(TAMPER_LEDGER, &core.id)
            .map_err(|e| AttestError::CollaboratorUnavailable(format!("tamper ledger: {}", e)))?;
        if existing.is_some() {
            return Err(AttestError::InvalidInput(format!(
                "certificate {} is already registered",
                core.id
            )));
        }

        let signature = self.keys.sign(&payload, SignatureScheme::Pkcs1v15)?;

        let entry = TamperLedgerEntry {
            schema_version: SCHEMA_VERSION,
            hash: sha256_hex(&payload),
            signature: hex::encode(signature),
            cert_id: core.id,
            device: core.device,
            method: core.method,
            date: core.date,
            status: core.status,
        };

        let record = serde_json::to_value(&entry)
            .map_err(|e| AttestError::Crypto(format!("Failed to encode ledger entry: {}", e)))?;
        self.store
            .insert(TAMPER_LEDGER, &entry.cert_id, &record)
            .map_err(|e| AttestError::CollaboratorUnavailable(format!("tamper ledger: {}", e)))?;

        tracing::info!(cert_id = %entry.cert_id, hash = %entry.hash, "Registered tamper ledger entry");
        Ok(entry)
    }

    pub fn entry(&self, cert_id: &str) -> anyhow::Result<Option<TamperLedgerEntry>> {
        self.store
            .get(TAMPER_LEDGER, cert_id)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    /// Check `current` (the certificate as stored now) against the ledger.
    ///
    /// Never fails; every outcome is a [`LedgerStatus`].
    pub fn verify(&self, cert_id: &str, current: &CoreFields) -> LedgerVerification {
        let record = match self.store.get(TAMPER_LEDGER, cert_id) {
            Ok(Some(record)) => record,
            Ok(None) => return LedgerVerification::new(LedgerStatus::NotRegistered, cert_id),
            Err(e) => {
                tracing::warn!(cert_id, error = %e, "Tamper ledger unreachable");
                return LedgerVerification::new(LedgerStatus::Error, cert_id)
                    .with_message(format!("tamper ledger unreachable: {}", e));
            }
        };

        let current_hash = match current.canonical_hash() {
            Ok(hash) => hash,
            Err(e) => {
                return LedgerVerification::new(LedgerStatus::Error, cert_id)
                    .with_message(format!("cannot hash certificate: {}", e))
            }
        };

        let mut result = LedgerVerification::new(LedgerStatus::Verified, cert_id);
        result.current_hash = Some(current_hash.clone());

        let entry: TamperLedgerEntry = match serde_json::from_value(record) {
            Ok(entry) => entry,
            Err(e) => {
                result.status = LedgerStatus::InvalidSignature;
                return result.with_message(format!("malformed ledger entry: {}", e));
            }
        };
        result.expected_hash = Some(entry.hash.clone());

        match self.entry_is_authentic(cert_id, &entry) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(cert_id, "Tamper ledger entry failed signature check");
                result.status = LedgerStatus::InvalidSignature;
                return result.with_message("ledger entry signature does not verify");
            }
            Err(e) => {
                result.status = LedgerStatus::Error;
                return result.with_message(e.to_string());
            }
        }

        if entry.hash != current_hash {
            tracing::warn!(cert_id, expected = %entry.hash, current = %current_hash, "Certificate changed since registration");
            result.status = LedgerStatus::Tampered;
            return result.with_message("certificate differs from its registered record");
        }

        result
    }

    // Signature over the entry's own fields, plus consistency of the stored
    // hash and id with those fields.
    fn entry_is_authentic(&self, cert_id: &str, entry: &TamperLedgerEntry) -> AttestResult<bool> {
        if entry.cert_id != cert_id {
            return Ok(false);
        }

        let payload = entry
            .core_fields()
            .canonical_bytes()
            .map_err(|e| AttestError::Crypto(e.to_string()))?;

        if sha256_hex(&payload) != entry.hash {
            return Ok(false);
        }

        let Ok(signature) = hex::decode(&entry.signature) else {
            return Ok(false);
        };

        self.keys
            .verify(&payload, &signature, SignatureScheme::Pkcs1v15)
    }
}
