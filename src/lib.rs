pub mod algorithms;
pub mod attestation_service;
pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod io;
pub mod ledger;
pub mod store;
pub mod verification;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the service facade for convenience
pub use attestation_service::AttestationService;
pub use config::EngineConfig;

use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// Global flag for handling Ctrl+C interrupts
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Set the interrupt flag (called by signal handler)
pub fn set_interrupted() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Check if an interrupt has been received
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Reset the interrupt flag (primarily for testing)
pub fn reset_interrupted() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Error kinds surfaced by the destructive and issuance paths.
///
/// Verification paths never return these; they report findings through
/// status fields instead.
#[derive(Error, Debug)]
pub enum AttestError {
    #[error("Wipe target not found: {0}")]
    NotFound(String),

    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("Key material missing: {0}")]
    KeyMaterialMissing(String),

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation interrupted by user")]
    Interrupted,
}

impl AttestError {
    /// Whether the failed operation can simply be attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttestError::CollaboratorUnavailable(_))
    }
}

pub type AttestResult<T> = Result<T, AttestError>;

#[cfg(test)]
mod lib_tests;
