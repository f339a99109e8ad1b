// Tests for lib.rs core types
//
// Tests cover: interrupt handling and the error kinds surfaced to callers.

use super::*;
use serial_test::serial;

// ==================== INTERRUPT HANDLING TESTS ====================

#[test]
#[serial]
fn test_interrupt_initially_not_set() {
    reset_interrupted();
    assert!(
        !is_interrupted(),
        "Interrupt flag should initially be not set"
    );
}

#[test]
#[serial]
fn test_set_interrupt_flag() {
    reset_interrupted();
    set_interrupted();
    assert!(is_interrupted(), "Interrupt flag should be set");
    reset_interrupted();
    assert!(!is_interrupted());
}

// ==================== ATTEST ERROR TESTS ====================

#[test]
fn test_io_error_converts() {
    let err: AttestError = std::io::Error::other("disk gone").into();
    assert!(matches!(err, AttestError::IoFailure(_)));
    assert!(err.to_string().contains("I/O failure"));
    assert!(err.to_string().contains("disk gone"));
}

#[test]
fn test_error_messages() {
    assert_eq!(
        AttestError::NotFound("/tmp/x".into()).to_string(),
        "Wipe target not found: /tmp/x"
    );
    assert_eq!(
        AttestError::Interrupted.to_string(),
        "Operation interrupted by user"
    );
    assert!(AttestError::KeyMaterialMissing("no key".into())
        .to_string()
        .contains("no key"));
}

#[test]
fn test_only_collaborator_failures_are_retryable() {
    assert!(AttestError::CollaboratorUnavailable("store".into()).is_retryable());
    assert!(!AttestError::NotFound("x".into()).is_retryable());
    assert!(!AttestError::Interrupted.is_retryable());
    assert!(!AttestError::Crypto("bad".into()).is_retryable());
}
