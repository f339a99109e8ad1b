pub mod canonical;
pub mod certificates;
pub mod keys;
pub mod secure_rng;


// Re-export
pub use canonical::{canonical_bytes, sha256_hex, SCHEMA_VERSION};
pub use certificates::{
    Certificate, CertificateIssuer, CertificateVerifier, CoreFields, DeviceWipeCertificate,
    DeviceWipeRequest, FileCertificate, Issued, VerificationData,
};
pub use keys::{KeyManager, SignatureScheme};
pub use secure_rng::secure_random_bytes;
