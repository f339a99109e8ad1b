pub mod completeness;
pub mod entropy;


pub use completeness::{AggregateReport, FileVerification, VerificationReport, WipeStatus, WipeVerifier};
pub use entropy::{EntropyAnalyzer, EntropyReport, PatternFlags};
