pub mod overwrite;

#[cfg(test)]
mod overwrite_test;

pub use overwrite::{OverwriteEngine, WipeTarget, OVERWRITE_METHOD};
