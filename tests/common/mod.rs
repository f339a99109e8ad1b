//! Common test utilities for integration tests
//!
//! This module provides shared functionality including:
//! - Scratch workspaces with a mountpoint and engine state directory
//! - Out-of-band edits of the certificate database

pub mod test_helpers;
