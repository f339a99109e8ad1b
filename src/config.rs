//! Engine configuration
//!
//! Layered the usual way: built-in defaults, then an optional TOML file,
//! then `WIPE_ATTEST_*` environment variables.

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides (e.g. `WIPE_ATTEST_SAMPLE_BYTES`)
pub const ENV_PREFIX: &str = "WIPE_ATTEST";

/// Name of the config file looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Bytes read from the head of a file for entropy analysis
pub const DEFAULT_SAMPLE_BYTES: usize = 10 * 1024;

/// Entropy (bits/byte) above which content is a candidate for "wiped"
pub const DEFAULT_ENTROPY_THRESHOLD: f64 = 7.5;

/// Overwrite passes when the caller does not ask for a specific count
pub const DEFAULT_PASSES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `private_key.pem` and `public_key.pem`
    pub key_dir: PathBuf,
    /// SQLite database for device certificates and the tamper ledger
    pub store_path: Option<PathBuf>,
    /// Directory receiving file certificates as JSON
    pub cert_dir: Option<PathBuf>,
    pub sample_bytes: usize,
    pub entropy_threshold: f64,
    pub default_passes: u32,
    /// Generate a keypair on first use instead of failing
    pub auto_generate_keys: bool,
    /// Worker threads for directory verification
    pub verify_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("io", "sayonara", "sayonara-attest")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".sayonara-attest"));

        Self {
            key_dir: data_dir.join("keys"),
            store_path: Some(data_dir.join("attestations.db")),
            cert_dir: Some(data_dir.join("certs")),
            sample_bytes: DEFAULT_SAMPLE_BYTES,
            entropy_threshold: DEFAULT_ENTROPY_THRESHOLD,
            default_passes: DEFAULT_PASSES,
            auto_generate_keys: true,
            verify_workers: num_cpus::get(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// An explicitly given file must exist; the platform default file is
    /// optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&EngineConfig::default())
            .context("Failed to encode default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        match explicit {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(dirs) = ProjectDirs::from("io", "sayonara", "sayonara-attest") {
                    let path = dirs.config_dir().join(CONFIG_FILE_NAME);
                    builder = builder.add_source(config::File::from(path).required(false));
                }
            }
        }

        let loaded: EngineConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_bytes == 0 {
            return Err(anyhow!("sample_bytes must be greater than zero"));
        }
        if !(0.0..=8.0).contains(&self.entropy_threshold) {
            return Err(anyhow!(
                "entropy_threshold must be within 0..=8 bits/byte, got {}",
                self.entropy_threshold
            ));
        }
        if self.default_passes == 0 {
            return Err(anyhow!("default_passes must be at least 1"));
        }
        if self.verify_workers == 0 {
            return Err(anyhow!("verify_workers must be at least 1"));
        }
        Ok(())
    }

    /// Configuration rooted in a single directory; used by tests and demos.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            key_dir: root.join("keys"),
            store_path: Some(root.join("attestations.db")),
            cert_dir: Some(root.join("certs")),
            ..Self::default()
        }
    }
}
