use anyhow::{anyhow, Result};
use ring::rand::{SecureRandom, SystemRandom};
use std::fs::File;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Size of the blocks compared by the continuous output test
const CONTINUOUS_TEST_BLOCK: usize = 16;

/// Secure random generator used for overwrite passes.
///
/// Draws from the OS CSPRNG through ring, falling back to `/dev/urandom`,
/// and runs a FIPS 140-2 style continuous test so a stuck source can never
/// silently produce repeated overwrite data.
pub struct SecureRNG {
    /// Primary entropy source (OS cryptographic RNG)
    pub(crate) primary_source: Box<dyn EntropySource>,
    /// Fallback entropy source
    pub(crate) fallback_source: Box<dyn EntropySource>,
    /// Health check status
    pub(crate) is_healthy: Arc<AtomicBool>,
    /// FIPS 140-2 continuous test state
    pub(crate) continuous_test: Arc<Mutex<ContinuousTest>>,
}

/// Trait for entropy sources
pub trait EntropySource: Send + Sync {
    /// Fill buffer with random bytes
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()>;
    /// Check if source is available
    fn is_available(&self) -> bool;
    /// Get source name for logging
    fn name(&self) -> &str;
}

/// Ring-based system random (uses OS facilities)
pub struct RingSystemRNG {
    rng: SystemRandom,
}

impl Default for RingSystemRNG {
    fn default() -> Self {
        Self::new()
    }
}

impl RingSystemRNG {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl EntropySource for RingSystemRNG {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        self.rng
            .fill(dest)
            .map_err(|_| anyhow!("Ring SystemRandom failed"))?;
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "RingSystemRNG"
    }
}

/// OS urandom entropy source
pub struct URandom {
    available: bool,
}

impl Default for URandom {
    fn default() -> Self {
        Self::new()
    }
}

impl URandom {
    pub fn new() -> Self {
        let available = std::path::Path::new("/dev/urandom").exists();
        Self { available }
    }
}

impl EntropySource for URandom {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        if !self.available {
            return Err(anyhow!("/dev/urandom not available"));
        }

        let mut file = File::open("/dev/urandom")
            .map_err(|e| anyhow!("Failed to open /dev/urandom: {}", e))?;

        file.read_exact(dest)
            .map_err(|e| anyhow!("Failed to read from /dev/urandom: {}", e))?;

        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn name(&self) -> &str {
        "URandom"
    }
}

/// FIPS 140-2 continuous random number generator test: consecutive output
/// blocks must differ.
pub(crate) struct ContinuousTest {
    last_block: Option<[u8; CONTINUOUS_TEST_BLOCK]>,
    pub(crate) failures: u64,
}

impl ContinuousTest {
    pub(crate) fn new() -> Self {
        Self {
            last_block: None,
            failures: 0,
        }
    }

    /// Returns false when `data` starts with the same block as the previous call.
    pub(crate) fn test(&mut self, data: &[u8]) -> bool {
        if data.len() < CONTINUOUS_TEST_BLOCK {
            return true;
        }

        let mut block = [0u8; CONTINUOUS_TEST_BLOCK];
        block.copy_from_slice(&data[..CONTINUOUS_TEST_BLOCK]);

        let passed = self.last_block != Some(block);
        if !passed {
            self.failures += 1;
        }
        self.last_block = Some(block);
        passed
    }
}

impl SecureRNG {
    pub fn new() -> Self {
        Self::with_sources(Box::new(RingSystemRNG::new()), Box::new(URandom::new()))
    }

    pub fn with_sources(
        primary_source: Box<dyn EntropySource>,
        fallback_source: Box<dyn EntropySource>,
    ) -> Self {
        Self {
            primary_source,
            fallback_source,
            is_healthy: Arc::new(AtomicBool::new(true)),
            continuous_test: Arc::new(Mutex::new(ContinuousTest::new())),
        }
    }

    /// Fill `dest` with secure random bytes.
    ///
    /// Output that fails the continuous test is regenerated once from the
    /// fallback source; a second failure marks the generator unhealthy.
    pub fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        if let Err(e) = self.fill_from_sources(dest) {
            self.is_healthy.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let mut test = self
            .continuous_test
            .lock()
            .map_err(|_| anyhow!("RNG continuous test state poisoned"))?;

        if test.test(dest) {
            return Ok(());
        }

        tracing::warn!(
            source = self.primary_source.name(),
            "Continuous RNG test failed, regenerating from fallback source"
        );
        self.fallback_source.fill_bytes(dest)?;
        if test.test(dest) {
            return Ok(());
        }

        self.is_healthy.store(false, Ordering::SeqCst);
        Err(anyhow!(
            "Random output repeated across consecutive blocks; refusing to use it"
        ))
    }

    fn fill_from_sources(&self, dest: &mut [u8]) -> Result<()> {
        if self.primary_source.is_available() {
            match self.primary_source.fill_bytes(dest) {
                Ok(()) => return Ok(()),
                Err(e) => tracing::warn!(
                    source = self.primary_source.name(),
                    error = %e,
                    "Primary entropy source failed, using fallback"
                ),
            }
        }

        if self.fallback_source.is_available() {
            return self.fallback_source.fill_bytes(dest);
        }

        Err(anyhow!("No entropy source available"))
    }

    /// Check if RNG is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::SeqCst)
    }
}

impl Default for SecureRNG {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_RNG: SecureRNG = SecureRNG::new();
}

/// Get the global secure RNG instance
pub fn get_secure_rng() -> &'static SecureRNG {
    &GLOBAL_RNG
}

/// Convenience function to fill bytes using global RNG
pub fn secure_random_bytes(dest: &mut [u8]) -> Result<()> {
    GLOBAL_RNG.fill_bytes(dest)
}
