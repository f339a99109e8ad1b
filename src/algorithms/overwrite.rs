use crate::crypto::secure_rng::get_secure_rng;
use crate::{AttestError, AttestResult};
use nix::fcntl::{flock, FlockArg, OFlag};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Method label recorded on file certificates
pub const OVERWRITE_METHOD: &str = "Random Overwrite";

/// Bytes of random data generated and written per write call
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// A file held open and locked for the duration of one wipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeTarget {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Multi-pass random overwrite followed by unlink.
///
/// Passes are strictly sequential on one handle, each ending in `fsync`.
/// The handle holds an exclusive `flock` from open to unlink, so two wipes of
/// the same file never interleave; the loser finds the file gone.
///
/// An interrupt is honoured between passes only. A wipe stopped that way
/// leaves the file in place, partially overwritten, and reports
/// [`AttestError::Interrupted`].
pub struct OverwriteEngine {
    chunk_size: usize,
}

impl Default for OverwriteEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OverwriteEngine {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn wipe(&self, path: &Path, passes: u32) -> AttestResult<()> {
        if passes == 0 {
            return Err(AttestError::InvalidInput(
                "at least one overwrite pass is required".to_string(),
            ));
        }

        let (target, mut file) = self.acquire(path)?;
        tracing::info!(path = %target.path.display(), size = target.size_bytes, passes, "Starting overwrite");

        for pass in 1..=passes {
            if crate::is_interrupted() {
                tracing::error!(
                    path = %target.path.display(),
                    completed = pass - 1,
                    passes,
                    "Wipe interrupted; file left partially overwritten and NOT deleted"
                );
                return Err(AttestError::Interrupted);
            }

            self.overwrite_pass(&mut file, &target)?;
            tracing::debug!(path = %target.path.display(), pass, passes, "Pass complete");
        }

        fs::remove_file(&target.path)?;
        drop(file);

        tracing::info!(path = %target.path.display(), passes, "File overwritten and removed");
        Ok(())
    }

    /// Open `path` for writing and take the exclusive lock.
    fn acquire(&self, path: &Path) -> AttestResult<(WipeTarget, File)> {
        let not_found = || AttestError::NotFound(path.display().to_string());

        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_file() => {}
            Ok(_) => {
                return Err(AttestError::NotFound(format!(
                    "{} is not a regular file",
                    path.display()
                )))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NOFOLLOW.bits())
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => not_found(),
                _ => AttestError::IoFailure(e),
            })?;

        flock(file.as_raw_fd(), FlockArg::LockExclusive)
            .map_err(|e| AttestError::IoFailure(std::io::Error::from(e)))?;

        // A concurrent wipe may have unlinked (or replaced) the path while
        // we waited for the lock.
        let held = file.metadata()?;
        match fs::symlink_metadata(path) {
            Ok(current) if current.dev() == held.dev() && current.ino() == held.ino() => {}
            Ok(_) => return Err(not_found()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        }

        let target = WipeTarget {
            path: path.to_path_buf(),
            size_bytes: held.len(),
        };
        Ok((target, file))
    }

    fn overwrite_pass(&self, file: &mut File, target: &WipeTarget) -> AttestResult<()> {
        let rng = get_secure_rng();
        let mut buffer = vec![0u8; self.chunk_size.min(target.size_bytes.max(1) as usize)];

        file.seek(SeekFrom::Start(0))?;

        let mut remaining = target.size_bytes;
        while remaining > 0 {
            let len = remaining.min(buffer.len() as u64) as usize;
            rng.fill_bytes(&mut buffer[..len])
                .map_err(|e| AttestError::Crypto(format!("Secure RNG failure: {}", e)))?;
            file.write_all(&buffer[..len])?;
            remaining -= len as u64;
        }

        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}
