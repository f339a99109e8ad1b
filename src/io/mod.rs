//! File-level I/O shared by the wipe and verification paths.


use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Read size for streaming hashes
pub const HASH_CHUNK_SIZE: usize = 4096;

/// Streaming SHA-256 of a whole file, as lowercase hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Up to `limit` bytes from the start of the file.
pub fn read_head(path: &Path, limit: usize) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut sample = Vec::with_capacity(limit.min(1 << 20));
    file.take(limit as u64).read_to_end(&mut sample)?;
    Ok(sample)
}

/// Every regular file below `root`, recursively, in path order.
///
/// Symlinks are skipped, as is anything that resolves outside `root`
/// through a symlinked directory. Entries that cannot be read are logged
/// and left out.
pub fn collect_regular_files(root: &Path) -> Result<Vec<PathBuf>> {
    let root_str = root
        .to_str()
        .ok_or_else(|| anyhow!("Path is not valid UTF-8: {}", root.display()))?;
    let canonical_root = root
        .canonicalize()
        .with_context(|| format!("Cannot resolve {}", root.display()))?;

    let pattern = format!("{}/**/*", glob::Pattern::escape(root_str.trim_end_matches('/')));
    let entries = glob::glob(&pattern).context("Failed to build directory walk pattern")?;

    let mut files = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(path = %e.path().display(), error = %e.error(), "Skipping unreadable entry");
                continue;
            }
        };

        let is_regular = path
            .symlink_metadata()
            .map(|meta| meta.file_type().is_file())
            .unwrap_or(false);
        if !is_regular {
            continue;
        }

        match path.canonicalize() {
            Ok(resolved) if resolved.starts_with(&canonical_root) => files.push(path),
            Ok(resolved) => {
                tracing::debug!(path = %path.display(), resolved = %resolved.display(), "Skipping file outside root")
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unresolvable file"),
        }
    }

    files.sort();
    Ok(files)
}
