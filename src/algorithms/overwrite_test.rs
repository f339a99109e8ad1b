//! Tests for the overwrite engine
//!
//! Every test that runs a wipe is #[serial]: the interrupt flag is
//! process-global and one test raises it on purpose.

#[cfg(test)]
mod overwrite_engine_tests {
    use crate::algorithms::OverwriteEngine;
    use crate::verification::EntropyAnalyzer;
    use crate::{reset_interrupted, set_interrupted, AttestError};
    use serial_test::serial;
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn file_with(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_wipe_removes_file() {
        reset_interrupted();
        let dir = TempDir::new().unwrap();
        let path = file_with(&dir, "secret.txt", &vec![b'A'; 3 * 1024 * 1024 + 5]);

        OverwriteEngine::new().wipe(&path, 3).unwrap();

        assert!(!path.exists());
    }

    #[test]
    #[serial]
    fn test_wipe_small_chunks_and_empty_file() {
        reset_interrupted();
        let dir = TempDir::new().unwrap();
        let engine = OverwriteEngine::with_chunk_size(7);

        let path = file_with(&dir, "odd.bin", &[1u8; 100]);
        engine.wipe(&path, 2).unwrap();
        assert!(!path.exists());

        let empty = file_with(&dir, "empty.bin", &[]);
        engine.wipe(&empty, 1).unwrap();
        assert!(!empty.exists());
    }

    // A hard link keeps the inode reachable after the wipe unlinks the
    // original name, so the written bytes can be read back.
    #[test]
    #[serial]
    fn test_passes_replace_contents_before_unlink() {
        reset_interrupted();
        let dir = TempDir::new().unwrap();
        let original: Vec<u8> = b"Quarterly payroll: alice 5200, bob 4800\n"
            .iter()
            .copied()
            .cycle()
            .take(64 * 1024)
            .collect();
        let path = file_with(&dir, "payroll.csv", &original);
        let witness = dir.path().join("witness.csv");
        fs::hard_link(&path, &witness).unwrap();

        // Chunk size does not divide the file length; the tail must be covered too
        OverwriteEngine::with_chunk_size(1000).wipe(&path, 3).unwrap();

        assert!(!path.exists());
        let after = fs::read(&witness).unwrap();
        assert_eq!(after.len(), original.len());
        assert_ne!(after, original);
        assert!(EntropyAnalyzer::calculate_entropy(&after) > 7.5);

        let tail = &after[after.len() - 536..];
        assert_ne!(tail, &original[original.len() - 536..]);
    }

    #[test]
    #[serial]
    fn test_missing_target_is_not_found() {
        reset_interrupted();
        let dir = TempDir::new().unwrap();

        let err = OverwriteEngine::new()
            .wipe(&dir.path().join("absent.bin"), 3)
            .unwrap_err();
        assert!(matches!(err, AttestError::NotFound(_)));
    }

    #[test]
    #[serial]
    fn test_directory_is_not_a_target() {
        reset_interrupted();
        let dir = TempDir::new().unwrap();

        let err = OverwriteEngine::new().wipe(dir.path(), 1).unwrap_err();
        assert!(matches!(err, AttestError::NotFound(_)));
        assert!(dir.path().exists());
    }

    #[test]
    #[serial]
    fn test_symlink_is_not_followed() {
        reset_interrupted();
        let dir = TempDir::new().unwrap();
        let real = file_with(&dir, "real.txt", b"keep me");
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let err = OverwriteEngine::new().wipe(&link, 1).unwrap_err();
        assert!(matches!(err, AttestError::NotFound(_)));
        assert_eq!(fs::read(&real).unwrap(), b"keep me");
    }

    #[test]
    #[serial]
    fn test_zero_passes_rejected() {
        reset_interrupted();
        let dir = TempDir::new().unwrap();
        let path = file_with(&dir, "data.bin", b"data");

        let err = OverwriteEngine::new().wipe(&path, 0).unwrap_err();
        assert!(matches!(err, AttestError::InvalidInput(_)));
        assert_eq!(fs::read(&path).unwrap(), b"data");
    }

    #[test]
    #[serial]
    fn test_interrupt_keeps_file() {
        reset_interrupted();
        let dir = TempDir::new().unwrap();
        let path = file_with(&dir, "data.bin", b"untouched");

        set_interrupted();
        let result = OverwriteEngine::new().wipe(&path, 3);
        reset_interrupted();

        assert!(matches!(result, Err(AttestError::Interrupted)));
        assert!(path.exists());
        assert_eq!(fs::read(&path).unwrap(), b"untouched");
    }

    #[test]
    #[serial]
    fn test_concurrent_wipes_of_one_target() {
        reset_interrupted();
        let dir = TempDir::new().unwrap();
        let path = Arc::new(file_with(&dir, "shared.bin", &vec![0u8; 2 * 1024 * 1024]));
        let engine = Arc::new(OverwriteEngine::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = Arc::clone(&path);
                let engine = Arc::clone(&engine);
                thread::spawn(move || engine.wipe(&path, 2))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AttestError::NotFound(_))));
        assert!(!path.exists());
    }

    #[test]
    #[serial]
    fn test_independent_targets_in_parallel() {
        reset_interrupted();
        let dir = TempDir::new().unwrap();
        let paths: Vec<_> = (0..4)
            .map(|i| file_with(&dir, &format!("f{}.bin", i), &vec![i as u8; 64 * 1024]))
            .collect();
        let engine = OverwriteEngine::new();

        thread::scope(|s| {
            for path in &paths {
                let engine = &engine;
                s.spawn(move || engine.wipe(path, 2).unwrap());
            }
        });

        assert!(paths.iter().all(|p| !p.exists()));
    }
}
