//! Common test helper functions
#![allow(dead_code)]

use rusqlite::{params, Connection};
use sayonara_attest::crypto::secure_random_bytes;
use sayonara_attest::{AttestationService, EngineConfig};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch area holding a fake mountpoint and the engine's state directory
pub struct Workspace {
    pub mount: PathBuf,
    pub state: PathBuf,
    _dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mount = dir.path().join("mnt");
        let state = dir.path().join("state");
        fs::create_dir_all(&mount).expect("Failed to create mountpoint");

        Self {
            mount,
            state,
            _dir: dir,
        }
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig::rooted_at(&self.state)
    }

    /// A service over this workspace's durable keys and database.
    pub fn service(&self) -> AttestationService {
        AttestationService::new(self.config()).expect("Failed to build service")
    }

    /// A service sharing the database but signing with its own keys.
    pub fn rogue_service(&self) -> AttestationService {
        let mut config = self.config();
        config.key_dir = self.state.join("rogue-keys");
        AttestationService::new(config).expect("Failed to build rogue service")
    }

    pub fn db_path(&self) -> PathBuf {
        self.config().store_path.expect("store path configured")
    }

    pub fn write(&self, relative: &str, data: &[u8]) -> PathBuf {
        let path = self.mount.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent");
        }
        fs::write(&path, data).expect("Failed to write file");
        path
    }
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    secure_random_bytes(&mut data).expect("Secure RNG failed");
    data
}

/// Rewrite a stored record directly in SQLite, bypassing the engine.
pub fn tamper_record(db_path: &Path, collection: &str, id: &str, edit: impl FnOnce(&mut Value)) {
    let conn = Connection::open(db_path).expect("Failed to open database");
    let payload: String = conn
        .query_row(
            "SELECT payload FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .expect("Record to tamper with");

    let mut record: Value = serde_json::from_str(&payload).expect("Stored record is JSON");
    edit(&mut record);

    conn.execute(
        "UPDATE records SET payload = ?1 WHERE collection = ?2 AND id = ?3",
        params![record.to_string(), collection, id],
    )
    .expect("Failed to update record");
}

pub fn delete_record(db_path: &Path, collection: &str, id: &str) {
    let conn = Connection::open(db_path).expect("Failed to open database");
    conn.execute(
        "DELETE FROM records WHERE collection = ?1 AND id = ?2",
        params![collection, id],
    )
    .expect("Failed to delete record");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_layout() {
        let ws = Workspace::new();
        let path = ws.write("a/b.txt", b"x");
        assert!(path.starts_with(&ws.mount));
        assert!(ws.db_path().starts_with(&ws.state));
    }
}
