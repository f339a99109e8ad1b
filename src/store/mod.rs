//! Durable keyed record storage for certificates and ledger entries
//!
//! Records are JSON documents addressed by (collection, id). The engine only
//! ever inserts; there is no update operation, so any later change to a
//! stored record happened outside the engine.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use anyhow::Result;
use serde_json::Value;
use thiserror::Error;

/// Collection holding issued device certificates
pub const CERTIFICATES: &str = "certificates";

/// Collection holding tamper ledger entries
pub const TAMPER_LEDGER: &str = "tamper_ledger";

/// Insert refused because the id is already taken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Record {collection}/{id} already exists")]
pub struct DuplicateRecord {
    pub collection: String,
    pub id: String,
}

impl DuplicateRecord {
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// Whether a store error is an id conflict rather than a backend failure.
    pub fn is_conflict(error: &anyhow::Error) -> bool {
        error.downcast_ref::<DuplicateRecord>().is_some()
    }
}

pub trait RecordStore: Send + Sync {
    /// Insert a new record; fails with [`DuplicateRecord`] if `id` already
    /// exists in `collection`.
    fn insert(&self, collection: &str, id: &str, record: &Value) -> Result<()>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// All records of a collection, ordered by id.
    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>>;
}
