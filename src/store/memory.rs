use super::{DuplicateRecord, RecordStore};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// Process-local record store; contents are lost on drop.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Collections>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<MutexGuard<'_, Collections>> {
        self.records
            .lock()
            .map_err(|_| anyhow!("In-memory record store poisoned"))
    }

    /// Rewrite a stored record behind the engine's back.
    #[cfg(test)]
    pub(crate) fn tamper(&self, collection: &str, id: &str, edit: impl FnOnce(&mut Value)) {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .expect("record to tamper with");
        edit(record);
    }
}

impl RecordStore for MemoryRecordStore {
    fn insert(&self, collection: &str, id: &str, record: &Value) -> Result<()> {
        let mut records = self.records()?;
        let entries = records.entry(collection.to_string()).or_default();
        if entries.contains_key(id) {
            return Err(DuplicateRecord::new(collection, id).into());
        }
        entries.insert(id.to_string(), record.clone());
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .records()?
            .get(collection)
            .and_then(|entries| entries.get(id))
            .cloned())
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        Ok(self
            .records()?
            .get(collection)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, value)| (id.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
