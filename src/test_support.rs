//! Shared fixtures for unit tests.

use crate::collaborators::Clock;
use crate::crypto::keys::KeyManager;
use crate::store::{DuplicateRecord, MemoryRecordStore, RecordStore, CERTIFICATES};
use chrono::{DateTime, TimeZone, Utc};
use rsa::RsaPrivateKey;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

static SIGNING_KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
static ROGUE_KEY: OnceLock<RsaPrivateKey> = OnceLock::new();

fn generate() -> RsaPrivateKey {
    RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("RSA key generation failed")
}

/// Key manager backed by a process-wide test key, so each test skips keygen.
pub fn test_keys() -> Arc<KeyManager> {
    let key = SIGNING_KEY.get_or_init(generate).clone();
    Arc::new(KeyManager::from_private_key(key))
}

/// A second key that the engine never trusts.
pub fn rogue_keys() -> Arc<KeyManager> {
    let key = ROGUE_KEY.get_or_init(generate).clone();
    Arc::new(KeyManager::from_private_key(key))
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap(),
    ))
}

/// Store whose backend is always unreachable.
pub struct FailingStore;

impl RecordStore for FailingStore {
    fn insert(&self, _collection: &str, _id: &str, _record: &Value) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("store offline"))
    }

    fn get(&self, _collection: &str, _id: &str) -> anyhow::Result<Option<Value>> {
        Err(anyhow::anyhow!("store offline"))
    }

    fn list(&self, _collection: &str) -> anyhow::Result<Vec<(String, Value)>> {
        Err(anyhow::anyhow!("store offline"))
    }
}

/// In-memory store whose `certificates` collection can be taken offline or
/// made to report id collisions. Other collections always work.
#[derive(Default)]
pub struct FlakyCertificateStore {
    pub inner: MemoryRecordStore,
    pub offline: AtomicBool,
    pub collisions: AtomicUsize,
}

impl FlakyCertificateStore {
    pub fn offline() -> Self {
        let store = Self::default();
        store.offline.store(true, Ordering::SeqCst);
        store
    }

    pub fn colliding(times: usize) -> Self {
        let store = Self::default();
        store.collisions.store(times, Ordering::SeqCst);
        store
    }

    pub fn bring_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }
}

impl RecordStore for FlakyCertificateStore {
    fn insert(&self, collection: &str, id: &str, record: &Value) -> anyhow::Result<()> {
        if collection == CERTIFICATES {
            if self.offline.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("certificate collection offline"));
            }
            let collide = self
                .collisions
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if collide {
                return Err(DuplicateRecord::new(collection, id).into());
            }
        }
        self.inner.insert(collection, id, record)
    }

    fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Value>> {
        self.inner.get(collection, id)
    }

    fn list(&self, collection: &str) -> anyhow::Result<Vec<(String, Value)>> {
        self.inner.list(collection)
    }
}
