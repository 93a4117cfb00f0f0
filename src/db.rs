use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::{Duration, Instant, MissedTickBehavior},
};
use tracing::debug;

use crate::data::Entry;

pub type InnerDb = HashMap<Bytes, Entry>;

/// Shared keyspace. Every entry is replaced as a whole under the write lock, so a
/// reader never observes a partially applied write.
#[derive(Debug, Clone, Default)]
pub struct Db {
    inner: Arc<RwLock<InnerDb>>,
}

impl Db {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        self.inner.write().await.insert(key, Entry::new(value, ttl));
    }

    /// Expired entries are removed as a side effect of reading them.
    pub async fn get(&self, key: &[u8]) -> Option<Bytes> {
        let now = Instant::now();
        {
            let db = self.inner.read().await;
            match db.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut db = self.inner.write().await;
        // Another writer may have replaced the entry between the two locks.
        match db.get(key) {
            Some(entry) if entry.is_expired_at(now) => {
                db.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Returns whether a live entry was removed.
    pub async fn delete(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        match self.inner.write().await.remove(key) {
            Some(entry) => !entry.is_expired_at(now),
            None => false,
        }
    }

    /// Removes every entry whose deadline has passed and returns how many went.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut db = self.inner.write().await;
        let before = db.len();
        db.retain(|_, entry| !entry.is_expired_at(now));
        before - db.len()
    }

    /// Number of physically present entries, expired or not.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub fn spawn_expiry_sweep(&self, every: Duration) -> JoinHandle<()> {
        let db = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = db.purge_expired().await;
                if purged > 0 {
                    debug!(purged, "expired keys swept");
                }
            }
        })
    }
}
