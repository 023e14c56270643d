//! In-memory session storage with per-entry expiry

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::SessionStorage};
use core_async::sync::RwLock;
use core_async::time::Instant;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Process-local session storage
///
/// Expiry is checked lazily on read using the runtime clock, so paused-time
/// tests can drive it.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStorage for MemorySessionStorage {
    async fn set_item(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        debug!(key, ttl_secs = ttl.map(|t| t.as_secs()), "Stored session item");
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
            debug!(key, "Evicted expired session item");
        }
        Ok(None)
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let storage = MemorySessionStorage::new();
        storage.set_item("k", "v", None).await.unwrap();

        assert_eq!(storage.get_item("k").await.unwrap(), Some("v".to_string()));
        assert!(storage.contains("k").await.unwrap());

        storage.remove_item("k").await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap(), None);
        storage.remove_item("k").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let storage = MemorySessionStorage::new();
        storage
            .set_item("token", "secret", Some(Duration::from_secs(600)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(599)).await;
        assert_eq!(storage.get_item("token").await.unwrap(), Some("secret".to_string()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(storage.get_item("token").await.unwrap(), None);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_replaces_previous_value() {
        let storage = MemorySessionStorage::new();
        storage.set_item("k", "one", None).await.unwrap();
        storage.set_item("k", "two", None).await.unwrap();

        assert_eq!(storage.get_item("k").await.unwrap(), Some("two".to_string()));
        assert_eq!(storage.len().await, 1);
    }
}
