use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cache::{BasicCache, GetOrCreate, LockableCache};
use crate::error::Result;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// In-memory cache backend with per-entry TTL and lazy expiry.
///
/// Implements both capability shapes: as a [`LockableCache`] the map mutex
/// makes `get_or_create` atomic; as a [`BasicCache`] it stands in for a
/// remote store behind an external lock provider. Reference backend for
/// single-process hosts and tests.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live() => Some(entry.value.clone()),
            Some(_) => {
                // Expired, evict lazily.
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn write(&self, key: &str, value: &[u8], ttl: Duration) {
        let entry = Entry {
            value: value.to_vec(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key.to_string(), entry);
    }
}

#[async_trait]
impl BasicCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read(key).await)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.write(key, value, ttl).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl LockableCache for InMemoryCache {
    async fn get_or_create(
        &self,
        key: &str,
        fresh: Vec<u8>,
        ttl: Duration,
        _lock_timeout: Option<Duration>,
    ) -> Result<GetOrCreate> {
        // The map mutex is the internal lock; acquisition is immediate, so
        // the timeout never comes into play here.
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live() => Ok(GetOrCreate::Existing(entry.value.clone())),
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: fresh,
                        expires_at: Instant::now() + ttl,
                    },
                );
                Ok(GetOrCreate::Created)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read(key).await)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.write(key, value, ttl).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let cache = InMemoryCache::new();
        BasicCache::set(&cache, "k", b"v", Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(
            BasicCache::get(&cache, "k").await.unwrap(),
            Some(b"v".to_vec())
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(BasicCache::get(&cache, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_or_create_replaces_expired_entry() {
        let cache = InMemoryCache::new();
        LockableCache::set(&cache, "k", b"old", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let outcome = cache
            .get_or_create("k", b"new".to_vec(), Duration::from_secs(60), None)
            .await
            .unwrap();
        assert_eq!(outcome, GetOrCreate::Created);
        assert_eq!(
            LockableCache::get(&cache, "k").await.unwrap(),
            Some(b"new".to_vec())
        );
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_single_winner() {
        use std::sync::Arc;

        let cache = Arc::new(InMemoryCache::new());
        let mut handles = Vec::new();
        for i in 0..16u8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_create("k", vec![i], Duration::from_secs(60), None)
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() == GetOrCreate::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }
}
