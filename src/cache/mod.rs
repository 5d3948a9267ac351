pub mod lock;
pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::lock::{InProcessLockProvider, LockGuard, LockProvider};
pub use self::memory::InMemoryCache;
pub use self::redis::RedisCache;

/// Minimal byte-oriented cache backend. Create-if-absent atomicity must be
/// provided externally via a [`LockProvider`].
#[async_trait]
pub trait BasicCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Backend that atomically reads-or-creates under its own internal
/// locking, removing the need for an external lock provider.
#[async_trait]
pub trait LockableCache: Send + Sync {
    /// Returns the existing value for `key`, or stores `fresh` with `ttl`
    /// and reports creation. `lock_timeout` of `None` means the backend
    /// must not wait for its internal lock.
    async fn get_or_create(
        &self,
        key: &str,
        fresh: Vec<u8>,
        ttl: Duration,
        lock_timeout: Option<Duration>,
    ) -> Result<GetOrCreate>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Outcome of an atomic read-or-create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOrCreate {
    /// No value existed; `fresh` was stored and this caller owns the key.
    Created,
    /// A value already existed; returned unmodified.
    Existing(Vec<u8>),
}

/// Capability abstraction over cache backends. The coordinator is written
/// against this enum only; the backend shape is chosen once at
/// configuration time.
#[derive(Clone)]
pub enum AccessCache {
    /// Basic backend plus the external lock provider supplying atomicity.
    Basic {
        cache: Arc<dyn BasicCache>,
        lock: Arc<dyn LockProvider>,
    },
    /// Backend with native atomic get-or-create.
    Lockable(Arc<dyn LockableCache>),
}

impl AccessCache {
    pub fn basic(cache: Arc<dyn BasicCache>, lock: Arc<dyn LockProvider>) -> Self {
        AccessCache::Basic { cache, lock }
    }

    pub fn lockable(cache: Arc<dyn LockableCache>) -> Self {
        AccessCache::Lockable(cache)
    }

    /// Atomic create-if-absent of the admission record.
    pub async fn get_or_create(
        &self,
        key: &str,
        fresh: Vec<u8>,
        ttl: Duration,
        lock_timeout: Option<Duration>,
    ) -> Result<GetOrCreate> {
        match self {
            AccessCache::Basic { cache, lock } => {
                let _guard = lock.acquire(key, lock_timeout).await?;
                match cache.get(key).await? {
                    Some(existing) => Ok(GetOrCreate::Existing(existing)),
                    None => {
                        cache.set(key, &fresh, ttl).await?;
                        Ok(GetOrCreate::Created)
                    }
                }
            }
            AccessCache::Lockable(cache) => cache.get_or_create(key, fresh, ttl, lock_timeout).await,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self {
            AccessCache::Basic { cache, .. } => cache.get(key).await,
            AccessCache::Lockable(cache) => cache.get(key).await,
        }
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        match self {
            AccessCache::Basic { cache, .. } => cache.set(key, value, ttl).await,
            AccessCache::Lockable(cache) => cache.set(key, value, ttl).await,
        }
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        match self {
            AccessCache::Basic { cache, .. } => cache.remove(key).await,
            AccessCache::Lockable(cache) => cache.remove(key).await,
        }
    }
}
