#![allow(dead_code)]

use std::sync::Arc;

use idempotency_engine::cache::{InMemoryCache, InProcessLockProvider};
use idempotency_engine::{AccessCache, Coordinator, EngineOptions};

/// Lockable-shape cache: the backend's own locking makes get-or-create
/// atomic.
pub fn lockable_cache() -> AccessCache {
    AccessCache::lockable(Arc::new(InMemoryCache::new()))
}

/// Basic-shape cache wrapped by an external in-process lock provider.
pub fn basic_cache() -> AccessCache {
    AccessCache::basic(
        Arc::new(InMemoryCache::new()),
        Arc::new(InProcessLockProvider::new()),
    )
}

pub fn coordinator(cache: &AccessCache, options: EngineOptions) -> Coordinator {
    Coordinator::new(options, cache.clone())
}

pub fn unique_key() -> String {
    format!("key-{}", uuid::Uuid::new_v4())
}
