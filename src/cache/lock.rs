use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{EngineError, Result};

/// Held lock for one cache key. Released on drop.
pub struct LockGuard {
    _hold: Box<dyn Any + Send>,
}

impl LockGuard {
    pub fn new(hold: impl Any + Send) -> Self {
        Self {
            _hold: Box::new(hold),
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

/// External lock provider wrapping Basic cache backends that have no
/// atomic create-if-absent of their own.
///
/// `timeout` of `None` means no waiting: acquisition fails immediately if
/// the lock is held.
#[async_trait]
pub trait LockProvider: Send + Sync {
    async fn acquire(&self, key: &str, timeout: Option<Duration>) -> Result<LockGuard>;
}

/// In-process lock provider keyed by cache key.
///
/// Suitable for single-process hosts and tests; multi-process deployments
/// need a distributed provider (or a Lockable backend) behind the same
/// trait.
#[derive(Default)]
pub struct InProcessLockProvider {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InProcessLockProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockProvider for InProcessLockProvider {
    async fn acquire(&self, key: &str, timeout: Option<Duration>) -> Result<LockGuard> {
        let lock = {
            let mut locks = self.locks.lock().await;
            let lock = locks.entry(key.to_string()).or_default().clone();
            // Entries only the map still references have no holder and no
            // waiter; sweep them so the map does not grow with every
            // distinct key ever seen.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            lock
        };

        match timeout {
            Some(timeout) => {
                let guard = tokio::time::timeout(timeout, lock.lock_owned())
                    .await
                    .map_err(|_| {
                        EngineError::LockAcquisition(format!(
                            "lock for key '{key}' not acquired within {timeout:?}"
                        ))
                    })?;
                Ok(LockGuard::new(guard))
            }
            None => {
                let guard = lock.try_lock_owned().map_err(|_| {
                    EngineError::LockAcquisition(format!(
                        "lock for key '{key}' is held and waiting is disabled"
                    ))
                })?;
                Ok(LockGuard::new(guard))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let provider = InProcessLockProvider::new();

        let guard = provider
            .acquire("k1", Some(Duration::from_millis(100)))
            .await
            .unwrap();
        drop(guard);

        // Released lock is immediately reacquirable.
        provider
            .acquire("k1", Some(Duration::from_millis(100)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let provider = InProcessLockProvider::new();

        let _guard = provider
            .acquire("k1", Some(Duration::from_millis(100)))
            .await
            .unwrap();

        let err = provider
            .acquire("k1", Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LockAcquisition(_)));
    }

    #[tokio::test]
    async fn test_disabled_waiting_fails_fast() {
        let provider = InProcessLockProvider::new();

        let _guard = provider.acquire("k1", None).await.unwrap();
        let err = provider.acquire("k1", None).await.unwrap_err();
        assert!(matches!(err, EngineError::LockAcquisition(_)));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let provider = InProcessLockProvider::new();

        let _guard = provider.acquire("k1", None).await.unwrap();
        provider.acquire("k2", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_guard_debug_is_opaque() {
        let provider = InProcessLockProvider::new();
        let guard = provider.acquire("k1", None).await.unwrap();
        assert!(format!("{guard:?}").starts_with("LockGuard"));
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let provider = InProcessLockProvider::new();

        for i in 0..32 {
            let guard = provider.acquire(&format!("k{i}"), None).await.unwrap();
            drop(guard);
        }

        let _held = provider.acquire("held", None).await.unwrap();
        provider.acquire("fresh", None).await.unwrap();

        // The sweep during the last acquisition dropped every idle entry
        // but kept the held lock.
        let locks = provider.locks.lock().await;
        assert!(locks.contains_key("held"));
        assert!(locks.contains_key("fresh"));
        assert_eq!(locks.len(), 2);
    }
}
