use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{AccessCache, GetOrCreate};
use crate::codec::ResponseCodec;
use crate::config::{EngineOptions, LockFailurePolicy};
use crate::error::{EngineError, ProblemDetails, Result};
use crate::fingerprint::{Fingerprinter, RawBody};
use crate::observability::{mask_key, EngineMetrics};
use crate::record::{CacheRecord, CachedResponse, HandlerResult};
use crate::validator::{KeyLookup, KeyValidator};

/// How often a waiter re-reads an in-flight record while the owning
/// request is still executing.
const IN_FLIGHT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Outcome of admitting a request against the current cache record.
#[derive(Debug)]
pub enum Admission {
    /// First admitted request for this key; the handler must run.
    Miss,
    /// A completed execution exists; short-circuit with its response and
    /// do not run the handler.
    Hit(CachedResponse),
    /// The key was reused with a different fingerprint; the caller must
    /// reject with a 400-class result without running the handler.
    Mismatch(ProblemDetails),
}

/// The idempotency state machine for one request.
///
/// A coordinator is built once at the start of a request's hook sequence
/// and threaded through `admit` / `commit` / `cancel` (or driven end to
/// end by [`execute`](Coordinator::execute)). It carries per-request
/// transient state and must not be shared across concurrent requests; the
/// cache record, not the coordinator, is the mutual-exclusion point.
pub struct Coordinator {
    options: EngineOptions,
    cache: AccessCache,
    codec: ResponseCodec,
    fingerprinter: Fingerprinter,
    metrics: Option<Arc<EngineMetrics>>,
    admitted: Option<AdmittedKey>,
}

/// Set after a MISS admit; identifies the record this request owns.
struct AdmittedKey {
    cache_key: String,
    fingerprint: String,
}

impl Coordinator {
    pub fn new(options: EngineOptions, cache: AccessCache) -> Self {
        Self {
            options,
            cache,
            codec: ResponseCodec::new(),
            fingerprinter: Fingerprinter,
            metrics: None,
            admitted: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:{}", self.options.cache_key_prefix, key)
    }

    fn on_metrics(&self, record: impl FnOnce(&EngineMetrics)) {
        if let Some(metrics) = &self.metrics {
            record(metrics);
        }
    }

    /// Admits a request for `(key, fingerprint)` against the current cache
    /// record, atomically creating `InProgress` when no record exists.
    ///
    /// A matching in-flight record is a concurrent retry: the call waits,
    /// bounded by the lock timeout, for the owner to resolve rather than
    /// ever admitting a second executor. An unresolved wait surfaces
    /// [`EngineError::LockAcquisition`].
    pub async fn admit(&mut self, key: &str, fingerprint: &str) -> Result<Admission> {
        self.on_metrics(|m| m.record_request());

        let cache_key = self.cache_key(key);
        let fresh = self.codec.encode(&CacheRecord::in_progress(fingerprint))?;
        let wait = self.options.lock_timeout.duration();
        let deadline = wait.map(|d| Instant::now() + d);

        loop {
            let outcome = match self
                .cache
                .get_or_create(&cache_key, fresh.clone(), self.options.expiry(), wait)
                .await
            {
                Ok(outcome) => outcome,
                Err(EngineError::LockAcquisition(msg)) => {
                    self.on_metrics(|m| m.record_lock_failure());
                    return Err(EngineError::LockAcquisition(msg));
                }
                Err(e) => return Err(e),
            };

            let existing = match outcome {
                GetOrCreate::Created => {
                    self.admitted = Some(AdmittedKey {
                        cache_key,
                        fingerprint: fingerprint.to_string(),
                    });
                    self.on_metrics(|m| m.record_miss());
                    debug!(key = %mask_key(key), "idempotency miss, handler will run");
                    return Ok(Admission::Miss);
                }
                GetOrCreate::Existing(bytes) => self.codec.decode(&bytes)?,
            };

            if existing.fingerprint() != fingerprint {
                self.on_metrics(|m| m.record_mismatch());
                debug!(key = %mask_key(key), "idempotency key reused with different fingerprint");
                return Ok(Admission::Mismatch(ProblemDetails::fingerprint_mismatch(
                    format!(
                        "idempotency key '{}' was already used for a different request",
                        key
                    ),
                )));
            }

            match existing {
                CacheRecord::Completed { response, .. } => {
                    self.on_metrics(|m| m.record_hit());
                    debug!(key = %mask_key(key), "idempotency hit, replaying cached response");
                    return Ok(Admission::Hit(response));
                }
                CacheRecord::InProgress { .. } => match deadline {
                    Some(deadline) if Instant::now() < deadline => {
                        tokio::time::sleep(IN_FLIGHT_POLL_INTERVAL).await;
                    }
                    _ => {
                        self.on_metrics(|m| m.record_lock_failure());
                        return Err(EngineError::LockAcquisition(format!(
                            "request for idempotency key '{}' is still in flight",
                            mask_key(key)
                        )));
                    }
                },
            }
        }
    }

    /// Transitions this request's record to `Completed`, or discards it
    /// when the result must not be cached.
    ///
    /// Capture is best-effort: encoding or storage failures are logged and
    /// counted, the record is removed so the key stays retryable, and the
    /// original result still reaches the caller.
    pub async fn commit(&mut self, result: &HandlerResult) -> Result<()> {
        let Some(admitted) = self.admitted.take() else {
            // Nothing was admitted as a MISS by this coordinator.
            return Ok(());
        };

        if self.options.is_excluded(result.shape) {
            self.discard_record(&admitted.cache_key).await;
            self.on_metrics(|m| m.record_excluded_skip());
            return Ok(());
        }

        if self.options.cache_only_success_responses && !result.status.is_success() {
            self.discard_record(&admitted.cache_key).await;
            self.on_metrics(|m| m.record_non_success_skip());
            debug!(status = result.status.as_u16(), "non-success result not cached, key stays retryable");
            return Ok(());
        }

        let record = CacheRecord::completed(admitted.fingerprint, CachedResponse::capture(result));
        let encoded = match self.codec.encode(&record) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("failed to encode captured response: {e}");
                self.on_metrics(|m| m.record_serialization_failure());
                self.discard_record(&admitted.cache_key).await;
                return Ok(());
            }
        };

        match self
            .cache
            .set(&admitted.cache_key, &encoded, self.options.expiry())
            .await
        {
            Ok(()) => {
                self.on_metrics(|m| m.record_store());
                Ok(())
            }
            Err(e) => {
                warn!("failed to store captured response: {e}");
                self.on_metrics(|m| m.record_serialization_failure());
                // An uncertain write must not leave a half-written record.
                self.discard_record(&admitted.cache_key).await;
                Ok(())
            }
        }
    }

    /// Removes this request's record after a handler fault so the key is
    /// immediately retryable. A key left `InProgress` would stay blocked
    /// until TTL expiry.
    pub async fn cancel(&mut self) -> Result<()> {
        let Some(admitted) = self.admitted.take() else {
            return Ok(());
        };

        self.cache.remove(&admitted.cache_key).await?;
        self.on_metrics(|m| m.record_cancellation());
        Ok(())
    }

    async fn discard_record(&self, cache_key: &str) {
        if let Err(e) = self.cache.remove(cache_key).await {
            warn!("failed to remove idempotency record '{cache_key}': {e}");
        }
    }

    /// Drives the full hook sequence for one request: key validation,
    /// fingerprinting, admission, handler execution and commit/cancel.
    ///
    /// Without a key in optional mode the engine disengages and the
    /// handler always runs. A handler fault cancels the record and is
    /// re-raised unchanged.
    pub async fn execute<F, Fut>(
        &mut self,
        headers: &HeaderMap,
        method: &Method,
        path: &str,
        body: &mut dyn RawBody,
        handler: F,
    ) -> Result<HandlerResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<HandlerResult>>,
    {
        let key = match KeyValidator::extract(headers, &self.options)? {
            KeyLookup::Key(key) => key,
            KeyLookup::Disengaged => return handler().await,
        };

        let fingerprint = self.fingerprinter.fingerprint(method, path, body).await?;

        let admission = match self.admit(&key, &fingerprint).await {
            Ok(admission) => admission,
            Err(EngineError::LockAcquisition(msg))
                if self.options.lock_failure_policy == LockFailurePolicy::ExecuteUnprotected =>
            {
                warn!(
                    key = %mask_key(&key),
                    "lock acquisition failed, executing without idempotency protection: {msg}"
                );
                return handler().await;
            }
            Err(e) => return Err(e),
        };

        match admission {
            Admission::Hit(response) => response.into_handler_result(),
            Admission::Mismatch(problem) => Err(EngineError::FingerprintMismatch(problem)),
            Admission::Miss => match handler().await {
                Ok(result) => {
                    self.commit(&result).await?;
                    Ok(result)
                }
                Err(fault) => {
                    if let Err(e) = self.cancel().await {
                        warn!("failed to cancel idempotency record after handler fault: {e}");
                    }
                    Err(fault)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::config::LockTimeout;
    use http::StatusCode;
    use serde_json::json;

    fn coordinator(options: EngineOptions) -> Coordinator {
        Coordinator::new(
            options,
            AccessCache::lockable(Arc::new(InMemoryCache::new())),
        )
    }

    #[tokio::test]
    async fn test_commit_without_admit_is_noop() {
        let mut coordinator = coordinator(EngineOptions::default());
        let result = HandlerResult::json(StatusCode::OK, json!({"id": 1}));
        coordinator.commit(&result).await.unwrap();
        coordinator.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let mut coordinator = coordinator(EngineOptions::default());

        let admission = coordinator.admit("abc", "fp-1").await.unwrap();
        assert!(matches!(admission, Admission::Miss));

        let result = HandlerResult::json(StatusCode::OK, json!({"id": 1}));
        coordinator.commit(&result).await.unwrap();

        let admission = coordinator.admit("abc", "fp-1").await.unwrap();
        match admission {
            Admission::Hit(response) => {
                assert_eq!(response.status, 200);
                assert_eq!(response.body, json!({"id": 1}));
            }
            other => panic!("expected Hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mismatch_detail() {
        let mut coordinator = coordinator(EngineOptions::default());

        coordinator.admit("abc", "fp-1").await.unwrap();
        let admission = coordinator.admit("abc", "fp-2").await.unwrap();
        match admission {
            Admission::Mismatch(problem) => {
                assert_eq!(problem.status, 400);
                assert!(problem.detail.contains("abc"));
            }
            other => panic!("expected Mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lock_timeout_error_with_multibyte_key() {
        let cache = AccessCache::lockable(Arc::new(InMemoryCache::new()));
        let mut owner = Coordinator::new(EngineOptions::default(), cache.clone());
        owner.admit("платёж-2026-0042", "fp-1").await.unwrap();

        let options = EngineOptions {
            lock_timeout: LockTimeout::Disabled,
            ..Default::default()
        };
        let mut waiter = Coordinator::new(options, cache);
        let err = waiter.admit("платёж-2026-0042", "fp-1").await.unwrap_err();
        assert!(matches!(err, EngineError::LockAcquisition(_)));
    }

    #[tokio::test]
    async fn test_cancel_frees_key() {
        let mut coordinator = coordinator(EngineOptions::default());

        coordinator.admit("abc", "fp-1").await.unwrap();
        coordinator.cancel().await.unwrap();

        let admission = coordinator.admit("abc", "fp-1").await.unwrap();
        assert!(matches!(admission, Admission::Miss));
    }
}
