use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::record::ResultShape;

/// How long `admit` may wait on the per-key lock (and on an in-flight
/// record) before failing with a lock acquisition error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "seconds", rename_all = "snake_case")]
pub enum LockTimeout {
    /// Wait up to the given number of seconds.
    Wait(u64),
    /// No waiting and no native locking: a held lock or an in-flight
    /// record fails immediately.
    Disabled,
}

impl LockTimeout {
    pub fn duration(&self) -> Option<Duration> {
        match self {
            LockTimeout::Wait(seconds) => Some(Duration::from_secs(*seconds)),
            LockTimeout::Disabled => None,
        }
    }
}

/// What `Coordinator::execute` does when the lock cannot be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockFailurePolicy {
    /// Propagate the lock failure to the host.
    Fatal,
    /// Run the handler without idempotency protection; nothing is cached.
    ExecuteUnprotected,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// TTL for completed records, in seconds.
    #[serde(default = "default_expiry_seconds")]
    pub expiry_seconds: u64,
    /// Request header carrying the idempotency key.
    #[serde(default = "default_header_key_name")]
    pub header_key_name: String,
    /// Prefix prepended to cache keys.
    #[serde(default = "default_cache_key_prefix")]
    pub cache_key_prefix: String,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: LockTimeout,
    /// When true, only 2xx results are cached; other results leave the
    /// key retryable.
    #[serde(default = "default_true")]
    pub cache_only_success_responses: bool,
    /// When true, requests without a key bypass the engine entirely.
    #[serde(default)]
    pub is_optional: bool,
    /// When true, key validation failures carry an RFC 7807 payload.
    #[serde(default)]
    pub use_structured_error_for_validation: bool,
    /// Result shapes that are never captured or replayed.
    #[serde(default)]
    pub excluded_result_kinds: Vec<ResultShape>,
    #[serde(default = "default_lock_failure_policy")]
    pub lock_failure_policy: LockFailurePolicy,
}

fn default_expiry_seconds() -> u64 {
    3600
}

fn default_header_key_name() -> String {
    "IdempotencyKey".to_string()
}

fn default_cache_key_prefix() -> String {
    "idem".to_string()
}

fn default_lock_timeout() -> LockTimeout {
    LockTimeout::Wait(10)
}

fn default_true() -> bool {
    true
}

fn default_lock_failure_policy() -> LockFailurePolicy {
    LockFailurePolicy::Fatal
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            expiry_seconds: default_expiry_seconds(),
            header_key_name: default_header_key_name(),
            cache_key_prefix: default_cache_key_prefix(),
            lock_timeout: default_lock_timeout(),
            cache_only_success_responses: true,
            is_optional: false,
            use_structured_error_for_validation: false,
            excluded_result_kinds: Vec::new(),
            lock_failure_policy: LockFailurePolicy::Fatal,
        }
    }
}

impl EngineOptions {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_seconds)
    }

    pub fn is_excluded(&self, shape: ResultShape) -> bool {
        self.excluded_result_kinds.contains(&shape)
    }
}

/// Top-level settings bound from files and environment.
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineOptions,
    pub redis: Option<RedisSettings>,
}

#[derive(Debug, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("IDEM").separator("__"));

        builder.build()?.try_deserialize()
    }
}
