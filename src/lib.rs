pub mod cache;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod observability;
pub mod record;
pub mod validator;

pub use crate::cache::AccessCache;
pub use crate::config::{EngineOptions, LockFailurePolicy, LockTimeout};
pub use crate::coordinator::{Admission, Coordinator};
pub use crate::error::{EngineError, ProblemDetails, Result};
pub use crate::fingerprint::{BufferedBody, Fingerprinter, RawBody};
pub use crate::record::{CacheRecord, CachedResponse, HandlerResult, ResultShape};
pub use crate::validator::{KeyLookup, KeyValidator};
