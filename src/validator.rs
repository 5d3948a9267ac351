use http::HeaderMap;

use crate::config::EngineOptions;
use crate::error::{EngineError, ProblemDetails, Result};

/// Outcome of extracting the idempotency key from request metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLookup {
    /// A key was supplied; passed through unmodified. Format policy (UUID
    /// or otherwise) is caller-owned.
    Key(String),
    /// No key and the engine is optional: no fingerprinting, no caching,
    /// the handler always runs.
    Disengaged,
}

/// Extracts and validates the idempotency key from request headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValidator;

impl KeyValidator {
    pub fn extract(headers: &HeaderMap, options: &EngineOptions) -> Result<KeyLookup> {
        // A present key is passed through byte for byte; only a fully
        // empty value counts as absent.
        let value = headers
            .get(options.header_key_name.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());

        match value {
            Some(key) => Ok(KeyLookup::Key(key.to_string())),
            None if options.is_optional => Ok(KeyLookup::Disengaged),
            None => {
                let detail = format!(
                    "the '{}' header is required and must not be empty",
                    options.header_key_name
                );
                let problem = options
                    .use_structured_error_for_validation
                    .then(|| ProblemDetails::key_validation(detail.clone()));
                Err(EngineError::KeyValidation { detail, problem })
            }
        }
    }
}
