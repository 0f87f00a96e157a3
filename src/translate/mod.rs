//! Translation core: cache key derivation, the two-tier translation cache, and the
//! client that turns `translate()` calls into retried single requests or batches.

pub mod cache;
pub mod cache_key;
pub mod client;
pub mod durable;
pub mod hybrid;
pub mod locale;
pub mod transport;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Longest source text (in chars) that is ever sent to the service.
pub const MAX_TEXT_CHARS: usize = 5000;
/// Tone hints are truncated to this many chars.
pub const MAX_TONE_CHARS: usize = 50;
/// Context hints are truncated to this many chars.
pub const MAX_CONTEXT_CHARS: usize = 500;
/// Results below this confidence are still used but logged.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.4;
/// Locale used when neither the caller, the config nor a detector supplies one.
pub const FALLBACK_LOCALE: &str = "en-US";

/// Per-call translation hints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateOptions {
    pub tone: Option<String>,
    pub context: Option<String>,
    /// Target locale. Overrides the client default and the detected locale.
    pub language: Option<String>,
}

impl TranslateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// What the service returned for one source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationOutcome {
    pub translated_text: String,
    /// Service-reported quality score in `[0, 1]`.
    pub confidence: f64,
    pub locale: String,
    pub served_from_cache: bool,
}

impl TranslationOutcome {
    pub fn is_low_confidence(&self) -> bool {
        self.confidence < LOW_CONFIDENCE_THRESHOLD
    }
}

#[derive(Debug, Error)]
pub enum TranslateError {
    /// Rejected locally, never sent over the network.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("API error: status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("retry budget of {budget_ms}ms exhausted after {attempts} attempts")]
    TimeoutBudgetExceeded { budget_ms: u64, attempts: u32 },

    #[error("no batch result for cache key {cache_key}")]
    MissingBatchResult { cache_key: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TranslateError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TranslateError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 4xx responses: the request itself is wrong, retrying will not help.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }
}

/// Truncate to at most `max` chars without splitting a code point.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub(crate) fn exceeds_limit(text: &str) -> bool {
    text.chars().nth(MAX_TEXT_CHARS).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 50), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn limit_counts_chars_not_bytes() {
        assert!(!exceeds_limit(&"a".repeat(MAX_TEXT_CHARS)));
        assert!(exceeds_limit(&"a".repeat(MAX_TEXT_CHARS + 1)));
        // 5000 two-byte chars is still within the limit.
        assert!(!exceeds_limit(&"é".repeat(MAX_TEXT_CHARS)));
    }

    #[test]
    fn only_4xx_counts_as_client_error() {
        let bad_request = TranslateError::Http { status: 400, message: String::new() };
        let too_many = TranslateError::Http { status: 429, message: String::new() };
        let server = TranslateError::Http { status: 503, message: String::new() };
        assert!(bad_request.is_client_error());
        assert!(too_many.is_client_error());
        assert!(!server.is_client_error());
        assert!(!TranslateError::Network("reset".into()).is_client_error());
    }
}
