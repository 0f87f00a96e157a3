//! relaytext: client-side layer for a remote text-translation API.
//! Two-tier cache (LRU + TTL in memory, optional durable store), retried single
//! requests, and time/size-windowed request batching.
//!
//! ```no_run
//! use relaytext::{ClientConfig, TranslateOptions, TranslationClient};
//!
//! # async fn demo() -> Result<(), relaytext::TranslateError> {
//! let client = TranslationClient::new(ClientConfig::from_env()?)?;
//! let options = TranslateOptions::new().with_language("fr-FR");
//! let text = client.translate("Save changes?", &options, None).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod metrics;
pub mod translate;

pub use config::{ClientConfig, ConfigError};
pub use metrics::ClientMetrics;
pub use translate::cache::{BoundedTtlCache, TranslationCache};
pub use translate::client::{CacheStats, DispatchMode, TranslationClient, TranslationClientBuilder};
pub use translate::durable::{DurableStore, InMemoryStore, SqliteStore};
pub use translate::hybrid::HybridCache;
pub use translate::locale::{FixedLocale, LocaleDetector, SystemLocaleDetector};
pub use translate::transport::{HttpTransport, Transport};
pub use translate::{TranslateError, TranslateOptions, TranslationOutcome};

/// Install a global fmt subscriber filtered by `RUST_LOG`, or `default_filter` when
/// unset. With `json`, events are emitted as JSON lines. Calling it again is a no-op.
pub fn init_tracing(default_filter: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_ok() {
        tracing::info!("relaytext tracing initialized");
    }
}
