//! Translation client: cache lookup, then either a retried single request or a
//! slot in the shared batch queue. `translate()` never fails; every failure path
//! resolves to the caller's original text.
//!
//! Individual mode: up to 5 attempts with exponential backoff (100ms doubling,
//! capped at 1600ms) inside a 5s wall-clock budget. HTTP 400 is not retried.
//!
//! Batch mode: misses accumulate in one queue that flushes at 10 items or 50ms
//! after the first enqueue, whichever comes first. A flush is one batch call with
//! a single retry after 500ms (4xx is not retried). Results are matched to queued
//! items by cache key, never by position.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cache::{BoundedTtlCache, TranslationCache};
use super::cache_key;
use super::locale::LocaleDetector;
use super::transport::{
    BatchRequestBody, BatchResponseItem, HttpTransport, TranslateRequestBody, Transport,
};
use super::{
    exceeds_limit, truncate_chars, TranslateError, TranslateOptions, FALLBACK_LOCALE,
    LOW_CONFIDENCE_THRESHOLD, MAX_CONTEXT_CHARS, MAX_TEXT_CHARS, MAX_TONE_CHARS,
};
use crate::config::ClientConfig;
use crate::metrics::{metric_names, ClientMetrics};

/// Queue length that triggers an immediate flush.
pub const QUEUE_FLUSH_SIZE: usize = 10;
/// Idle time after the first enqueue before a partial batch is flushed.
pub const QUEUE_FLUSH_DELAY: Duration = Duration::from_millis(50);

const MAX_ATTEMPTS: u32 = 5;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_millis(1600);
const RETRY_BUDGET: Duration = Duration::from_millis(5000);
/// Time reserved for the request itself when clamping a backoff wait.
const REQUEST_MARGIN: Duration = Duration::from_millis(100);

const BATCH_MAX_RETRIES: u32 = 1;
const BATCH_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Observer invoked with the attempt number before every retry (1, 2, ...).
pub type RetryObserver<'a> = dyn Fn(u32) + Send + Sync + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchMode {
    Individual,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub persistent: bool,
}

/// Retry state machine for individual mode.
#[derive(Debug, Clone, PartialEq)]
enum AttemptState {
    Attempting(u32),
    Succeeded(String),
    FailedPermanent,
    FailedTimeout,
}

/// A request after locale resolution and hint truncation.
#[derive(Debug, Clone)]
struct ResolvedRequest {
    text: String,
    locale: String,
    tone: String,
    context: String,
    cache_key: String,
}

impl ResolvedRequest {
    fn body(&self) -> TranslateRequestBody {
        TranslateRequestBody {
            text: self.text.clone(),
            locale: self.locale.clone(),
            tone: self.tone.clone(),
            context: self.context.clone(),
            cache_key: self.cache_key.clone(),
        }
    }
}

/// A cache miss waiting for the next flush. The reply channel is created together
/// with the receiver the caller awaits and is consumed exactly once.
struct QueuedRequest {
    request: ResolvedRequest,
    reply: oneshot::Sender<String>,
}

struct PendingFlush {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct BatchQueue {
    pending: Vec<QueuedRequest>,
    timer: Option<PendingFlush>,
    next_timer_id: u64,
}

/// Cheap to clone; clones share the cache and the batch queue.
#[derive(Clone)]
pub struct TranslationClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    account_id: String,
    default_language: RwLock<Option<String>>,
    mode: DispatchMode,
    debug: bool,
    cache: Arc<dyn TranslationCache>,
    transport: Arc<dyn Transport>,
    locale_detector: Option<Arc<dyn LocaleDetector>>,
    queue: Mutex<BatchQueue>,
    metrics: Arc<ClientMetrics>,
}

pub struct TranslationClientBuilder {
    config: ClientConfig,
    cache: Option<Arc<dyn TranslationCache>>,
    transport: Option<Arc<dyn Transport>>,
    locale_detector: Option<Arc<dyn LocaleDetector>>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl TranslationClientBuilder {
    /// Use this cache instead of a memory-only cache sized from the config.
    pub fn cache(mut self, cache: Arc<dyn TranslationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use this transport instead of HTTP against `config.endpoint`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn locale_detector(mut self, detector: Arc<dyn LocaleDetector>) -> Self {
        self.locale_detector = Some(detector);
        self
    }

    pub fn metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<TranslationClient, TranslateError> {
        self.config.validate()?;
        let config = self.config;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config)?),
        };
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(BoundedTtlCache::new(config.cache_max_entries, config.cache_ttl()))
        });
        let mode = if config.batch_requests {
            DispatchMode::Batch
        } else {
            DispatchMode::Individual
        };

        info!(?mode, endpoint = %config.endpoint, "translation client initialized");

        Ok(TranslationClient {
            inner: Arc::new(ClientInner {
                account_id: config.account_id,
                default_language: RwLock::new(config.default_language),
                mode,
                debug: config.debug,
                cache,
                transport,
                locale_detector: self.locale_detector,
                queue: Mutex::new(BatchQueue::default()),
                metrics: self.metrics.unwrap_or_default(),
            }),
        })
    }
}

impl TranslationClient {
    pub fn builder(config: ClientConfig) -> TranslationClientBuilder {
        TranslationClientBuilder {
            config,
            cache: None,
            transport: None,
            locale_detector: None,
            metrics: None,
        }
    }

    /// HTTP transport and memory-only cache, both configured from `config`.
    pub fn new(config: ClientConfig) -> Result<Self, TranslateError> {
        Self::builder(config).build()
    }

    /// Translate `text`, returning the original text on any failure.
    ///
    /// `on_retry` is only consulted in individual mode.
    pub async fn translate(
        &self,
        text: &str,
        options: &TranslateOptions,
        on_retry: Option<&RetryObserver<'_>>,
    ) -> String {
        if text.is_empty() {
            return String::new();
        }
        if exceeds_limit(text) {
            error!(limit = MAX_TEXT_CHARS, "text exceeds character limit, returning original");
            return text.to_owned();
        }

        let inner = &self.inner;
        let request = inner.resolve(text, options);
        if inner.debug {
            debug!(
                cache_key = %request.cache_key,
                locale = %request.locale,
                tone = %request.tone,
                "attempting translation"
            );
        }

        if let Some(cached) = inner.cache.get(&request.cache_key) {
            inner.metrics.incr(metric_names::CACHE_HIT);
            if inner.debug {
                debug!(cache_key = %request.cache_key, "found translation in cache");
            }
            return cached;
        }
        inner.metrics.incr(metric_names::CACHE_MISS);

        match inner.mode {
            DispatchMode::Individual => inner.translate_individual(&request, on_retry).await,
            DispatchMode::Batch => self.enqueue(request).await,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.inner.mode
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = &self.inner.cache;
        CacheStats {
            size: cache.size(),
            max_size: cache.capacity(),
            persistent: cache.is_persistent(),
        }
    }

    /// Change the default target language without rebuilding the client.
    pub fn set_default_language(&self, language: Option<String>) {
        *self.inner.default_language.write() = language;
    }

    pub fn default_language(&self) -> Option<String> {
        self.inner.default_language.read().clone()
    }

    /// Detector result, or `en-US` when no detector is configured.
    pub fn detect_locale(&self) -> String {
        self.inner.detect_locale()
    }

    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.inner.metrics
    }

    /// Number of requests waiting for the next flush.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().pending.len()
    }

    async fn enqueue(&self, request: ResolvedRequest) -> String {
        let fallback = request.text.clone();
        let (reply, response) = oneshot::channel();

        let full_batch = {
            let mut queue = self.inner.queue.lock();
            queue.pending.push(QueuedRequest { request, reply });
            if self.inner.debug {
                debug!(queue_size = queue.pending.len(), "added to batch queue");
            }

            if queue.pending.len() >= QUEUE_FLUSH_SIZE {
                if let Some(timer) = queue.timer.take() {
                    timer.handle.abort();
                }
                Some(std::mem::take(&mut queue.pending))
            } else {
                if queue.timer.is_none() {
                    let id = queue.next_timer_id;
                    queue.next_timer_id += 1;
                    let inner = Arc::clone(&self.inner);
                    let handle = tokio::spawn(async move {
                        sleep(QUEUE_FLUSH_DELAY).await;
                        inner.flush_due(id);
                    });
                    queue.timer = Some(PendingFlush { id, handle });
                }
                None
            }
        };

        if let Some(batch) = full_batch {
            if self.inner.debug {
                debug!("batch queue full, flushing immediately");
            }
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.dispatch_batch(batch).await });
        }

        response.await.unwrap_or(fallback)
    }
}

impl ClientInner {
    fn detect_locale(&self) -> String {
        self.locale_detector
            .as_ref()
            .map(|d| d.detect_locale())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| FALLBACK_LOCALE.to_string())
    }

    fn resolve(&self, text: &str, options: &TranslateOptions) -> ResolvedRequest {
        let locale = options
            .language
            .clone()
            .filter(|l| !l.is_empty())
            .or_else(|| self.default_language.read().clone().filter(|l| !l.is_empty()))
            .unwrap_or_else(|| self.detect_locale());
        let tone = truncate_chars(options.tone.as_deref().unwrap_or(""), MAX_TONE_CHARS).to_owned();
        let context =
            truncate_chars(options.context.as_deref().unwrap_or(""), MAX_CONTEXT_CHARS).to_owned();
        let cache_key = cache_key::generate(&self.account_id, text, &locale, &context, &tone);

        ResolvedRequest {
            text: text.to_owned(),
            locale,
            tone,
            context,
            cache_key,
        }
    }

    async fn translate_individual(
        &self,
        request: &ResolvedRequest,
        on_retry: Option<&RetryObserver<'_>>,
    ) -> String {
        let started = Instant::now();
        let mut state = AttemptState::Attempting(0);
        loop {
            state = match state {
                AttemptState::Attempting(attempt) => {
                    self.attempt(request, attempt, started, on_retry).await
                }
                AttemptState::Succeeded(translated) => return translated,
                AttemptState::FailedPermanent | AttemptState::FailedTimeout => {
                    return request.text.clone()
                }
            };
        }
    }

    /// One transition out of `Attempting(attempt)`.
    async fn attempt(
        &self,
        request: &ResolvedRequest,
        attempt: u32,
        started: Instant,
        on_retry: Option<&RetryObserver<'_>>,
    ) -> AttemptState {
        if attempt > 0 {
            if started.elapsed() >= RETRY_BUDGET {
                let e = TranslateError::TimeoutBudgetExceeded {
                    budget_ms: RETRY_BUDGET.as_millis() as u64,
                    attempts: attempt,
                };
                error!(error = %e, "translation failed, returning original");
                return AttemptState::FailedTimeout;
            }
            if let Some(observer) = on_retry {
                observer(attempt);
            }
        }

        self.metrics.incr(metric_names::HTTP_CALL);
        let span = self.metrics.span(metric_names::T_TRANSLATE_REQUEST);
        let result = self.transport.translate(&request.body()).await;
        span.finish();

        let error = match result {
            Ok(response) => {
                let outcome = response.into_outcome();
                self.cache.set(&request.cache_key, outcome.translated_text.clone());
                if outcome.is_low_confidence() {
                    warn!(
                        confidence = outcome.confidence,
                        threshold = LOW_CONFIDENCE_THRESHOLD,
                        original = %request.text,
                        translated = %outcome.translated_text,
                        locale = %request.locale,
                        "low confidence translation"
                    );
                }
                if attempt > 0 {
                    info!(attempt = attempt + 1, "translation succeeded after retry");
                }
                return AttemptState::Succeeded(outcome.translated_text);
            }
            Err(e) => e,
        };

        if error.status() == Some(400) {
            error!(error = %error, "translation rejected with status 400, not retrying");
            return AttemptState::FailedPermanent;
        }

        let elapsed = started.elapsed();
        if attempt + 1 >= MAX_ATTEMPTS {
            error!(attempts = attempt + 1, error = %error, "translation failed, returning original");
            return AttemptState::FailedPermanent;
        }
        if elapsed >= RETRY_BUDGET {
            let e = TranslateError::TimeoutBudgetExceeded {
                budget_ms: RETRY_BUDGET.as_millis() as u64,
                attempts: attempt + 1,
            };
            error!(error = %e, last_error = %error, "translation failed, returning original");
            return AttemptState::FailedTimeout;
        }

        let wait = backoff_delay(attempt, elapsed);
        warn!(
            attempt = attempt + 1,
            wait_ms = wait.as_millis() as u64,
            error = %error,
            "translation attempt failed, retrying"
        );
        if !wait.is_zero() {
            sleep(wait).await;
        }
        self.metrics.incr(metric_names::RETRY);
        AttemptState::Attempting(attempt + 1)
    }

    /// Timer-triggered flush. A timer that was superseded by a size-triggered
    /// flush finds a different (or no) pending id and does nothing.
    fn flush_due(self: Arc<Self>, timer_id: u64) {
        let batch = {
            let mut queue = self.queue.lock();
            if queue.timer.as_ref().map(|t| t.id) != Some(timer_id) {
                return;
            }
            queue.timer = None;
            std::mem::take(&mut queue.pending)
        };
        if self.debug {
            debug!(batch_size = batch.len(), "flush timer fired");
        }
        tokio::spawn(async move { self.dispatch_batch(batch).await });
    }

    async fn dispatch_batch(&self, batch: Vec<QueuedRequest>) {
        if batch.is_empty() {
            if self.debug {
                debug!("queue flush called but queue is empty");
            }
            return;
        }

        let batch_id = Uuid::new_v4();
        self.metrics.incr(metric_names::BATCH_FLUSH);
        self.metrics.record(metric_names::BATCH_SIZE, batch.len() as f64);

        let mut records: Vec<TranslateRequestBody> = Vec::with_capacity(batch.len());
        for item in &batch {
            if exceeds_limit(&item.request.text) {
                error!(%batch_id, limit = MAX_TEXT_CHARS, "text exceeds character limit in batch request");
                continue;
            }
            records.push(item.request.body());
        }
        debug!(
            %batch_id,
            queued = batch.len(),
            records = records.len(),
            "flushing translation batch"
        );

        let results = if records.is_empty() {
            None
        } else {
            self.send_batch_with_retry(batch_id, BatchRequestBody { requests: records })
                .await
        };

        for item in batch {
            let QueuedRequest { request, reply } = item;
            let translated = match &results {
                Some(results) if !exceeds_limit(&request.text) => {
                    Self::pick_result(batch_id, &request, results.get(&request.cache_key))
                }
                _ => request.text.clone(),
            };

            if translated != request.text {
                self.cache.set(&request.cache_key, translated.clone());
            }
            // The caller may have gone away; nothing to do then.
            let _ = reply.send(translated);
        }
    }

    fn pick_result(batch_id: Uuid, request: &ResolvedRequest, item: Option<&BatchResponseItem>) -> String {
        match item {
            Some(BatchResponseItem { error: Some(reason), .. }) => {
                warn!(%batch_id, cache_key = %request.cache_key, %reason, "batch item failed on the server");
                request.text.clone()
            }
            Some(item) if item.translated.is_empty() => {
                warn!(%batch_id, cache_key = %request.cache_key, "batch item came back empty, returning original text");
                request.text.clone()
            }
            Some(item) => {
                if item.confidence < LOW_CONFIDENCE_THRESHOLD {
                    warn!(
                        %batch_id,
                        confidence = item.confidence,
                        original = %request.text,
                        translated = %item.translated,
                        "low confidence batch translation"
                    );
                }
                item.translated.clone()
            }
            None => {
                let e = TranslateError::MissingBatchResult {
                    cache_key: request.cache_key.clone(),
                };
                warn!(%batch_id, error = %e, "returning original text");
                request.text.clone()
            }
        }
    }

    /// Returns results keyed by cache key, or None once the batch has failed for good.
    async fn send_batch_with_retry(
        &self,
        batch_id: Uuid,
        body: BatchRequestBody,
    ) -> Option<HashMap<String, BatchResponseItem>> {
        for attempt in 0..=BATCH_MAX_RETRIES {
            self.metrics.incr(metric_names::HTTP_CALL);
            let span = self.metrics.span(metric_names::T_BATCH_REQUEST);
            let result = self.transport.translate_batch(&body).await;
            span.finish();

            match result {
                Ok(response) => {
                    return Some(
                        response
                            .responses
                            .into_iter()
                            .map(|item| (item.cache_key.clone(), item))
                            .collect(),
                    );
                }
                Err(e) if e.is_client_error() => {
                    warn!(%batch_id, error = %e, "batch rejected with client error, not retrying");
                    return None;
                }
                Err(e) if attempt == BATCH_MAX_RETRIES => {
                    error!(
                        %batch_id,
                        attempts = attempt + 1,
                        error = %e,
                        "batch translation failed, returning original text for all"
                    );
                    return None;
                }
                Err(e) => {
                    warn!(
                        %batch_id,
                        wait_ms = BATCH_RETRY_DELAY.as_millis() as u64,
                        error = %e,
                        "batch translation failed, retrying"
                    );
                    self.metrics.incr(metric_names::RETRY);
                    sleep(BATCH_RETRY_DELAY).await;
                }
            }
        }
        None
    }
}

/// `min(100ms * 2^attempt, 1600ms)`, clamped so the wait plus a request margin
/// stays inside the retry budget.
fn backoff_delay(attempt: u32, elapsed: Duration) -> Duration {
    let exponential = BASE_RETRY_DELAY.saturating_mul(1u32 << attempt.min(16));
    let remaining = RETRY_BUDGET.saturating_sub(elapsed).saturating_sub(REQUEST_MARGIN);
    exponential.min(MAX_RETRY_DELAY).min(remaining)
}
