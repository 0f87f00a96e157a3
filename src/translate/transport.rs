//! Wire format and HTTP transport for the translation API.
//! `POST /api/v1/translate` for single texts, `POST /api/v1/translate_batch` for
//! coalesced requests. Any non-2xx status is an error carrying the status code.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{TranslateError, TranslationOutcome};
use crate::config::ClientConfig;

pub const TRANSLATE_PATH: &str = "/api/v1/translate";
pub const TRANSLATE_BATCH_PATH: &str = "/api/v1/translate_batch";

/// One text to translate, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateRequestBody {
    pub text: String,
    pub locale: String,
    pub tone: String,
    pub context: String,
    pub cache_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateResponseBody {
    pub translated: String,
    pub locale: String,
    #[serde(default)]
    pub cached: bool,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

impl TranslateResponseBody {
    pub fn into_outcome(self) -> TranslationOutcome {
        TranslationOutcome {
            translated_text: self.translated,
            confidence: self.confidence,
            locale: self.locale,
            served_from_cache: self.cached,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequestBody {
    pub requests: Vec<TranslateRequestBody>,
}

/// Batch results. Order is not guaranteed to match the request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponseBody {
    pub responses: Vec<BatchResponseItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponseItem {
    pub cache_key: String,
    #[serde(default)]
    pub translated: String,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub cached: Option<bool>,
    /// Per-item failure reported by the service.
    #[serde(default)]
    pub error: Option<String>,
}

fn full_confidence() -> f64 {
    1.0
}

/// Network seam of the client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn translate(&self, request: &TranslateRequestBody) -> Result<TranslateResponseBody, TranslateError>;
    async fn translate_batch(&self, request: &BatchRequestBody) -> Result<BatchResponseBody, TranslateError>;
}

/// reqwest-backed transport. Connection pooling is handled by the shared client.
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    account_id: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            account_id: config.account_id.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, TranslateError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{}", self.endpoint, path))
            .header("X-API-Key", &self.api_key)
            .header("X-Customer-ID", &self.account_id)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslateError::Network(format!("request timed out: {e}"))
                } else {
                    TranslateError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(TranslateError::Http {
                status: status.as_u16(),
                message: body_text.chars().take(200).collect(),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| TranslateError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn translate(&self, request: &TranslateRequestBody) -> Result<TranslateResponseBody, TranslateError> {
        self.post_json(TRANSLATE_PATH, request).await
    }

    async fn translate_batch(&self, request: &BatchRequestBody) -> Result<BatchResponseBody, TranslateError> {
        self.post_json(TRANSLATE_BATCH_PATH, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_snake_case_cache_key() {
        let body = TranslateRequestBody {
            text: "Hello".into(),
            locale: "fr-FR".into(),
            tone: "casual".into(),
            context: String::new(),
            cache_key: "abc".into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "text": "Hello",
                "locale": "fr-FR",
                "tone": "casual",
                "context": "",
                "cache_key": "abc"
            })
        );
    }

    #[test]
    fn single_response_decodes() {
        let body: TranslateResponseBody = serde_json::from_str(
            r#"{"translated":"Bonjour","locale":"fr-FR","cached":true,"confidence":0.92}"#,
        )
        .unwrap();
        let outcome = body.into_outcome();
        assert_eq!(outcome.translated_text, "Bonjour");
        assert!(outcome.served_from_cache);
        assert!(!outcome.is_low_confidence());
    }

    #[test]
    fn batch_response_tolerates_optional_fields() {
        let body: BatchResponseBody = serde_json::from_str(
            r#"{"responses":[
                {"cache_key":"k2","translated":"Zwei","confidence":0.3},
                {"cache_key":"k1","translated":"Eins","confidence":0.9,"cached":true},
                {"cache_key":"k3","error":"unsupported locale"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(body.responses.len(), 3);
        assert_eq!(body.responses[0].cache_key, "k2");
        assert_eq!(body.responses[1].cached, Some(true));
        assert_eq!(body.responses[2].error.as_deref(), Some("unsupported locale"));
        assert_eq!(body.responses[2].translated, "");
    }

    #[test]
    fn http_transport_trims_trailing_slash() {
        let mut config = ClientConfig::new("key", "acct");
        config.endpoint = "https://translate.example.com/".into();
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.endpoint(), "https://translate.example.com");
    }
}
