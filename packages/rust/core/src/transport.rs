//! Outbound call to the Gemini `generateContent` endpoint.
//!
//! The pipeline talks to a [`Transport`]; [`GeminiTransport`] is the real
//! HTTP implementation, tests substitute a scripted fake.

use std::future::Future;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use chatbox_shared::{ChatBoxError, GeminiConfig, Query, Result};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("ChatBox/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body kept for logging.
const MAX_ERROR_BODY: usize = 500;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// `generateContent` request body.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

impl GenerateContentRequest {
    /// A single-turn request carrying `query` as its only text part.
    pub fn single_turn(query: &Query) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(query.as_str().to_string()),
                }],
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// `generateContent` response body. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

impl GenerateContentResponse {
    /// Text of the first part of the first candidate, if there is one.
    pub fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
    }

    /// Build a one-candidate response. Used by fakes and fixtures.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(Content {
                    parts: vec![Part {
                        text: Some(text.into()),
                    }],
                }),
            }],
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Why a single request to the answering service failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The service answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Network(String),

    /// The response body was not the expected JSON.
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// HTTP 429, the only retryable condition.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS.as_u16())
    }
}

/// One request/response exchange with the answering service.
pub trait Transport: Send + Sync {
    fn generate(
        &self,
        query: &Query,
    ) -> impl Future<Output = std::result::Result<GenerateContentResponse, TransportError>> + Send;
}

/// HTTP transport for `POST {base_url}/models/{model}:generateContent?key=...`.
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl GeminiTransport {
    pub fn new(config: &GeminiConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ChatBoxError::Network(format!("failed to build HTTP client: {e}")))?;

        let endpoint = format!(
            "{}/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        );

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for GeminiTransport {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn generate(
        &self,
        query: &Query,
    ) -> std::result::Result<GenerateContentResponse, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&GenerateContentRequest::single_turn(query))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.without_url().to_string()))?;
        debug!(bytes = body.len(), "response received");

        serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> GeminiConfig {
        GeminiConfig {
            base_url: server.uri(),
            ..GeminiConfig::default()
        }
    }

    #[test]
    fn request_body_shape() {
        let req = GenerateContentRequest::single_turn(&Query::new("2+2?").unwrap());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"contents": [{"parts": [{"text": "2+2?"}]}]})
        );
    }

    #[test]
    fn first_text_of_first_candidate() {
        let json = r#"{"candidates":[
            {"content":{"parts":[{"text":"4"},{"text":"ignored"}],"role":"model"},"finishReason":"STOP"},
            {"content":{"parts":[{"text":"other"}]}}
        ],"usageMetadata":{"totalTokenCount":7}}"#;
        let resp: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.first_text(), Some("4"));
    }

    #[test]
    fn missing_candidates_yield_no_text() {
        let resp: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.first_text().is_none());

        let resp: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(resp.first_text().is_none());
    }

    #[test]
    fn only_429_is_rate_limited() {
        let limited = TransportError::Status {
            status: 429,
            body: String::new(),
        };
        let server = TransportError::Status {
            status: 500,
            body: String::new(),
        };
        assert!(limited.is_rate_limited());
        assert!(!server.is_rate_limited());
        assert!(!TransportError::Network("reset".into()).is_rate_limited());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let out = truncate("ééééé", 3);
        assert!(out.starts_with('é'));
        assert!(out.ends_with('…'));
    }

    #[tokio::test]
    async fn posts_query_with_key_param() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .and(body_json(
                serde_json::json!({"contents": [{"parts": [{"text": "2+2?"}]}]}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "4"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = GeminiTransport::new(&config_for(&server), "test-key").unwrap();
        let resp = transport
            .generate(&Query::new("2+2?").unwrap())
            .await
            .expect("successful response");
        assert_eq!(resp.first_text(), Some("4"));
    }

    #[tokio::test]
    async fn rate_limit_status_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exhausted"))
            .mount(&server)
            .await;

        let transport = GeminiTransport::new(&config_for(&server), "k").unwrap();
        let err = transport
            .generate(&Query::new("hello").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("quota exhausted"));
    }

    #[tokio::test]
    async fn server_error_is_not_rate_limited() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = GeminiTransport::new(&config_for(&server), "k").unwrap();
        let err = transport
            .generate(&Query::new("hello").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn non_json_body_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let transport = GeminiTransport::new(&config_for(&server), "k").unwrap();
        let err = transport
            .generate(&Query::new("hello").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let config = GeminiConfig {
            base_url: "https://example.test/v1beta/".into(),
            model: "m".into(),
            ..GeminiConfig::default()
        };
        let transport = GeminiTransport::new(&config, "k").unwrap();
        assert_eq!(
            transport.endpoint(),
            "https://example.test/v1beta/models/m:generateContent"
        );
    }
}
