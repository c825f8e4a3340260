//! Client and wire types for the Gemini `generateContent` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::GeminiConfig;

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "cooking-companion-api/1.0";
const API_KEY_HEADER: &str = "x-goog-api-key";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("{0}")]
    Request(String),
    #[error("the model service did not answer in time")]
    Timeout,
    #[error("the model service returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("could not read the model response: {0}")]
    Decode(String),
    #[error("the model returned no text")]
    NoContent,
    #[error("the prompt was blocked by the model service ({0})")]
    Blocked(String),
}

// ── Request types ────────────────────────────────────────────────────────────

/// One `generateContent` call. The model is part of the URL, not the body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerateRequest {
    #[serde(skip)]
    pub model: String,
    pub contents: Vec<Content>,
}

impl GenerateRequest {
    /// A single user turn made of `parts`.
    pub fn user(model: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            model: model.into(),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
        }
    }

    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.contents.iter().flat_map(|c| c.parts.iter())
    }
}

/// Content container shared by requests and responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A content fragment. Exactly one field is set on parts we build; parts we
/// receive may carry kinds we don't read, which leave all three empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Reference to a remote file (e.g. a YouTube link) by URI.
    pub fn file_uri(uri: impl Into<String>) -> Self {
        Self {
            file_data: Some(FileData {
                file_uri: uri.into(),
                mime_type: None,
            }),
            ..Self::default()
        }
    }

    /// Raw bytes sent inline; `data` is base64-encoded here.
    pub fn inline(mime_type: impl Into<String>, data: &[u8]) -> Self {
        use base64::Engine as _;
        Self {
            inline_data: Some(Blob {
                mime_type: mime_type.into(),
                data: base64::engine::general_purpose::STANDARD.encode(data),
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub file_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn first_candidate_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }

    /// The first text segment of the first candidate.
    pub fn first_text(&self) -> Result<&str, GenerationError> {
        self.first_candidate_parts()
            .iter()
            .find_map(|p| p.text.as_deref())
            .ok_or_else(|| self.missing_text())
    }

    /// Every text segment of the first candidate, joined in order.
    pub fn text(&self) -> Result<String, GenerationError> {
        let mut texts = self
            .first_candidate_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .peekable();
        if texts.peek().is_none() {
            return Err(self.missing_text());
        }
        Ok(texts.collect())
    }

    fn missing_text(&self) -> GenerationError {
        match self.block_reason() {
            Some(reason) => GenerationError::Blocked(reason.to_string()),
            None => GenerationError::NoContent,
        }
    }

    pub fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// ── Generator seam ───────────────────────────────────────────────────────────

/// Anything that can answer a [`GenerateRequest`].
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateContentResponse, GenerationError>;
}

// ── HTTP client ──────────────────────────────────────────────────────────────

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self, GenerationError> {
        let http = reqwest::ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GenerationError::Request(e.without_url().to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.as_str().trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateContentResponse, GenerationError> {
        tracing::debug!(
            model = %request.model,
            parts = request.parts().count(),
            "calling generateContent"
        );

        let response = self
            .http
            .post(self.endpoint(&request.model))
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| {
                    status
                        .canonical_reason()
                        .unwrap_or("unknown error")
                        .to_string()
                });
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::Decode(e.without_url().to_string())
            }
        })?;

        if let Some(reason) = parsed.block_reason() {
            tracing::warn!(reason, "prompt was blocked by the model service");
        }
        Ok(parsed)
    }
}

// Errors are stripped of their URL before they can reach a user.
fn classify_transport_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout
    } else if e.is_connect() {
        GenerationError::Request(format!("ConnectError: {}", e.without_url()))
    } else {
        GenerationError::Request(format!("RequestError: {}", e.without_url()))
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};

    use super::testing::text_response;
    use super::*;

    #[derive(Default, Clone)]
    struct Seen {
        inner: Arc<Mutex<Option<(String, Option<String>, Value)>>>,
    }

    async fn spawn_fake(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/v1beta")).unwrap()
    }

    fn config(base_url: Url, timeout: Duration) -> GeminiConfig {
        GeminiConfig {
            api_key: "test-key".to_string(),
            model: "gemini-2.0-flash".to_string(),
            base_url,
            timeout,
            connect_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn request_serializes_to_wire_shape() {
        let request = GenerateRequest::user(
            "gemini-2.0-flash",
            vec![
                Part::text("describe"),
                Part::file_uri("https://youtu.be/abc123"),
                Part::inline("image/png", b"png"),
            ],
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"text": "describe"},
                        {"fileData": {"fileUri": "https://youtu.be/abc123"}},
                        {"inlineData": {"mimeType": "image/png", "data": "cG5n"}}
                    ]
                }]
            })
        );
    }

    #[test]
    fn response_parses_service_json() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"text": "Boil pasta."}, {"text": " Drain."}]
                },
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {"totalTokenCount": 12},
            "modelVersion": "gemini-2.0-flash"
        });
        let response: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.first_text().unwrap(), "Boil pasta.");
        assert_eq!(response.text().unwrap(), "Boil pasta. Drain.");
    }

    #[test]
    fn first_text_skips_parts_without_text() {
        let response = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: None,
                    parts: vec![Part::file_uri("gs://x"), Part::text("hello")],
                }),
                finish_reason: None,
            }],
            prompt_feedback: None,
        };
        assert_eq!(response.first_text().unwrap(), "hello");
    }

    #[test]
    fn empty_candidates_is_no_content() {
        let response = GenerateContentResponse::default();
        assert_eq!(response.first_text(), Err(GenerationError::NoContent));
        assert_eq!(response.text(), Err(GenerationError::NoContent));
    }

    #[test]
    fn candidate_without_content_is_no_content() {
        let raw = json!({"candidates": [{"finishReason": "SAFETY"}]});
        let response: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.first_text(), Err(GenerationError::NoContent));
    }

    #[test]
    fn blocked_prompt_exposes_reason() {
        let raw = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let response: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.block_reason(), Some("SAFETY"));
        assert_eq!(
            response.first_text(),
            Err(GenerationError::Blocked("SAFETY".to_string()))
        );
        assert_eq!(
            response.text(),
            Err(GenerationError::Blocked("SAFETY".to_string()))
        );
    }

    #[tokio::test]
    async fn client_posts_to_model_endpoint_with_key_header() {
        async fn handler(
            State(seen): State<Seen>,
            Path(action): Path<String>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> Json<GenerateContentResponse> {
            let key = headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            *seen.inner.lock().unwrap() = Some((action, key, body));
            Json(text_response(&["Boil pasta for 8 minutes."]))
        }

        let seen = Seen::default();
        let router = Router::new()
            .route("/v1beta/models/:action", post(handler))
            .with_state(seen.clone());
        let base = spawn_fake(router).await;

        let client = GeminiClient::new(&config(base, Duration::from_secs(5))).unwrap();
        let request = GenerateRequest::user(
            "gemini-2.0-flash",
            vec![Part::text("hi"), Part::file_uri("https://youtu.be/abc123")],
        );
        let response = client.generate(&request).await.unwrap();
        assert_eq!(response.first_text().unwrap(), "Boil pasta for 8 minutes.");

        let (action, key, body) = seen.inner.lock().unwrap().clone().unwrap();
        assert_eq!(action, "gemini-2.0-flash:generateContent");
        assert_eq!(key.as_deref(), Some("test-key"));
        assert_eq!(
            body["contents"][0]["parts"][1]["fileData"]["fileUri"],
            "https://youtu.be/abc123"
        );
    }

    #[tokio::test]
    async fn client_surfaces_upstream_error_message() {
        async fn handler() -> impl IntoResponse {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": {
                        "code": 400,
                        "message": "API key not valid. Please pass a valid API key.",
                        "status": "INVALID_ARGUMENT"
                    }
                })),
            )
        }

        let router = Router::new().route("/v1beta/models/:action", post(handler));
        let base = spawn_fake(router).await;
        let client = GeminiClient::new(&config(base, Duration::from_secs(5))).unwrap();

        let err = client
            .generate(&GenerateRequest::user("m", vec![Part::text("x")]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::Upstream {
                status: 400,
                message: "API key not valid. Please pass a valid API key.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn client_falls_back_to_status_reason_for_opaque_errors() {
        async fn handler() -> impl IntoResponse {
            (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
        }

        let router = Router::new().route("/v1beta/models/:action", post(handler));
        let base = spawn_fake(router).await;
        let client = GeminiClient::new(&config(base, Duration::from_secs(5))).unwrap();

        let err = client
            .generate(&GenerateRequest::user("m", vec![Part::text("x")]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::Upstream {
                status: 503,
                message: "Service Unavailable".to_string()
            }
        );
    }

    #[tokio::test]
    async fn client_times_out() {
        async fn handler() -> Json<GenerateContentResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(GenerateContentResponse::default())
        }

        let router = Router::new().route("/v1beta/models/:action", post(handler));
        let base = spawn_fake(router).await;
        let client = GeminiClient::new(&config(base, Duration::from_millis(200))).unwrap();

        let err = client
            .generate(&GenerateRequest::user("m", vec![Part::text("x")]))
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::Timeout);
    }

    #[tokio::test]
    async fn connect_errors_do_not_leak_key_or_url() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{addr}/v1beta")).unwrap();
        let client = GeminiClient::new(&config(base, Duration::from_secs(2))).unwrap();

        let err = client
            .generate(&GenerateRequest::user("m", vec![Part::text("x")]))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, GenerationError::Request(_)));
        assert!(message.starts_with("ConnectError"));
        assert!(!message.contains("test-key"));
        assert!(!message.contains("generateContent"));
    }
}
