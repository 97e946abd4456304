//! HTTP client for a Gemini-style `generateContent` endpoint that turns a
//! predicted disease into a short plain-language explanation.
//!
//! The explanation is auxiliary: [`Explainer::explain`] never fails, it
//! substitutes [`FALLBACK_EXPLANATION`] and logs instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Returned in place of a generated explanation when the service is unusable.
pub const FALLBACK_EXPLANATION: &str =
    "An explanation is not available right now. Please consult a healthcare professional \
     for more information about this condition.";

#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response contained no text")]
    EmptyResponse,
}

#[derive(Debug, Clone)]
pub struct ExplainConfig {
    /// Like `https://generativelanguage.googleapis.com` (a trailing slash is tolerated).
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ExplainConfig {
    /// Public endpoint and default model for `api_key`.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// The fixed prompt sent for `disease`.
pub fn prompt(disease: &str) -> String {
    format!(
        "Explain in simple, non-technical language what {disease} is, its common symptoms, \
         and when a person should see a doctor. Keep the answer under 150 words."
    )
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Text of the first candidate, parts concatenated.
fn first_candidate_text(body: &str) -> Result<String, ExplainError> {
    let response: GenerateResponse = serde_json::from_str(body)?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ExplainError::EmptyResponse);
    }
    Ok(text)
}

/// Client for the explanation service. Cheap to clone.
#[derive(Clone)]
pub struct Explainer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl Explainer {
    pub fn new(config: ExplainConfig) -> Result<Self, ExplainError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        );
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Explanation for `disease`, or [`FALLBACK_EXPLANATION`] on any failure.
    pub async fn explain(&self, disease: &str) -> String {
        match self.try_explain(disease).await {
            Ok(text) => text,
            Err(e) => {
                warn!(disease, error = %e, "explanation unavailable, using fallback");
                FALLBACK_EXPLANATION.to_string()
            }
        }
    }

    /// Single attempt, no retries.
    pub async fn try_explain(&self, disease: &str) -> Result<String, ExplainError> {
        let prompt = prompt(disease);
        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: &prompt }],
            }],
        };

        debug!(endpoint = %self.endpoint, disease, "requesting explanation");
        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ExplainError::Server {
                status: status.as_u16(),
                body,
            });
        }
        first_candidate_text(&body)
    }
}

impl std::fmt::Debug for Explainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Explainer")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer exactly one HTTP request with `status` and `body`; yields the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
                    let body_len = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + body_len {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn explainer(base_url: String) -> Explainer {
        Explainer::new(ExplainConfig {
            base_url,
            model: "gemini-test".into(),
            api_key: "test-key".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn prompt_names_the_disease() {
        let p = prompt("Influenza");
        assert!(p.contains("Influenza"));
        assert!(p.contains("doctor"));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let e = explainer("http://localhost:8080/".into());
        assert_eq!(
            e.endpoint(),
            "http://localhost:8080/v1beta/models/gemini-test:generateContent"
        );
    }

    #[test]
    fn default_config_points_at_public_api() {
        let config = ExplainConfig::new("k");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn request_body_shape() {
        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: "hello" }],
            }],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"contents": [{"parts": [{"text": "hello"}]}]})
        );
    }

    #[test]
    fn parses_first_candidate() {
        let body = r#"{"candidates": [
            {"content": {"parts": [{"text": "Influenza is "}, {"text": "a viral infection."}]}},
            {"content": {"parts": [{"text": "ignored"}]}}
        ]}"#;
        assert_eq!(
            first_candidate_text(body).unwrap(),
            "Influenza is a viral infection."
        );
    }

    #[test]
    fn empty_candidates_are_an_error() {
        for body in [
            r#"{"candidates": []}"#,
            r#"{}"#,
            r#"{"candidates": [{"finishReason": "SAFETY"}]}"#,
            r#"{"candidates": [{"content": {"parts": [{"text": "  "}]}}]}"#,
        ] {
            assert!(
                matches!(first_candidate_text(body), Err(ExplainError::EmptyResponse)),
                "{body}"
            );
        }
        assert!(matches!(
            first_candidate_text("<html>"),
            Err(ExplainError::Json(_))
        ));
    }

    #[tokio::test]
    async fn returns_generated_text() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"candidates": [{"content": {"parts": [{"text": "Asthma narrows the airways."}]}}]}"#,
        )
        .await;
        let text = explainer(url).explain("Asthma").await;
        assert_eq!(text, "Asthma narrows the airways.");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1beta/models/gemini-test:generateContent"));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
        assert!(request.contains("Asthma"));
    }

    #[tokio::test]
    async fn server_error_falls_back() {
        let (url, server) =
            serve_once("503 Service Unavailable", r#"{"error": "overloaded"}"#).await;
        let e = explainer(url);
        assert_eq!(e.explain("Asthma").await, FALLBACK_EXPLANATION);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_error_keeps_status() {
        let (url, _server) = serve_once("429 Too Many Requests", r#"{"error": "quota"}"#).await;
        match explainer(url).try_explain("Asthma").await {
            Err(ExplainError::Server { status, body }) => {
                assert_eq!(status, 429);
                assert!(body.contains("quota"));
            }
            other => panic!("expected Server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_service_falls_back() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let text = explainer(format!("http://127.0.0.1:{port}"))
            .explain("Asthma")
            .await;
        assert_eq!(text, FALLBACK_EXPLANATION);
    }
}
