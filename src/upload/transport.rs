//! Wire format and HTTP transport for the annotation platform.
//!
//! Assets are posted as Clarifai-style `PostInputs` JSON bodies: one input
//! per request carrying the base64 image, its concepts and free-form
//! metadata.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::credential::ApiKey;

pub const DEFAULT_ENDPOINT: &str = "https://api.clarifai.com/v2/inputs";

/// Body status code the platform uses for success.
pub const STATUS_SUCCESS: u32 = 10_000;

/// The platform rejects longer concept ids.
pub const MAX_CONCEPT_ID_LEN: usize = 31;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostInputsRequest {
    pub inputs: Vec<Input>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub data: InputData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputData {
    pub image: ImagePayload,
    pub concepts: Vec<Concept>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub base64: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub value: f32,
}

impl PostInputsRequest {
    /// Single-input request. Concept ids are sanitized and deduplicated,
    /// keeping their first occurrence.
    pub fn single<I, S>(
        image: &[u8],
        concepts: I,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids: Vec<String> = Vec::new();
        for concept in concepts {
            let id = concept_id(concept.as_ref());
            if !id.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
        }

        PostInputsRequest {
            inputs: vec![Input {
                data: InputData {
                    image: ImagePayload {
                        base64: STANDARD.encode(image),
                    },
                    concepts: ids.into_iter().map(|id| Concept { id, value: 1.0 }).collect(),
                    metadata,
                },
            }],
        }
    }

    /// Total size of the encoded image payloads.
    pub fn payload_len(&self) -> usize {
        self.inputs.iter().map(|i| i.data.image.base64.len()).sum()
    }
}

/// Concept id accepted by the platform: spaces become `_`, at most
/// [`MAX_CONCEPT_ID_LEN`] characters.
pub fn concept_id(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .take(MAX_CONCEPT_ID_LEN)
        .collect()
}

/// What one post attempt came back with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResponse {
    Accepted,
    /// HTTP 429, optionally with a server-requested wait
    RateLimited { retry_after: Option<Duration> },
    /// Timeouts, 5xx and connection failures
    Transient { status: Option<u16>, message: String },
    /// 401/403: the credential itself was refused
    Unauthorized { status: u16, message: String },
    /// Any other rejection of the request
    Rejected { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    status: Option<BodyStatus>,
}

#[derive(Debug, Deserialize)]
struct BodyStatus {
    code: u32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    details: String,
}

/// Classify an HTTP response.
///
/// A 2xx response whose JSON body carries a status code other than
/// [`STATUS_SUCCESS`] is a rejection. Bodies that are not JSON are accepted
/// on 2xx.
pub fn classify_response(status: u16, retry_after: Option<Duration>, body: &str) -> UploadResponse {
    match status {
        200..=299 => match serde_json::from_str::<ResponseBody>(body) {
            Ok(ResponseBody {
                status: Some(body_status),
            }) if body_status.code != STATUS_SUCCESS => UploadResponse::Rejected {
                status,
                message: format!(
                    "platform status {}: {} {}",
                    body_status.code, body_status.description, body_status.details
                )
                .trim_end()
                .to_string(),
            },
            _ => UploadResponse::Accepted,
        },
        429 => UploadResponse::RateLimited { retry_after },
        408 | 500..=599 => UploadResponse::Transient {
            status: Some(status),
            message: format!("HTTP {status}: {}", snippet(body)),
        },
        401 | 403 => UploadResponse::Unauthorized {
            status,
            message: format!("HTTP {status}: {}", snippet(body)),
        },
        _ => UploadResponse::Rejected {
            status,
            message: format!("HTTP {status}: {}", snippet(body)),
        },
    }
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let body = body.trim();
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

/// Parse a `Retry-After` header given in seconds. HTTP dates are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Sends one request to the platform. Network failures are reported as
/// [`UploadResponse::Transient`], never as errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_inputs(&self, request: &PostInputsRequest, api_key: &ApiKey) -> UploadResponse;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wsi-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_inputs(&self, request: &PostInputsRequest, api_key: &ApiKey) -> UploadResponse {
        let response = match self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, api_key.authorization())
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Upload request did not complete");
                return UploadResponse::Transient {
                    status: e.status().map(|s| s.as_u16()),
                    message: e.to_string(),
                };
            }
        };

        let status = response.status();
        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
        } else {
            None
        };

        match response.text().await {
            Ok(body) => classify_response(status.as_u16(), retry_after, &body),
            Err(e) if status.is_success() => UploadResponse::Transient {
                status: Some(status.as_u16()),
                message: format!("failed to read response body: {e}"),
            },
            Err(_) => classify_response(status.as_u16(), retry_after, ""),
        }
    }
}

/// Transport for `--dry-run`: accepts everything without touching the
/// network and counts what would have been sent.
#[derive(Debug, Default)]
pub struct DryRunTransport {
    requests: AtomicUsize,
    bytes: AtomicUsize,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Base64 payload bytes that would have been sent.
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    async fn post_inputs(&self, request: &PostInputsRequest, _api_key: &ApiKey) -> UploadResponse {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(request.payload_len(), Ordering::Relaxed);
        let concepts: Vec<&str> = request
            .inputs
            .iter()
            .flat_map(|i| i.data.concepts.iter().map(|c| c.id.as_str()))
            .collect();
        info!(
            payload_bytes = request.payload_len(),
            "Dry run: would upload with concepts {:?}",
            concepts
        );
        UploadResponse::Accepted
    }
}
