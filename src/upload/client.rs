use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::credential::ApiKey;
use super::retry::{Backoff, RetryPolicy};
use super::transport::{PostInputsRequest, Transport, UploadResponse};
use crate::error::UploadError;
use crate::raster::EncodedAsset;

/// Default limit on the base64 image a request carries. The platform refuses
/// inputs over 25 MB; 20 MiB of base64 is about 15 MiB of JPEG.
pub const DEFAULT_MAX_ASSET_BYTES: usize = 20 * 1024 * 1024;

/// Size of `len` bytes once base64-encoded with padding.
pub fn encoded_len(len: usize) -> usize {
    base64::encoded_len(len, true).unwrap_or(usize::MAX)
}

/// What the platform should know about an asset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadContext {
    pub record_id: String,
    /// Primary concept, sent first
    pub label: String,
    pub concepts: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// Outcome of one asset upload, including how many posts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Posts made; 0 when the asset was rejected locally
    pub attempts: u32,
    pub result: Result<(), UploadError>,
}

impl UploadReport {
    pub fn is_uploaded(&self) -> bool {
        self.result.is_ok()
    }

    /// Retries beyond the first attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Posts encoded assets with retry on rate limiting and transient failures.
#[derive(Clone)]
pub struct UploadClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    max_asset_bytes: usize,
}

impl UploadClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, max_asset_bytes: usize) -> Self {
        Self {
            transport,
            policy,
            max_asset_bytes,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn max_asset_bytes(&self) -> usize {
        self.max_asset_bytes
    }

    /// Upload one asset.
    ///
    /// Never returns an error: every ending, including exhausted retries, is
    /// carried in the report. Unauthorized responses produce a systemic
    /// [`UploadError::Fatal`].
    pub async fn upload(
        &self,
        asset: &EncodedAsset,
        context: &UploadContext,
        api_key: &ApiKey,
    ) -> UploadReport {
        let encoded = encoded_len(asset.len());
        if encoded > self.max_asset_bytes {
            return UploadReport {
                attempts: 0,
                result: Err(UploadError::AssetTooLarge {
                    size: encoded,
                    limit: self.max_asset_bytes,
                }),
            };
        }

        let concepts = std::iter::once(context.label.as_str())
            .chain(context.concepts.iter().map(String::as_str));
        let request = PostInputsRequest::single(&asset.bytes, concepts, context.metadata.clone());

        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = Backoff::new(self.policy);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let (retry_after, reason) = match self.transport.post_inputs(&request, api_key).await {
                UploadResponse::Accepted => {
                    debug!(
                        record = %context.record_id,
                        attempts = attempts,
                        bytes = asset.len(),
                        "Asset accepted"
                    );
                    return UploadReport {
                        attempts,
                        result: Ok(()),
                    };
                }
                UploadResponse::Unauthorized { status, message } => {
                    return UploadReport {
                        attempts,
                        result: Err(UploadError::Fatal {
                            status,
                            message,
                            systemic: true,
                        }),
                    };
                }
                UploadResponse::Rejected { status, message } => {
                    return UploadReport {
                        attempts,
                        result: Err(UploadError::Fatal {
                            status,
                            message,
                            systemic: false,
                        }),
                    };
                }
                UploadResponse::RateLimited { retry_after } => {
                    (retry_after, "rate limited (HTTP 429)".to_string())
                }
                UploadResponse::Transient { message, .. } => (None, message),
            };

            if attempts >= max_attempts {
                return UploadReport {
                    attempts,
                    result: Err(UploadError::RetriesExhausted {
                        attempts,
                        last: reason,
                    }),
                };
            }

            if let Some(hint) = retry_after.filter(|h| *h > self.policy.max_retry_after()) {
                warn!(
                    record = %context.record_id,
                    retry_after_secs = hint.as_secs(),
                    cap_secs = self.policy.max_retry_after().as_secs(),
                    "Retry-After exceeds the cap, waiting for the cap instead"
                );
            }
            let delay = backoff.next_delay(retry_after);
            warn!(
                record = %context.record_id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Upload attempt failed, retrying: {}",
                reason
            );
            tokio::time::sleep(delay).await;
        }
    }
}
