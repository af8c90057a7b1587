//! Uploading encoded assets to the annotation platform.
//!
//! [`UploadClient`] owns the retry loop and the local size guard; the wire
//! itself sits behind the [`Transport`] trait so runs can go over HTTP,
//! be dry runs, or be scripted in tests.

mod client;
mod credential;
mod retry;
mod transport;

pub use client::{UploadClient, UploadContext, UploadReport, DEFAULT_MAX_ASSET_BYTES};
pub use credential::ApiKey;
pub use retry::{Backoff, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
pub use transport::{
    classify_response, concept_id, parse_retry_after, Concept, DryRunTransport, HttpTransport,
    ImagePayload, Input, InputData, PostInputsRequest, Transport, UploadResponse,
    DEFAULT_ENDPOINT, MAX_CONCEPT_ID_LEN, STATUS_SUCCESS,
};
