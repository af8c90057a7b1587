//! Upload client retry timing and the HTTP transport against a local server.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use wsi_ingest::error::UploadError;
use wsi_ingest::raster::EncodedAsset;
use wsi_ingest::upload::{
    HttpTransport, PostInputsRequest, RetryPolicy, Transport, UploadClient, UploadContext,
    UploadResponse,
};

use super::test_utils::{api_key, RecordingTransport};

fn asset() -> EncodedAsset {
    EncodedAsset {
        bytes: Bytes::from_static(b"\xFF\xD8fake\xFF\xD9"),
        mime_type: "image/jpeg",
        width: 1,
        height: 1,
    }
}

fn context() -> UploadContext {
    UploadContext {
        record_id: "TCGA-AA-0001".to_string(),
        label: "tumor".to_string(),
        concepts: vec!["lung adenocarcinoma".to_string()],
        ..Default::default()
    }
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(5),
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_then_uploaded() {
    const K: usize = 4;
    let transport = RecordingTransport::scripted(vec![
        UploadResponse::RateLimited { retry_after: None };
        K
    ]);
    let client = UploadClient::new(transport.clone(), policy(10), 1024);

    let report = client.upload(&asset(), &context(), &api_key()).await;
    assert!(report.is_uploaded());
    assert_eq!(report.retries(), K as u32);

    let calls = transport.calls();
    assert_eq!(calls.len(), K + 1);
    let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].at - w[0].at).collect();
    for pair in gaps.windows(2) {
        assert!(pair[1] >= pair[0], "delays decreased: {gaps:?}");
    }
    // equal jitter keeps each delay within [exp/2, exp]
    for (retry, gap) in gaps.iter().enumerate() {
        let exponential = policy(10).exponential(retry as u32 + 1);
        assert!(*gap >= exponential / 2);
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_honored() {
    let transport = RecordingTransport::scripted(vec![UploadResponse::RateLimited {
        retry_after: Some(Duration::from_secs(7)),
    }]);
    let client = UploadClient::new(transport.clone(), policy(3), 1024);

    let report = client.upload(&asset(), &context(), &api_key()).await;
    assert!(report.is_uploaded());
    let calls = transport.calls();
    assert!(calls[1].at - calls[0].at >= Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_attempts() {
    let transport = RecordingTransport::always(UploadResponse::Transient {
        status: Some(502),
        message: "bad gateway".to_string(),
    });
    let client = UploadClient::new(transport.clone(), policy(3), 1024);

    let report = client.upload(&asset(), &context(), &api_key()).await;
    assert_eq!(transport.call_count(), 3);
    match report.result {
        Err(UploadError::RetriesExhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert!(last.contains("bad gateway"));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_request_carries_label_concepts() {
    let transport = RecordingTransport::accepting();
    let client = UploadClient::new(transport.clone(), policy(1), 1024);
    client.upload(&asset(), &context(), &api_key()).await;

    let calls = transport.calls();
    assert_eq!(calls[0].concepts(), vec!["tumor", "lung_adenocarcinoma"]);
}

/// Serves one canned HTTP response per connection and returns the raw
/// requests it saw.
async fn serve(responses: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/v2/inputs", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || complete(&request) {
                    break;
                }
            }
            seen.push(String::from_utf8_lossy(&request).to_string());
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
        seen
    });
    (url, handle)
}

fn complete(request: &[u8]) -> bool {
    let text = String::from_utf8_lossy(request);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    request.len() >= header_end + 4 + length
}

#[tokio::test]
async fn test_http_transport_classifies_responses() {
    let (url, server) = serve(vec![
        "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 3\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        "HTTP/1.1 401 Unauthorized\r\nContent-Length: 11\r\nConnection: close\r\n\r\nbad api key",
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 44\r\nConnection: close\r\n\r\n{\"status\":{\"code\":10000,\"description\":\"Ok\"}}",
    ])
    .await;

    let transport = HttpTransport::new(url, Duration::from_secs(5)).unwrap();
    let request = PostInputsRequest::single(b"jpeg", ["tumor"], serde_json::Map::new());
    let key = api_key();

    assert_eq!(
        transport.post_inputs(&request, &key).await,
        UploadResponse::RateLimited {
            retry_after: Some(Duration::from_secs(3))
        }
    );
    assert!(matches!(
        transport.post_inputs(&request, &key).await,
        UploadResponse::Unauthorized { status: 401, .. }
    ));
    assert_eq!(transport.post_inputs(&request, &key).await, UploadResponse::Accepted);

    let seen = server.await.unwrap();
    assert_eq!(seen.len(), 3);
    let first = seen[0].to_ascii_lowercase();
    assert!(first.starts_with("post /v2/inputs"));
    assert!(first.contains("authorization: key test-key"));
    assert!(seen[0].contains("\"concepts\":[{\"id\":\"tumor\""));
}

#[tokio::test]
async fn test_http_transport_connection_refused_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/v2/inputs", listener.local_addr().unwrap());
    drop(listener);

    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(url, Duration::from_secs(2)).unwrap());
    let request = PostInputsRequest::single(b"jpeg", ["tumor"], serde_json::Map::new());
    assert!(matches!(
        transport.post_inputs(&request, &api_key()).await,
        UploadResponse::Transient { status: None, .. }
    ));
}
