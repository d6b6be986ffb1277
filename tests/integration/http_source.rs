//! HttpSource against a local canned-response server

use super::common::daily_resource;
use std::path::PathBuf;
use std::time::Duration;
use tabular_archiver::source::http::HttpSource;
use tabular_archiver::source::{DataFormat, FetchOutcome, FetchRequest, TabularSource};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve `responses` in order, one per connection; returns the base URL and
/// a handle yielding the received request lines.
async fn serve(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut request_lines = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let head = String::from_utf8_lossy(&buf).to_string();
            request_lines.push(head.lines().next().unwrap_or_default().to_string());

            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
        request_lines
    });

    (format!("http://{addr}/v1"), handle)
}

fn response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!(
        "content-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    ));
    out
}

fn request<'a>(
    resource: &'a tabular_archiver::ResourceDescriptor,
    parameters: &'a [String],
    ids: &'a [String],
    target: PathBuf,
) -> FetchRequest<'a> {
    FetchRequest {
        resource,
        parameters,
        entity_ids: ids,
        start: "2024-01-01T00:00".to_string(),
        end: "2024-01-31T23:59".to_string(),
        format: DataFormat::Csv,
        target_path: target,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_list_entities_parses_metadata() {
    let body = r#"{"stations": [
        {"id": 5925, "valid_from": "1993-01-01T00:00:00+00:00"},
        {"id": "11035", "valid_from": "1872-01-01"}
    ]}"#;
    let (base, handle) = serve(vec![response(
        "200 OK",
        &[("content-type", "application/json")],
        body,
    )])
    .await;

    let source = HttpSource::new(base).unwrap();
    let entities = source.list_entities(&daily_resource()).await.unwrap();

    assert_eq!(entities.len(), 2);
    assert_eq!(entities[0].id, "5925");
    assert_eq!(entities[1].id, "11035");

    let lines = handle.await.unwrap();
    assert!(lines[0].starts_with("GET /v1/station/historical/station-daily/metadata "));
}

#[tokio::test]
async fn test_metadata_error_status() {
    let (base, _handle) = serve(vec![response("503 Service Unavailable", &[], "down")]).await;

    let source = HttpSource::new(base).unwrap();
    let err = source.list_entities(&daily_resource()).await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_fetch_writes_body_and_reads_quota() {
    let temp_dir = TempDir::new().unwrap();
    let body = "time,station,tl\n2024-01-01T00:00+00:00,1,1.5\n";
    let (base, handle) = serve(vec![response(
        "200 OK",
        &[
            ("x-ratelimit-remaining-second", "4"),
            ("x-ratelimit-remaining-hour", "0"),
            ("ratelimit-reset", "1200"),
        ],
        body,
    )])
    .await;

    let resource = daily_resource();
    let params = vec!["tl".to_string(), "rr".to_string()];
    let ids = vec!["1".to_string(), "2".to_string()];
    let target = temp_dir.path().join("batches").join("batch.csv");

    let source = HttpSource::new(base).unwrap();
    let outcome = source
        .fetch(&request(&resource, &params, &ids, target.clone()))
        .await;

    match outcome {
        FetchOutcome::Success { path, quota } => {
            assert_eq!(path, target);
            assert_eq!(quota.remaining_second, Some(4));
            assert!(quota.hour_exhausted());
            assert_eq!(quota.reset_seconds, Some(1200));
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(std::fs::read_to_string(&target).unwrap(), body);

    let line = &handle.await.unwrap()[0];
    assert!(line.starts_with("GET /v1/station/historical/station-daily?"));
    assert!(line.contains("parameters=tl%2Crr"));
    assert!(line.contains("station_ids=1%2C2"));
    assert!(line.contains("start=2024-01-01T00%3A00"));
    assert!(line.contains("output_format=csv"));
}

#[tokio::test]
async fn test_fetch_429_is_rate_limited() {
    let temp_dir = TempDir::new().unwrap();
    let (base, _handle) = serve(vec![response(
        "429 Too Many Requests",
        &[("retry-after", "17")],
        "slow down",
    )])
    .await;

    let resource = daily_resource();
    let params = vec!["tl".to_string()];
    let ids = vec!["1".to_string()];
    let target = temp_dir.path().join("batch.csv");

    let source = HttpSource::new(base).unwrap();
    let outcome = source.fetch(&request(&resource, &params, &ids, target.clone())).await;

    assert!(matches!(
        outcome,
        FetchOutcome::RateLimited {
            reset_seconds: 17,
            ..
        }
    ));
    assert!(!target.exists());
}

#[tokio::test]
async fn test_fetch_429_without_reset_header_uses_default() {
    let temp_dir = TempDir::new().unwrap();
    let (base, _handle) = serve(vec![response("429 Too Many Requests", &[], "")]).await;

    let resource = daily_resource();
    let params = vec!["tl".to_string()];
    let ids = vec!["1".to_string()];

    let source = HttpSource::new(base).unwrap();
    let outcome = source
        .fetch(&request(&resource, &params, &ids, temp_dir.path().join("b.csv")))
        .await;

    assert!(matches!(
        outcome,
        FetchOutcome::RateLimited {
            reset_seconds: 60,
            ..
        }
    ));
}

#[tokio::test]
async fn test_fetch_server_error_is_failure() {
    let temp_dir = TempDir::new().unwrap();
    let (base, _handle) = serve(vec![response(
        "500 Internal Server Error",
        &[],
        "boom",
    )])
    .await;

    let resource = daily_resource();
    let params = vec!["tl".to_string()];
    let ids = vec!["1".to_string()];

    let source = HttpSource::new(base).unwrap();
    let outcome = source
        .fetch(&request(&resource, &params, &ids, temp_dir.path().join("b.csv")))
        .await;

    match outcome {
        FetchOutcome::Failure { reason } => {
            assert!(reason.contains("500"));
            assert!(reason.contains("boom"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_connection_refused_is_failure() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let temp_dir = TempDir::new().unwrap();
    let resource = daily_resource();
    let params = vec!["tl".to_string()];
    let ids = vec!["1".to_string()];

    let source = HttpSource::new(format!("http://{addr}")).unwrap();
    let outcome = source
        .fetch(&request(&resource, &params, &ids, temp_dir.path().join("b.csv")))
        .await;

    assert!(matches!(outcome, FetchOutcome::Failure { .. }));
}
