use std::time::Duration;
use tally::services::transport::{HttpTransport, Transport, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// One-shot HTTP responder. Hands back the raw request it received.
async fn serve_once(status_line: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/telemetry", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        let response = format!("{status_line}\r\ncontent-length: 4\r\nconnection: close\r\n\r\nnope");
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });

    (url, rx)
}

#[tokio::test]
async fn test_posts_json_and_accepts_200() {
    let (url, request) = serve_once("HTTP/1.1 200 OK").await;
    let transport = HttpTransport::new(Duration::from_secs(5));

    let payload = r#"[{"component":"A","event":"x","day":"2024-01-01","count":2}]"#.to_string();
    transport.send(&url, payload.clone()).await.unwrap();

    let raw = request.await.unwrap();
    assert!(raw.starts_with("POST /telemetry"), "Should POST to the endpoint path");
    assert!(raw.to_ascii_lowercase().contains("content-type: application/json"));
    assert!(raw.ends_with(&payload), "Body should be the payload verbatim");
}

#[tokio::test]
async fn test_non_200_is_failure() {
    let (url, _request) = serve_once("HTTP/1.1 201 Created").await;
    let transport = HttpTransport::new(Duration::from_secs(5));

    let err = transport.send(&url, "[]".to_string()).await.unwrap_err();
    match err {
        TransportError::Status { status, body } => {
            assert_eq!(status, 201, "Only a plain 200 counts as delivered");
            assert_eq!(body, "nope");
        }
        other => panic!("expected a status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_collector_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/telemetry", listener.local_addr().unwrap());
    drop(listener);

    let transport = HttpTransport::new(Duration::from_secs(5));
    let err = transport.send(&url, "[]".to_string()).await.unwrap_err();
    assert!(matches!(err, TransportError::Network(_)));
}
