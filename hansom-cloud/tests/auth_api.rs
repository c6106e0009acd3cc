//! Wire-level tests for the auth/TOTP client against a canned HTTP server.

use hansom_cloud::{AuthClient, AuthError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Accept one connection, capture the request head+body, send `response`.
async fn one_shot_server(response: &'static str) -> (String, tokio::sync::oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            // Headers complete; the bodies these tests send are tiny enough
            // to arrive in the same segment or the one after.
            if let Some(head_end) = find_head_end(&request) {
                let head = String::from_utf8_lossy(&request[..head_end]).to_string();
                let body_len = content_length(&head);
                if request.len() >= head_end + 4 + body_len {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.flush().await.unwrap();
        let _ = tx.send(String::from_utf8_lossy(&request).to_string());
    });

    (format!("http://{addr}"), rx)
}

fn find_head_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(str::to_owned))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[tokio::test]
async fn authenticate_posts_raw_token_as_text_plain() {
    let (base_url, request) = one_shot_server(
        "HTTP/1.1 200 OK\r\ncontent-length: 13\r\nconnection: close\r\n\r\nbearer-abc123",
    )
    .await;

    let client = AuthClient::new(base_url);
    let bearer = client.authenticate("raw-device-token").await.unwrap();
    assert_eq!(bearer, "bearer-abc123");

    let request = request.await.unwrap();
    assert!(request.starts_with("POST /auth HTTP/1.1"), "{request}");
    assert!(request.to_ascii_lowercase().contains("content-type: text/plain"));
    assert!(request.ends_with("raw-device-token"));
}

#[tokio::test]
async fn totp_fetch_is_bearer_authenticated() {
    let (base_url, request) = one_shot_server(
        "HTTP/1.1 200 OK\r\ncontent-length: 10\r\nconnection: close\r\n\r\nSEED123456",
    )
    .await;

    let client = AuthClient::new(base_url);
    let seed = client.fetch_totp_seed("AB-1234", "bearer-abc123").await.unwrap();
    assert_eq!(seed, "SEED123456");

    let request = request.await.unwrap();
    assert!(
        request.starts_with("GET /meters/AB-1234/security/TOTP HTTP/1.1"),
        "{request}"
    );
    assert!(
        request
            .to_ascii_lowercase()
            .contains("authorization: bearer bearer-abc123")
    );
}

#[tokio::test]
async fn error_statuses_surface_with_the_body() {
    let (base_url, _request) = one_shot_server(
        "HTTP/1.1 403 Forbidden\r\ncontent-length: 6\r\nconnection: close\r\n\r\ndenied",
    )
    .await;

    let client = AuthClient::new(base_url);
    let err = client.authenticate("bad-token").await.unwrap_err();
    let AuthError::ServerError { status, message } = err else {
        panic!("expected server error, got {err:?}");
    };
    assert_eq!(status, 403);
    assert_eq!(message, "denied");
}
