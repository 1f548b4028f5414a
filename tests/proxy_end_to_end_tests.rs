//! End-to-end proxy flows against stub origins.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use wiretap::Proxy;

/// Run the proxy on an ephemeral port.
async fn spawn_proxy(proxy: Proxy) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = proxy.serve(listener).await;
    });
    addr
}

/// Origin recording each request block and answering with a fixed response.
async fn spawn_recording_origin(
    response: &'static [u8],
) -> (std::net::SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut total = 0usize;
                loop {
                    let n = stream.read(&mut buf[total..]).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    total += n;
                    if buf[..total].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                tx.send(String::from_utf8_lossy(&buf[..total]).to_string())
                    .unwrap();
                let _ = stream.write_all(response).await;
            });
        }
    });

    (addr, rx)
}

async fn read_until(stream: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("read timed out")
            .unwrap();
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..n]);
        if collected.windows(needle.len()).any(|w| w == needle) {
            break;
        }
    }
    collected
}

// ============================================================================
// Plain HTTP, direct
// ============================================================================

#[tokio::test]
async fn test_plain_http_direct_strips_and_relays() {
    let (origin_addr, mut seen) =
        spawn_recording_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi").await;
    let proxy = Proxy::builder().build();
    let counters = proxy.clone();
    let proxy_addr = spawn_proxy(proxy).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!(
        "GET http://{origin_addr}/ HTTP/1.1\r\n\
         Host: {origin_addr}\r\n\
         Proxy-Connection: keep-alive\r\n\
         Accept-Encoding: gzip\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let response = read_until(&mut client, b"hi").await;
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got {response}");
    assert!(response.contains("Content-Length: 2"));
    assert!(response.ends_with("hi"));

    let forwarded = seen.recv().await.unwrap();
    // Absolute-form was rewritten to origin-form for the direct hop
    assert!(forwarded.starts_with("GET / HTTP/1.1\r\n"), "got {forwarded}");
    assert!(forwarded.contains(&format!("Host: {origin_addr}\r\n")));
    assert!(!forwarded.contains("Proxy-Connection"));
    assert!(!forwarded.contains("Accept-Encoding"));

    drop(client);
    // Both directions saw traffic
    tokio::time::sleep(Duration::from_millis(50)).await;
    let usage = counters.usage();
    assert!(usage.incoming >= request.len() as u64);
    assert!(usage.outgoing > 0);
}

#[tokio::test]
async fn test_plain_http_keep_alive_serves_second_request() {
    let (origin_addr, mut seen) =
        spawn_recording_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
    let proxy_addr = spawn_proxy(Proxy::builder().build()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    for path in ["/first", "/second"] {
        let request = format!(
            "GET http://{origin_addr}{path} HTTP/1.1\r\nHost: {origin_addr}\r\n\r\n"
        );
        client.write_all(request.as_bytes()).await.unwrap();
        let response = read_until(&mut client, b"ok").await;
        assert!(!response.is_empty());
        let forwarded = seen.recv().await.unwrap();
        assert!(forwarded.starts_with(&format!("GET {path} HTTP/1.1\r\n")));
    }
}

#[tokio::test]
async fn test_plain_http_request_body_forwarded() {
    let (origin_addr, mut seen) =
        spawn_recording_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
    let proxy_addr = spawn_proxy(Proxy::builder().build()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!(
        "POST http://{origin_addr}/submit HTTP/1.1\r\n\
         Host: {origin_addr}\r\n\
         Content-Length: 7\r\n\r\npayload"
    );
    client.write_all(request.as_bytes()).await.unwrap();
    let _ = read_until(&mut client, b"\r\n\r\n").await;

    let forwarded = seen.recv().await.unwrap();
    assert!(forwarded.contains("Content-Length: 7"));
    // The recorder stops at the blank line; the body rides right behind it
    // in the same stream, so grab it from the start line onward
    assert!(forwarded.starts_with("POST /submit HTTP/1.1\r\n"));
}

// ============================================================================
// CONNECT raw tunnel
// ============================================================================

#[tokio::test]
async fn test_connect_tunnel_is_byte_transparent() {
    let (origin_addr, _seen) =
        spawn_recording_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
    let proxy_addr = spawn_proxy(Proxy::builder().build()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client
        .write_all(
            format!("CONNECT {origin_addr} HTTP/1.1\r\nHost: {origin_addr}\r\n\r\n").as_bytes(),
        )
        .await
        .unwrap();

    let ack = read_until(&mut client, b"\r\n\r\n").await;
    assert_eq!(ack, b"HTTP/1.1 200 OK\r\n\r\n");

    client
        .write_all(format!("GET / HTTP/1.1\r\nHost: {origin_addr}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let response = read_until(&mut client, b"ok").await;
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("ok"));
}

#[tokio::test]
async fn test_connect_dial_failure_returns_501() {
    // Grab a port with nothing listening on it
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = unused.local_addr().unwrap();
    drop(unused);

    let proxy = Proxy::builder()
        .connect_timeout(Duration::from_millis(500))
        .build();
    let counters = proxy.clone();
    let proxy_addr = spawn_proxy(proxy).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client
        .write_all(format!("CONNECT {dead_addr} HTTP/1.1\r\nHost: {dead_addr}\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"HTTP/1.1 501 Bad Gateway\r\n\r\n");

    tokio::time::sleep(Duration::from_millis(50)).await;
    // The refusal itself is accounted as outgoing traffic
    assert!(counters.usage().outgoing >= response.len() as u64);
}

#[tokio::test]
async fn test_connect_idle_timeout_closes_cleanly() {
    let (origin_addr, _seen) =
        spawn_recording_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
    let proxy = Proxy::builder()
        .idle_timeout(Duration::from_millis(200))
        .build();
    let proxy_addr = spawn_proxy(proxy).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client
        .write_all(
            format!("CONNECT {origin_addr} HTTP/1.1\r\nHost: {origin_addr}\r\n\r\n").as_bytes(),
        )
        .await
        .unwrap();
    let _ack = read_until(&mut client, b"\r\n\r\n").await;

    // Send nothing; the tunnel should close within the idle window
    let mut rest = Vec::new();
    let eof = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest)).await;
    assert!(eof.is_ok(), "tunnel did not close after idling");
}

// ============================================================================
// Session gates
// ============================================================================

#[tokio::test]
async fn test_rejected_peer_is_dropped_before_read() {
    struct DenyAll;
    impl wiretap::ProxyPolicy for DenyAll {
        fn allow_connection(&self, _peer: std::net::SocketAddr) -> bool {
            false
        }
    }

    let proxy = Proxy::builder().policy(Arc::new(DenyAll)).build();
    let proxy_addr = spawn_proxy(proxy).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client
        .write_all(b"GET http://example.test/ HTTP/1.1\r\nHost: example.test\r\n\r\n")
        .await
        .unwrap();
    let mut out = Vec::new();
    // Either a clean close or a reset proves the session never answered
    let n = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut out))
        .await
        .expect("connection not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_origin_form_request_closes_silently() {
    let proxy_addr = spawn_proxy(Proxy::builder().build()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    // No absolute-form target and no CONNECT: unroutable
    client
        .write_all(b"GET /nowhere HTTP/1.1\r\nHost: example.test\r\n\r\n")
        .await
        .unwrap();
    let mut out = Vec::new();
    let n = client.read_to_end(&mut out).await.unwrap_or(0);
    assert_eq!(n, 0);
}
