use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use web_sweep::prober::{NO_TITLE, UNKNOWN_SERVER};
use web_sweep::types::Protocol;
use web_sweep::{HttpProber, Prober, ScanConfig};

const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Serve `response` verbatim to every connection on an ephemeral loopback
/// port. Returns the port and a counter of accepted connections.
async fn serve(response: &'static str) -> (u16, Arc<AtomicU64>) {
    let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut seen = Vec::new();
                while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (port, hits)
}

/// Accepts connections and records the first byte the client sends.
async fn record_first_byte() -> (u16, Arc<AtomicU64>) {
    let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let first = Arc::new(AtomicU64::new(0));
    let slot = Arc::clone(&first);
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut byte = [0u8; 1];
            if stream.read_exact(&mut byte).await.is_ok() {
                slot.store(byte[0] as u64, Ordering::SeqCst);
            }
        }
    });
    (port, first)
}

/// A port with nothing listening on it.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

fn config(protocols: Vec<Protocol>) -> ScanConfig {
    ScanConfig {
        protocols,
        timeout: Duration::from_millis(1500),
        ..ScanConfig::default()
    }
}

const HTML_OK: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/html; charset=utf-8\r\n\
Server: nginx/1.25.3\r\n\
Content-Length: 52\r\n\
Connection: close\r\n\r\n\
<html><head><title>Hi There</title></head></html>\n\n\n";

#[tokio::test]
async fn html_200_is_accepted_with_metadata() {
    let (port, _) = serve(HTML_OK).await;
    let cfg = config(vec![Protocol::Http]);
    let client = HttpProber::new(&cfg).unwrap().with_ports(port, closed_port().await);

    let outcome = client.probe(LOOPBACK, &cfg).await.expect("site found");
    assert_eq!(outcome.ip, LOOPBACK);
    assert_eq!(outcome.protocol, Protocol::Http);
    assert_eq!(outcome.status_code, 200);
    assert_eq!(outcome.title, "Hi There");
    assert_eq!(outcome.server, "nginx/1.25.3");
    assert_eq!(outcome.content_type, "text/html; charset=utf-8");
    assert_eq!(outcome.content_length, 52);
}

#[tokio::test]
async fn missing_server_header_and_title_use_defaults() {
    let (port, _) = serve(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 12\r\nConnection: close\r\n\r\n<p>hello</p>",
    )
    .await;
    let cfg = config(vec![Protocol::Http]);
    let client = HttpProber::new(&cfg).unwrap().with_ports(port, closed_port().await);

    let outcome = client.probe(LOOPBACK, &cfg).await.expect("site found");
    assert_eq!(outcome.server, UNKNOWN_SERVER);
    assert_eq!(outcome.title, NO_TITLE);
    assert_eq!(outcome.content_length, 12);
}

#[tokio::test]
async fn size_is_counted_from_received_body() {
    // Chunked: no Content-Length header at all, 5 + 23 body bytes.
    let (port, _) = serve(
        "HTTP/1.1 200 OK\r\nContent-Type: application/xhtml+xml\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
5\r\n<html\r\n17\r\n><title>x</title></html\r\n0\r\n\r\n",
    )
    .await;
    let cfg = config(vec![Protocol::Http]);
    let client = HttpProber::new(&cfg).unwrap().with_ports(port, closed_port().await);

    let outcome = client.probe(LOOPBACK, &cfg).await.expect("site found");
    assert_eq!(outcome.content_length, 28);
    assert_eq!(outcome.title, "x");
}

#[tokio::test]
async fn non_200_is_no_server() {
    let (port, hits) = serve(
        "HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    let cfg = config(vec![Protocol::Http]);
    let client = HttpProber::new(&cfg).unwrap().with_ports(port, closed_port().await);

    assert!(client.probe(LOOPBACK, &cfg).await.is_none());
    assert_eq!(hits.load(Ordering::SeqCst), 1, "no retry after a miss");
}

#[tokio::test]
async fn non_html_is_no_server() {
    let (port, _) = serve(
        "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 4\r\nConnection: close\r\n\r\n\x01PNG",
    )
    .await;
    let cfg = config(vec![Protocol::Http]);
    let client = HttpProber::new(&cfg).unwrap().with_ports(port, closed_port().await);

    assert!(client.probe(LOOPBACK, &cfg).await.is_none());
}

#[tokio::test]
async fn https_miss_falls_through_to_http() {
    let (http_port, _) = serve(HTML_OK).await;
    let cfg = config(vec![Protocol::Https, Protocol::Http]);
    let client = HttpProber::new(&cfg).unwrap().with_ports(http_port, closed_port().await);

    let outcome = client.probe(LOOPBACK, &cfg).await.expect("http answered");
    assert_eq!(outcome.protocol, Protocol::Http);
    assert_eq!(outcome.title, "Hi There");
}

#[tokio::test]
async fn http_miss_goes_on_to_https() {
    let (http_port, http_hits) = serve(
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (https_port, first_byte) = record_first_byte().await;
    let cfg = config(vec![Protocol::Http, Protocol::Https]);
    let client = HttpProber::new(&cfg).unwrap().with_ports(http_port, https_port);

    // The listener never completes a handshake, so the HTTPS attempt misses too.
    assert!(client.probe(LOOPBACK, &cfg).await.is_none());
    assert_eq!(http_hits.load(Ordering::SeqCst), 1);
    // 0x16 opens a TLS handshake record.
    assert_eq!(first_byte.load(Ordering::SeqCst), 0x16);
}

#[tokio::test]
async fn unreachable_address_is_no_server() {
    let cfg = config(vec![Protocol::Http, Protocol::Https]);
    let client = HttpProber::new(&cfg)
        .unwrap()
        .with_ports(closed_port().await, closed_port().await);
    assert!(client.probe(LOOPBACK, &cfg).await.is_none());
}
