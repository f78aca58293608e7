//! Test HTTP servers: a range-aware wiremock responder and a raw TCP server
//! that can cut or stall the body part way through.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use wiremock::{Request, Respond, ResponseTemplate};

use super::socket_guard::should_skip_socket_bound_test;

/// Deterministic segment payload of `len` bytes.
pub fn segment_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).unwrap()).collect()
}

/// Serves `body`, honoring `Range: bytes=<start>-` with a 206.
///
/// A range starting at or past the end gets 416.
pub struct RangeResponder {
    body: Vec<u8>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len();
        let start = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.strip_suffix('-'))
            .and_then(|v| v.parse::<usize>().ok());

        match start {
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
            Some(start) if start >= len => ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{len}").as_str()),
            Some(start) => ResponseTemplate::new(206)
                .insert_header(
                    "Content-Range",
                    format!("bytes {start}-{}/{len}", len - 1).as_str(),
                )
                .set_body_bytes(self.body[start..].to_vec()),
        }
    }
}

/// Raw HTTP/1.1 server driven by a per-connection script.
pub struct RawServer {
    pub url: String,
    pub connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl Drop for RawServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn spawn_raw_server<F, Fut>(serve: F) -> Option<RawServer>
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    if should_skip_socket_bound_test() {
        return None;
    }
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    let task = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);

            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            serve(socket).await;
        }
    });

    Some(RawServer {
        url: format!("http://{addr}/seg.flv"),
        connections,
        task,
    })
}

fn response_head(content_length: u64) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {content_length}\r\nContent-Type: video/x-flv\r\nConnection: close\r\n\r\n"
    )
}

/// Serves `body` at `/seg.flv` with its full length declared, but closes the
/// connection after `sent` bytes. `None` when sockets are unavailable.
pub async fn start_truncating_server(body: Vec<u8>, sent: usize) -> Option<RawServer> {
    let body = Arc::new(body);
    spawn_raw_server(move |mut socket| {
        let body = Arc::clone(&body);
        async move {
            let _ = socket.write_all(response_head(body.len() as u64).as_bytes()).await;
            let _ = socket.write_all(&body[..sent]).await;
            let _ = socket.flush().await;
            let _ = socket.shutdown().await;
        }
    })
    .await
}

/// Declares `declared` bytes, sends one byte, waits `pause`, sends one more
/// byte and closes.
pub async fn start_trickling_server(declared: u64, pause: Duration) -> Option<RawServer> {
    spawn_raw_server(move |mut socket| async move {
        let _ = socket.write_all(response_head(declared).as_bytes()).await;
        let _ = socket.write_all(b"F").await;
        let _ = socket.flush().await;
        tokio::time::sleep(pause).await;
        let _ = socket.write_all(b"L").await;
        let _ = socket.flush().await;
        let _ = socket.shutdown().await;
    })
    .await
}
