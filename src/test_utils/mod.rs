//! Test utilities shared by unit and integration tests.
//!
//! The centerpiece is [`StubMirror`], a minimal in-process HTTP/1.1 server
//! backed by `tokio::net::TcpListener`. Mirror-fallback and download tests
//! run against it instead of the network, so they are deterministic and
//! offline-safe.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Canned response served by a [`StubMirror`] route.
#[derive(Debug, Clone)]
pub struct StubResponse {
    /// HTTP status code to answer with.
    pub status: u16,
    /// Response body bytes.
    pub body: Vec<u8>,
    /// Artificial latency before the response is written.
    pub delay: Duration,
}

impl StubResponse {
    /// A 200 response with the given body and no artificial delay.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self { status: 200, body: body.into(), delay: Duration::ZERO }
    }

    /// A response with artificial latency, for latency-ranking tests.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Minimal one-connection-at-a-time HTTP server with canned routes.
///
/// Unknown paths answer 404. The listener task is aborted on drop.
pub struct StubMirror {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl StubMirror {
    /// Start a stub mirror serving `routes` (request path → response).
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound; tests cannot proceed without it.
    pub async fn start(routes: HashMap<String, StubResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub mirror");
        Self::serve(listener, routes)
    }

    /// Start a stub acting as a complete release server: `routes` plus the
    /// release descriptor at `/get/latest/otad-release`. Any `${SELF}`
    /// occurrence in the descriptor template is replaced with this mirror's
    /// own base URL, so descriptors can list the stub as their package
    /// mirror.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start_with_release(
        descriptor_template: &str,
        mut routes: HashMap<String, StubResponse>,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub mirror");
        let addr = listener.local_addr().expect("stub mirror local addr");
        let descriptor = descriptor_template.replace("${SELF}", &format!("http://{addr}/"));
        routes.insert(
            format!("/get/latest/{}", crate::constants::RELEASE_FILE_NAME),
            StubResponse::ok(descriptor),
        );
        Self::serve(listener, routes)
    }

    fn serve(listener: TcpListener, routes: HashMap<String, StubResponse>) -> Self {
        let addr = listener.local_addr().expect("stub mirror local addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_task = Arc::clone(&hits);
        let routes = Arc::new(routes);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                hits_task.fetch_add(1, Ordering::SeqCst);
                let routes = Arc::clone(&routes);
                tokio::spawn(async move {
                    let path = match read_request_path(&mut stream).await {
                        Some(path) => path,
                        None => return,
                    };
                    let response = routes.get(&path).cloned().unwrap_or(StubResponse {
                        status: 404,
                        body: b"not found".to_vec(),
                        delay: Duration::ZERO,
                    });
                    if !response.delay.is_zero() {
                        tokio::time::sleep(response.delay).await;
                    }
                    let head = format!(
                        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        response.status,
                        reason(response.status),
                        response.body.len()
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(&response.body).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { addr, hits, handle }
    }

    /// Base URL of this mirror, with trailing slash.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Number of connections accepted so far.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for StubMirror {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Read the request line plus headers and return the request path.
async fn read_request_path(stream: &mut tokio::net::TcpStream) -> Option<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 16 * 1024 {
            return None;
        }
    }
    let request = String::from_utf8_lossy(&buf);
    let line = request.lines().next()?;
    line.split_whitespace().nth(1).map(ToString::to_string)
}

const fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// A base URL guaranteed to refuse connections immediately.
///
/// Binds a listener to grab a free port and drops it before returning.
pub async fn unreachable_mirror() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind probe listener");
    let addr = listener.local_addr().expect("probe local addr");
    drop(listener);
    format!("http://{addr}/")
}

/// Hex SHA-256 digest of a byte slice, for building checksum manifests in
/// tests.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Build a gzipped tar archive holding `files` (path → contents), returned
/// as bytes. Used to fabricate release packages and migration tools.
#[must_use]
pub fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).expect("append tar entry");
    }
    let encoder = builder.into_inner().expect("finish tar");
    encoder.finish().expect("finish gzip")
}
