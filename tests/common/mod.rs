//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use isr_gateway::{build_gateway, Gateway, GatewayConfig, GatewayServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A request as seen by the mock render backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

#[allow(dead_code)]
impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the mock backend answers.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[allow(dead_code)]
impl MockResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: vec![],
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Raw-TCP render backend. Counts hits and records every request.
#[derive(Debug, Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until the backend has served at least `expected` requests.
    pub async fn wait_for_hits(&self, expected: usize) {
        for _ in 0..200 {
            if self.hit_count() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn parse_head(raw: &str) -> RecordedRequest {
    let mut lines = raw.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    RecordedRequest {
        method,
        target,
        headers,
    }
}

/// Start a programmable render backend on an ephemeral port.
pub async fn start_render_backend<F>(handler: F) -> MockBackend
where
    F: Fn(&RecordedRequest, usize) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        hits: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let handler = Arc::new(handler);
    let state = backend.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let handler = handler.clone();
            let state = state.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }

                let request = parse_head(&String::from_utf8_lossy(&buf));
                let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
                state.requests.lock().unwrap().push(request.clone());
                let response = handler(&request, hit);

                let mut raw = format!("HTTP/1.1 {} {}\r\n", response.status, status_text(response.status));
                for (name, value) in &response.headers {
                    raw.push_str(&format!("{}: {}\r\n", name, value));
                }
                raw.push_str(&format!(
                    "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    response.body.len(),
                    response.body
                ));
                let _ = socket.write_all(raw.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    backend
}

/// A running gateway bound to an ephemeral port.
#[allow(dead_code)]
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub gateway: Gateway,
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

#[allow(dead_code)]
impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Config pointing at `upstream`, with fast retries.
pub fn test_config(upstream: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.routing.build_id = "test-build".into();
    config.render.upstream = format!("http://{}", upstream);
    config.revalidation.max_attempts = 2;
    config.revalidation.base_delay_ms = 10;
    config.revalidation.max_delay_ms = 20;
    config
}

/// Bind, build and serve a gateway. Revalidation requests reach it through
/// the default origin, its own listener.
pub async fn start_gateway(mut config: GatewayConfig) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.listener.bind_address = addr.to_string();

    let shutdown = Shutdown::new();
    let gateway = build_gateway(config, &shutdown).await.unwrap();
    let server = GatewayServer::new(&gateway);
    tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestGateway { addr, shutdown, gateway }
}

/// Write `contents` to a fresh file under the temp dir.
pub fn write_temp(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "isr-gateway-it-{}-{}-{}",
        std::process::id(),
        uuid::Uuid::new_v4(),
        name
    ));
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}
