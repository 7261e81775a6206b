//! Shared fixtures for the sync integration tests.
//!
//! `FakeServer` is a stateful in-memory HTTP endpoint: routes can be swapped
//! between passes, downloads can stall or fail mid-stream, and every request
//! is logged.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStream};
use bytes::Bytes;
use core_runtime::config::RemoteEndpoints;
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use core_sync::{ModSyncCoordinator, SyncConfig};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::io::StreamReader;

pub const MANIFEST_URL: &str = "https://mods.example.com/manifest.json";
pub const MODS_BASE_URL: &str = "https://mods.example.com/mods";
pub const OTHER_URL: &str = "https://mods.example.com/other";

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

// ============================================================================
// Fake HTTP Server
// ============================================================================

/// How a download body is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// All chunks, then EOF
    Complete,
    /// First chunk, then an I/O error
    FailAfterFirstChunk,
    /// First chunk, then never another byte
    StallAfterFirstChunk,
}

#[derive(Debug, Clone)]
struct Route {
    status: u16,
    body: Bytes,
    advertise_length: bool,
    mode: BodyMode,
}

pub struct FakeServer {
    routes: AsyncMutex<HashMap<String, Route>>,
    requests: AsyncMutex<Vec<(HttpMethod, String)>>,
    manifest_gate: AsyncMutex<Option<Arc<Semaphore>>>,
    chunk_size: usize,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: AsyncMutex::new(HashMap::new()),
            requests: AsyncMutex::new(Vec::new()),
            manifest_gate: AsyncMutex::new(None),
            chunk_size: 16,
        })
    }

    pub async fn route(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.routes.lock().await.insert(
            url.to_string(),
            Route {
                status,
                body: body.into(),
                advertise_length: true,
                mode: BodyMode::Complete,
            },
        );
    }

    pub async fn set_body_mode(&self, url: &str, mode: BodyMode) {
        if let Some(route) = self.routes.lock().await.get_mut(url) {
            route.mode = mode;
        }
    }

    pub async fn hide_length(&self, url: &str) {
        if let Some(route) = self.routes.lock().await.get_mut(url) {
            route.advertise_length = false;
        }
    }

    /// Serve `entries` as the manifest: `(name, content, publish_hash)`.
    pub async fn publish_mods(&self, entries: &[(&str, &[u8], bool)]) {
        let manifest: Vec<serde_json::Value> = entries
            .iter()
            .map(|(name, content, publish_hash)| {
                let mut entry = serde_json::json!({ "name": name, "size": content.len() });
                if *publish_hash {
                    entry["hash"] = serde_json::Value::String(sha256_hex(content));
                }
                entry
            })
            .collect();
        self.route(
            MANIFEST_URL,
            200,
            serde_json::to_vec(&manifest).unwrap_or_default(),
        )
        .await;

        for (name, content, _) in entries {
            self.route(&mod_url(name), 200, content.to_vec()).await;
        }
    }

    /// Serve `entries` as the other-resource directory index.
    pub async fn publish_other(&self, entries: &[(&str, &[u8])]) {
        let links: String = entries
            .iter()
            .map(|(name, _)| format!(r#"<a href="{name}">{name}</a>"#))
            .collect();
        self.route(OTHER_URL, 200, format!("<html><body>{links}</body></html>"))
            .await;

        for (name, content) in entries {
            self.route(&other_url(name), 200, content.to_vec()).await;
        }
    }

    /// Hold every manifest request until a permit is added to the semaphore.
    pub async fn gate_manifest(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.manifest_gate.lock().await = Some(gate.clone());
        gate
    }

    pub async fn requests_for(&self, method: HttpMethod, url: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|(m, u)| *m == method && u == url)
            .count()
    }

    async fn lookup(&self, method: HttpMethod, url: &str) -> Option<Route> {
        self.requests.lock().await.push((method, url.to_string()));
        self.routes.lock().await.get(url).cloned()
    }

    fn length_headers(route: &Route) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if route.advertise_length {
            headers.insert("Content-Length".to_string(), route.body.len().to_string());
        }
        headers
    }
}

#[async_trait]
impl HttpClient for FakeServer {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        if request.url == MANIFEST_URL {
            let gate = self.manifest_gate.lock().await.clone();
            if let Some(gate) = gate {
                let permit = gate
                    .acquire()
                    .await
                    .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;
                permit.forget();
            }
        }

        let Some(route) = self.lookup(request.method, &request.url).await else {
            return Ok(HttpResponse {
                status: 404,
                headers: HashMap::new(),
                body: Bytes::new(),
            });
        };

        let headers = Self::length_headers(&route);
        let body = match request.method {
            HttpMethod::Head => Bytes::new(),
            HttpMethod::Get => route.body.clone(),
        };
        Ok(HttpResponse {
            status: route.status,
            headers,
            body,
        })
    }

    async fn download_stream(&self, request: HttpRequest) -> BridgeResult<HttpStream> {
        let Some(route) = self.lookup(request.method, &request.url).await else {
            return Ok(HttpStream::new(404, HashMap::new(), Box::new(tokio::io::empty())));
        };

        let headers = Self::length_headers(&route);
        let mut chunks: Vec<io::Result<Bytes>> = route
            .body
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();

        let body: Box<dyn tokio::io::AsyncRead + Send + Unpin> = match route.mode {
            BodyMode::Complete => Box::new(StreamReader::new(stream::iter(chunks))),
            BodyMode::FailAfterFirstChunk => {
                chunks.truncate(1);
                chunks.push(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
                Box::new(StreamReader::new(stream::iter(chunks)))
            }
            BodyMode::StallAfterFirstChunk => {
                chunks.truncate(1);
                Box::new(StreamReader::new(
                    stream::iter(chunks).chain(stream::pending()),
                ))
            }
        };

        Ok(HttpStream::new(route.status, headers, body))
    }
}

pub fn mod_url(name: &str) -> String {
    format!("{MODS_BASE_URL}/{name}")
}

pub fn other_url(name: &str) -> String {
    format!("{OTHER_URL}/{name}")
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub server: Arc<FakeServer>,
    pub fs: Arc<TokioFileSystem>,
    pub event_bus: Arc<EventBus>,
    pub coordinator: Arc<ModSyncCoordinator>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(SyncConfig::default()).await
    }

    pub async fn with_config(config: SyncConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = FakeServer::new();
        // An empty index unless a test publishes other resources.
        server.route(OTHER_URL, 200, "<html></html>").await;

        let fs = Arc::new(TokioFileSystem::with_data_directory(dir.path().join("data")));
        let event_bus = Arc::new(EventBus::new(4096));
        let coordinator = ModSyncCoordinator::new(
            config,
            RemoteEndpoints::new(MANIFEST_URL, MODS_BASE_URL, OTHER_URL),
            server.clone(),
            fs.clone(),
            event_bus.clone(),
        )
        .expect("coordinator");

        Self {
            dir,
            server,
            fs,
            event_bus,
            coordinator: Arc::new(coordinator),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("arma3")
    }

    pub fn addons(&self) -> PathBuf {
        self.root().join("@A3URL").join("addons")
    }

    pub fn mod_dir(&self) -> PathBuf {
        self.root().join("@A3URL")
    }

    pub async fn write_local(&self, path: &Path, content: &[u8]) {
        tokio::fs::create_dir_all(path.parent().expect("parent"))
            .await
            .expect("create dir");
        tokio::fs::write(path, content).await.expect("write");
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }
}

/// Everything currently buffered on a receiver.
pub fn drain(receiver: &mut Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
