//! In-process HTTP range server for integration tests

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, RANGE,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rangepull_core::types::Settings;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How the server misbehaves
#[derive(Clone, Default)]
pub struct Behavior {
    /// HEAD answers without a Content-Length
    pub omit_length: bool,
    /// Answer every ranged GET with the full body and 200
    pub ignore_range: bool,
    /// 500 for the range starting at this offset
    pub fail_range_start: Option<u64>,
    /// One byte short for the range starting at this offset
    pub truncate_range_start: Option<u64>,
    /// Hang for a long time before answering the range starting here
    pub stall_range_start: Option<u64>,
    /// Delay before every ranged answer
    pub delay: Option<Duration>,
    /// Stream ranged bodies without a Content-Length
    pub chunked: bool,
    /// Content-Disposition sent with HEAD
    pub disposition: Option<String>,
}

pub struct ServerState {
    body: Vec<u8>,
    behavior: Behavior,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    gets: AtomicUsize,
}

pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start(body: Vec<u8>, behavior: Behavior) -> Self {
        let state = Arc::new(ServerState {
            body,
            behavior,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/file", get(get_file).head(head_file))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/file", self.addr)
    }

    /// Number of GET requests served so far
    pub fn gets(&self) -> usize {
        self.state.gets.load(Ordering::SeqCst)
    }

    /// Most GET requests ever handled at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }
}

async fn head_file(State(state): State<Arc<ServerState>>) -> Response {
    if state.behavior.omit_length {
        let empty = futures::stream::empty::<Result<Bytes, std::io::Error>>();
        return (StatusCode::OK, Body::from_stream(empty)).into_response();
    }

    let mut response = (
        StatusCode::OK,
        [
            (CONTENT_LENGTH, state.body.len().to_string()),
            (ACCEPT_RANGES, "bytes".to_string()),
        ],
    )
        .into_response();

    if let Some(disposition) = &state.behavior.disposition {
        if let Ok(value) = disposition.parse() {
            response.headers_mut().insert(CONTENT_DISPOSITION, value);
        }
    }
    response
}

async fn get_file(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    state.gets.fetch_add(1, Ordering::SeqCst);
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak_in_flight.fetch_max(now, Ordering::SeqCst);

    let response = serve_range(&state, &headers).await;

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    response
}

async fn serve_range(state: &ServerState, headers: &HeaderMap) -> Response {
    let behavior = &state.behavior;
    if let Some(delay) = behavior.delay {
        tokio::time::sleep(delay).await;
    }

    let total = state.body.len() as u64;
    let Some((start, end)) = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range)
    else {
        return (StatusCode::OK, state.body.clone()).into_response();
    };

    if behavior.ignore_range {
        return (StatusCode::OK, state.body.clone()).into_response();
    }
    if start > end || end >= total {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    }
    if behavior.stall_range_start == Some(start) {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    if behavior.fail_range_start == Some(start) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }

    let mut slice = state.body[start as usize..=end as usize].to_vec();
    if behavior.truncate_range_start == Some(start) {
        slice.pop();
    }

    let content_range = [(CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, total))];
    if behavior.chunked {
        let parts = slice
            .chunks(256)
            .map(|part| Ok::<_, std::io::Error>(Bytes::copy_from_slice(part)))
            .collect::<Vec<_>>();
        let body = Body::from_stream(futures::stream::iter(parts));
        return (StatusCode::PARTIAL_CONTENT, content_range, body).into_response();
    }

    (StatusCode::PARTIAL_CONTENT, content_range, slice).into_response()
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Deterministic, non-repeating-looking test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}

pub fn settings(chunk_size: u64) -> Settings {
    Settings {
        chunk_size,
        probe_timeout_secs: 5,
        chunk_timeout_secs: 30,
        ..Settings::default()
    }
}

/// Client that never goes through a system proxy
pub fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Chunk files left in `dir`
pub fn leftover_parts(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(".part"))
        })
        .collect()
}
