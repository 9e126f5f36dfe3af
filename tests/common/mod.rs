#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use tokio::net::TcpListener;

use hls_proxy::{AppConfig, ApplicationServer, DEFAULT_USER_AGENT, services::ProxyServices};

pub const TOKEN: &str = "secret";
pub const REFERER: &str = "https://player.example/";
pub const MANIFEST: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:4.0,\nseg1.ts\n#EXT-X-ENDLIST\n";

#[derive(Clone, Default)]
pub struct OriginState {
    pub endless_dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn test_config() -> AppConfig {
    AppConfig {
        upstream_timeout_secs: 1,
        upstream_referer: Some(REFERER.to_string()),
        static_dir: concat!(env!("CARGO_MANIFEST_DIR"), "/public").to_string(),
        ..Default::default()
    }
}

pub async fn spawn_proxy(config: AppConfig) -> SocketAddr {
    let services = ProxyServices::new(Arc::new(config)).unwrap();
    spawn(ApplicationServer::router(services)).await
}

/// a tiny origin that behaves like the cdns the proxy talks to
pub async fn spawn_origin() -> (SocketAddr, OriginState) {
    let state = OriginState::default();
    let app = Router::new()
        .route("/live/path/master.m3u8", get(|| async { MANIFEST }))
        .route("/private/live/index.m3u8", get(private_manifest))
        .route("/private/live/seg1.ts", get(private_segment))
        .route("/identity/index.m3u8", get(identity_manifest))
        .route("/gzip/index.m3u8", get(gzip_manifest))
        .route("/bom/index.m3u8", get(bom_manifest))
        .route("/latin1/index.m3u8", get(latin1_manifest))
        .route("/forbidden.m3u8", get(|| async { StatusCode::FORBIDDEN }))
        .route("/broken.m3u8", get(|| async { StatusCode::BAD_GATEWAY }))
        .route("/slow.m3u8", get(slow_manifest))
        .route("/seg/plain.ts", get(plain_segment))
        .route("/seg/typed.mp4", get(typed_segment))
        .route("/seg/range.ts", get(ranged_segment))
        .route("/seg/endless.ts", get(endless_segment))
        .route("/seg/missing.ts", get(|| async { StatusCode::NOT_FOUND }))
        .with_state(state.clone());

    (spawn(app).await, state)
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .map(|v| v == "Bearer secret")
        .unwrap_or(false)
}

async fn private_manifest(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    MANIFEST.into_response()
}

async fn private_segment(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ([(header::CONTENT_TYPE, "video/MP2T")], "segment-bytes").into_response()
}

async fn identity_manifest(headers: HeaderMap) -> Response {
    let user_agent_ok = headers
        .get(header::USER_AGENT)
        .map(|v| v == DEFAULT_USER_AGENT)
        .unwrap_or(false);
    let referer_ok = headers
        .get(header::REFERER)
        .map(|v| v == REFERER)
        .unwrap_or(false);

    if user_agent_ok && referer_ok && !headers.contains_key(header::AUTHORIZATION) {
        MANIFEST.into_response()
    } else {
        StatusCode::FORBIDDEN.into_response()
    }
}

async fn gzip_manifest() -> Response {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(MANIFEST.as_bytes()).unwrap();
    (
        [
            (header::CONTENT_ENCODING, "gzip"),
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
        ],
        encoder.finish().unwrap(),
    )
        .into_response()
}

async fn bom_manifest() -> Response {
    let mut body = "\u{feff}".as_bytes().to_vec();
    body.extend_from_slice(MANIFEST.as_bytes());
    ([(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")], body).into_response()
}

async fn latin1_manifest() -> Response {
    // "#EXTM3U\nseg\xe9.ts", the kind of thing old windows encoders write
    let body: &'static [u8] = b"#EXTM3U\nseg\xe9.ts\n";
    ([(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")], body).into_response()
}

async fn slow_manifest() -> &'static str {
    tokio::time::sleep(Duration::from_secs(3)).await;
    MANIFEST
}

async fn plain_segment() -> Response {
    // no content type on purpose
    Response::new(Body::from(vec![0x47u8, 0x40, 0x00, 0x10]))
}

async fn typed_segment() -> Response {
    ([(header::CONTENT_TYPE, "video/mp4")], vec![1u8, 2, 3]).into_response()
}

async fn ranged_segment(headers: HeaderMap) -> Response {
    let data: &'static [u8] = b"0123456789";
    let wants_head = headers
        .get(header::RANGE)
        .map(|v| v == "bytes=0-3")
        .unwrap_or(false);

    if wants_head {
        (
            StatusCode::PARTIAL_CONTENT,
            [(header::CONTENT_RANGE, "bytes 0-3/10")],
            &data[..4],
        )
            .into_response()
    } else {
        data.into_response()
    }
}

async fn endless_segment(State(state): State<OriginState>) -> Response {
    let flag = DropFlag(state.endless_dropped.clone());
    let stream = futures::stream::unfold(flag, |flag| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Some((Ok::<_, std::io::Error>(Bytes::from(vec![0u8; 16 * 1024])), flag))
    });
    Response::new(Body::from_stream(stream))
}

pub fn stream_url(proxy: SocketAddr, target: &str, token: Option<&str>) -> String {
    endpoint_url(proxy, "stream", target, token)
}

pub fn segment_url(proxy: SocketAddr, target: &str, token: Option<&str>) -> String {
    endpoint_url(proxy, "segment", target, token)
}

fn endpoint_url(proxy: SocketAddr, endpoint: &str, target: &str, token: Option<&str>) -> String {
    let mut url = format!(
        "http://{}/api/proxy/{}?url={}",
        proxy,
        endpoint,
        urlencoding::encode(target)
    );
    if let Some(token) = token {
        url.push_str(&format!("&token={}", urlencoding::encode(token)));
    }
    url
}
