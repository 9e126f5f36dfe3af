use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, info};

use crate::server::{
    error::{AppResult, Error, RelayError},
    extractors::ProxyTarget,
    services::ProxyServices,
    utils::manifest_utils::{self, is_absolute},
};

const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const DEFAULT_SEGMENT_CONTENT_TYPE: &str = "video/MP2T";

pub struct ProxyController;

impl ProxyController {
    pub fn app() -> Router {
        Router::new()
            .route(
                "/stream",
                get(Self::stream_get).options(Self::proxy_options),
            )
            .route(
                "/segment",
                get(Self::segment_get).options(Self::proxy_options),
            )
    }

    /// manifests change every few seconds on live streams, nothing is allowed to cache them
    fn build_m3u8_response(processed_body: String) -> Response {
        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(MANIFEST_CONTENT_TYPE),
        );
        response_headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        response_headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        response_headers.insert(header::EXPIRES, HeaderValue::from_static("0"));

        (StatusCode::OK, response_headers, processed_body).into_response()
    }

    async fn stream_get(
        Extension(services): Extension<ProxyServices>,
        target: ProxyTarget,
    ) -> AppResult<Response> {
        if !is_absolute(&target.url) {
            return Err(Error::InvalidParameter(
                "url must be an absolute http(s) URL".to_string(),
            ));
        }

        info!("Proxying manifest: {}", target.url);

        let text = services
            .upstream
            .fetch_manifest(&target.url, target.token())
            .await?;

        let processed_body = manifest_utils::rewrite_manifest(&text, &target.url, target.token())?;
        debug!(
            "Rewrote manifest from {} to {} bytes",
            text.len(),
            processed_body.len()
        );

        Ok(Self::build_m3u8_response(processed_body))
    }

    async fn segment_get(
        Extension(services): Extension<ProxyServices>,
        target: Result<ProxyTarget, Error>,
        headers: HeaderMap,
    ) -> Result<Response, RelayError> {
        let target = target?;

        if !is_absolute(&target.url) {
            return Err(
                Error::InvalidParameter("url must be an absolute http(s) URL".to_string()).into(),
            );
        }

        debug!("Relaying segment: {}", target.url);

        let segment = services
            .upstream
            .fetch_segment(
                &target.url,
                target.token(),
                headers.get(header::RANGE).cloned(),
            )
            .await?;

        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            segment
                .content_type
                .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_SEGMENT_CONTENT_TYPE)),
        );
        response_headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=31536000"),
        );
        response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if let Some(content_length) = segment.content_length {
            response_headers.insert(header::CONTENT_LENGTH, content_length);
        }
        if let Some(content_range) = segment.content_range {
            response_headers.insert(header::CONTENT_RANGE, content_range);
        }

        // if the player hangs up, hyper drops this body and the upstream connection goes with it
        let body = Body::from_stream(segment.body);

        Ok((segment.status, response_headers, body).into_response())
    }

    // real preflights are answered by the cors layer before they get here
    async fn proxy_options() -> impl IntoResponse {
        StatusCode::NO_CONTENT
    }
}
