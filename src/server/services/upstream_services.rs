use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::{StreamExt, stream::BoxStream};
use reqwest::{
    StatusCode,
    header::{self, HeaderMap, HeaderValue},
};
use tracing::{debug, error};

use crate::{
    config::UpstreamIdentity,
    server::{
        error::{AppResult, Error},
        utils::manifest_utils::strip_bom,
    },
};

/// manifests are tiny and usually compressed, we decode these two ourselves
const MANIFEST_ACCEPT_ENCODING: &str = "gzip, zstd";

pub type DynUpstreamService = Arc<dyn UpstreamServiceTrait + Send + Sync>;

/// A segment response whose body has not been read yet.
pub struct UpstreamSegment {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub content_length: Option<HeaderValue>,
    pub content_range: Option<HeaderValue>,
    pub body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
}

#[async_trait::async_trait]
pub trait UpstreamServiceTrait {
    /// fetch a playlist and return it as text, bounded by the upstream timeout
    async fn fetch_manifest(&self, url: &str, token: Option<&str>) -> AppResult<String>;

    /// start a segment fetch, the body is handed back as a stream and never buffered
    async fn fetch_segment(
        &self,
        url: &str,
        token: Option<&str>,
        range: Option<HeaderValue>,
    ) -> AppResult<UpstreamSegment>;
}

pub struct UpstreamService {
    http: reqwest::Client,
    timeout: Duration,
}

impl UpstreamService {
    pub fn new(identity: &UpstreamIdentity, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .default_headers(identity.header_map()?)
            .connect_timeout(timeout)
            // applies per read, so a long segment that keeps flowing is never cut off
            .read_timeout(timeout)
            .build()?;

        Ok(Self { http, timeout })
    }

    fn request(&self, url: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        let request_builder = self.http.get(url);
        match token {
            Some(token) => request_builder.bearer_auth(token),
            None => request_builder,
        }
    }

    fn decode_body(content_encoding: Option<&str>, bytes: Bytes) -> AppResult<Vec<u8>> {
        match content_encoding {
            Some("zstd") => {
                debug!("Decompressing zstd-encoded manifest");
                zstd::decode_all(&bytes[..]).map_err(|e| {
                    error!("Failed to decompress zstd: {}", e);
                    Error::Internal("Failed to decompress manifest".to_string())
                })
            }
            Some("gzip") => {
                debug!("Decompressing gzip-encoded manifest");
                let mut decoder = GzDecoder::new(&bytes[..]);
                let mut decomp: Vec<u8> = Vec::new();
                decoder.read_to_end(&mut decomp).map_err(|e| {
                    error!("Failed to decompress gzip: {}", e);
                    Error::Internal("Failed to decompress manifest".to_string())
                })?;
                Ok(decomp)
            }
            _ => Ok(bytes.to_vec()),
        }
    }

    fn header(headers: &HeaderMap, name: header::HeaderName) -> Option<HeaderValue> {
        headers.get(name).cloned()
    }
}

#[async_trait::async_trait]
impl UpstreamServiceTrait for UpstreamService {
    async fn fetch_manifest(&self, url: &str, token: Option<&str>) -> AppResult<String> {
        debug!("Fetching manifest: {}", url);

        let response = self
            .request(url, token)
            .header(header::ACCEPT_ENCODING, MANIFEST_ACCEPT_ENCODING)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::transport("Failed to fetch manifest", &e))?;

        let status = response.status();
        debug!("Manifest upstream responded with {}", status);

        if !status.is_success() {
            // the body is usually a cloudflare page, not worth logging in full
            return Err(Error::UpstreamFetch { status });
        }

        let content_encoding = response
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::transport("Failed to read manifest", &e))?;

        let decoded = Self::decode_body(content_encoding.as_deref(), bytes)?;
        debug!("Manifest body is {} bytes", decoded.len());

        let text = String::from_utf8(decoded).map_err(|e| {
            error!("Manifest is not valid UTF-8: {}", e);
            Error::Internal("Manifest is not valid UTF-8".to_string())
        })?;

        if text.starts_with('\u{feff}') {
            debug!("Dropping byte order mark from manifest");
            return Ok(strip_bom(&text).to_string());
        }

        Ok(text)
    }

    async fn fetch_segment(
        &self,
        url: &str,
        token: Option<&str>,
        range: Option<HeaderValue>,
    ) -> AppResult<UpstreamSegment> {
        debug!("Fetching segment: {} (range: {:?})", url, range);

        // segments go out exactly as the origin sent them
        let mut request_builder = self
            .request(url, token)
            .header(header::ACCEPT_ENCODING, "identity");
        if let Some(range) = range {
            request_builder = request_builder.header(header::RANGE, range);
        }

        let response = request_builder
            .send()
            .await
            .map_err(|e| Error::transport("Failed to fetch segment", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamFetch { status });
        }

        let headers = response.headers();
        Ok(UpstreamSegment {
            status,
            content_type: Self::header(headers, header::CONTENT_TYPE),
            content_length: Self::header(headers, header::CONTENT_LENGTH),
            content_range: Self::header(headers, header::CONTENT_RANGE),
            body: response.bytes_stream().boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{Compression, write::GzEncoder};

    use super::*;

    const MANIFEST: &str = "#EXTM3U\n#EXT-X-VERSION:3\nseg1.ts\n";

    #[test]
    fn decodes_gzip_manifest() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(MANIFEST.as_bytes()).unwrap();
        let compressed = Bytes::from(encoder.finish().unwrap());

        let decoded = UpstreamService::decode_body(Some("gzip"), compressed).unwrap();
        assert_eq!(decoded, MANIFEST.as_bytes());
    }

    #[test]
    fn decodes_zstd_manifest() {
        let compressed = Bytes::from(zstd::encode_all(MANIFEST.as_bytes(), 3).unwrap());

        let decoded = UpstreamService::decode_body(Some("zstd"), compressed).unwrap();
        assert_eq!(decoded, MANIFEST.as_bytes());
    }

    #[test]
    fn garbage_gzip_is_an_internal_error() {
        let result = UpstreamService::decode_body(Some("gzip"), Bytes::from_static(b"nope"));
        assert!(matches!(result, Err(Error::Internal(_))));
    }
}
