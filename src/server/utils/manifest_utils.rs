use std::borrow::Cow;
use std::fmt;

use tracing::debug;

use crate::server::error::{AppResult, Error};

/// where every rewritten reference gets sent
pub const SEGMENT_ENDPOINT: &str = "/api/proxy/segment";

/// `scheme://host[:port]` plus the directory of the manifest path, no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseLocation(String);

impl BaseLocation {
    pub fn from_source_url(source_url: &str) -> AppResult<Self> {
        if source_url.is_empty() {
            return Err(Error::MissingParameter("url"));
        }

        let parsed = url::Url::parse(source_url).map_err(|e| {
            debug!("Failed to parse manifest url {}: {}", source_url, e);
            Error::InvalidParameter(format!("url is not an absolute URL: {}", e))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidParameter(format!(
                "unsupported url scheme: {}",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidParameter("url has no host".to_string()))?;

        // the port is part of where the relative segments live, dropping it would send them
        // to the wrong server
        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let path = parsed.path();
        let directory = &path[..path.rfind('/').unwrap_or(0)];

        Ok(Self(format!("{}://{}{}", parsed.scheme(), authority, directory)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// plain concatenation, `./` and `../` are left for the origin to deal with
    pub fn resolve(&self, reference: &str) -> String {
        format!("{}/{}", self.0, reference)
    }
}

impl fmt::Display for BaseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// blank lines, tags and comments
    Passthrough,
    /// anything else points at a segment or another playlist
    Reference,
}

impl LineKind {
    pub fn classify(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            Self::Passthrough
        } else {
            Self::Reference
        }
    }
}

/// schemes are case-insensitive, `HTTPS://` is as absolute as `https://`
pub fn is_absolute(reference: &str) -> bool {
    let has_prefix = |prefix: &str| {
        reference
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    };
    has_prefix("http://") || has_prefix("https://")
}

/// a leading utf-8 byte order mark would glue itself onto `#EXTM3U` and turn the header into
/// a bogus reference
pub fn strip_bom(body: &str) -> &str {
    body.strip_prefix('\u{feff}').unwrap_or(body)
}

/// builds the relay url for an already resolved reference
pub fn proxied_segment_url(resolved: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => format!(
            "{}?url={}&token={}",
            SEGMENT_ENDPOINT,
            urlencoding::encode(resolved),
            urlencoding::encode(token)
        ),
        None => format!("{}?url={}", SEGMENT_ENDPOINT, urlencoding::encode(resolved)),
    }
}

/// Rewrites an HLS playlist so every reference points back at the segment relay.
///
/// The transform is line-for-line: splitting happens on `\n` only, so a manifest with N lines
/// comes back with N lines, and passthrough lines (including any `\r`) are untouched.
/// Key URIs inside `#EXT-X-KEY` and friends are not rewritten.
#[derive(Debug, Clone)]
pub struct ManifestRewriter {
    base: BaseLocation,
    token: Option<String>,
}

impl ManifestRewriter {
    pub fn new(source_url: &str, token: Option<&str>) -> AppResult<Self> {
        Ok(Self {
            base: BaseLocation::from_source_url(source_url)?,
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
        })
    }

    pub fn base(&self) -> &BaseLocation {
        &self.base
    }

    pub fn rewrite_line<'a>(&self, line: &'a str) -> Cow<'a, str> {
        match LineKind::classify(line) {
            LineKind::Passthrough => Cow::Borrowed(line),
            LineKind::Reference => {
                let trimmed = line.trim();
                let resolved = if is_absolute(trimmed) {
                    Cow::Borrowed(trimmed)
                } else {
                    Cow::Owned(self.base.resolve(trimmed))
                };
                Cow::Owned(proxied_segment_url(&resolved, self.token.as_deref()))
            }
        }
    }

    pub fn lines<'a>(&'a self, body: &'a str) -> impl Iterator<Item = Cow<'a, str>> + 'a {
        strip_bom(body)
            .split('\n')
            .map(move |line| self.rewrite_line(line))
    }

    pub fn rewrite(&self, body: &str) -> String {
        let mut out = String::with_capacity(body.len() * 2);
        for (i, line) in self.lines(body).enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&line);
        }
        out
    }
}

/// one shot helper for the stream handler
pub fn rewrite_manifest(body: &str, source_url: &str, token: Option<&str>) -> AppResult<String> {
    let rewriter = ManifestRewriter::new(source_url, token)?;
    debug!("Rewriting manifest against base {}", rewriter.base());
    Ok(rewriter.rewrite(body))
}
