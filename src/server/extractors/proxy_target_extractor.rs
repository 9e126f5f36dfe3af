use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;
use tracing::debug;

use crate::server::error::Error;

#[derive(Deserialize)]
struct ProxyQuery {
    url: Option<String>,
    token: Option<String>,
}

/// the `url` and optional `token` query parameters both proxy endpoints take
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    pub url: String,
    pub token: Option<String>,
}

impl ProxyTarget {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl<S> FromRequestParts<S> for ProxyTarget
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // a query string that doesn't even deserialize is the same as no url at all
        let Query(query): Query<ProxyQuery> = Query::from_request_parts(parts, state)
            .await
            .unwrap_or(Query(ProxyQuery {
                url: None,
                token: None,
            }));

        let url = query
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(Error::MissingParameter("url"))?;

        // empty token means no token, otherwise it's forwarded untouched
        let token = query.token.filter(|t| !t.is_empty());

        debug!("Proxy target: {} (token: {})", url, token.is_some());

        Ok(ProxyTarget { url, token })
    }
}
