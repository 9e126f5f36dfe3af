use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

pub type AppResult<T> = Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Missing required query parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// origin answered, just not with a 2xx
    #[error("Upstream responded with status {status}")]
    UpstreamFetch { status: StatusCode },

    /// origin never answered: dns, tls, refused connection, timeout or a body cut short
    #[error("{message}")]
    Transport {
        message: String,
        details: Option<String>,
    },

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// builds a transport error out of a reqwest failure, the source chain goes into details
    pub fn transport(context: &str, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("{}: upstream timed out", context)
        } else {
            format!("{}: {}", context, err)
        };

        let mut details = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            details.push(cause.to_string());
            source = cause.source();
        }

        Error::Transport {
            message,
            details: (!details.is_empty()).then(|| details.join(": ")),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingParameter(_) | Error::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Error::UpstreamFetch { status } => *status,
            Error::Transport { .. } | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            Error::MissingParameter(_) | Error::InvalidParameter(_) => json!({
                "error": "Bad request",
                "message": self.to_string(),
            }),
            Error::UpstreamFetch { status } => {
                // 5xx means the origin itself is broken, 4xx means it didn't like us
                let error = if status.is_server_error() {
                    error!("Upstream server failure: {}", status);
                    "Upstream server error"
                } else {
                    warn!("Upstream rejected request: {}", status);
                    "Upstream rejected request"
                };
                json!({
                    "error": error,
                    "status": status.as_u16(),
                })
            }
            Error::Transport { message, details } => {
                error!("Transport failure: {} ({:?})", message, details);
                match details {
                    Some(details) => json!({
                        "error": "Failed to fetch stream",
                        "message": message,
                        "details": details,
                    }),
                    None => json!({
                        "error": "Failed to fetch stream",
                        "message": message,
                    }),
                }
            }
            Error::Internal(message) => {
                error!("Internal error: {}", message);
                json!({
                    "error": "Internal server error",
                    "message": message,
                })
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Plain text rendering for the segment relay, players don't care about json bodies there and
/// anything that isn't a bad request collapses into a 500.
#[derive(Debug)]
pub struct RelayError(pub Error);

impl From<Error> for RelayError {
    fn from(err: Error) -> Self {
        RelayError(err)
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            bad @ (Error::MissingParameter(_) | Error::InvalidParameter(_)) => {
                (StatusCode::BAD_REQUEST, bad.to_string())
            }
            other => {
                error!("Segment relay failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Segment relay failed: {}", other),
                )
            }
        };

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
