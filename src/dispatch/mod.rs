//! Request dispatch subsystem.
//!
//! # State Machine
//! ```text
//! SELECT ──(none alive)──────────────────────────▶ NoBackendAvailable (503)
//!   │
//!   ▼
//! FORWARD (connection count and optional deadline held until the
//!          response body is fully relayed)
//!   │
//!   ▼
//! EVALUATE ──(status < 500)──────────────────────▶ RETURN response as-is
//!   │
//!   │ (transport error / timeout / 5xx: backend marked dead)
//!   ├──(attempts remain)──▶ RETRY ──▶ SELECT
//!   └──(attempts used up)─────────────────────────▶ RetriesExhausted (503)
//! ```
//!
//! # Design Decisions
//! - A failed attempt evicts the backend for all requests, not just this one
//! - Only the health monitor revives a dead backend
//! - Callers only ever see status codes, never internal error detail

use std::time::Duration;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;

use crate::http::forward::ForwardError;
use crate::http::response::plain;
use crate::load_balancer::NoBackendAvailable;

pub mod dispatcher;

pub use dispatcher::{Dispatcher, Verdict};

/// Terminal failure of a dispatched request.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    NoBackendAvailable(#[from] NoBackendAvailable),

    #[error("all {attempts} attempts failed")]
    RetriesExhausted { attempts: u32 },

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The client body could not be read (disconnect, bad framing).
    #[error("failed to read request body: {0}")]
    BodyRead(#[source] axum::Error),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NoBackendAvailable(_) | DispatchError::RetriesExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DispatchError::BodyRead(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response<Body> {
        let message = match self {
            DispatchError::NoBackendAvailable(_) => "Service not available",
            DispatchError::RetriesExhausted { .. } => "Service not available after retries",
            DispatchError::BodyTooLarge { .. } => "Request body too large",
            DispatchError::BodyRead(_) => "Malformed request body",
        };
        plain(self.status(), message)
    }
}

/// One failed forwarding attempt against a backend.
#[derive(Debug, thiserror::Error)]
pub enum ForwardFailure {
    /// No status was obtained.
    #[error(transparent)]
    Transport(#[from] ForwardError),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend answered {0}")]
    ServerError(StatusCode),
}

impl ForwardFailure {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ForwardFailure::Transport(_) => "transport",
            ForwardFailure::Timeout(_) => "timeout",
            ForwardFailure::ServerError(_) => "server_error",
        }
    }
}
