//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → request.rs (X-Forwarded-For, buffered replay)
//!     → [dispatcher picks backend, retries]
//!     → forward.rs (rewrite target, send via hyper-util client)
//!     → response.rs (balancer-generated failures only)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use forward::{Forward, ForwardError, HttpForwarder};
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
