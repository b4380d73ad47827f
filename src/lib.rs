//! HTTP load balancer library.
//!
//! Distributes requests over a fixed pool of upstreams, tracking liveness
//! and in-flight load per backend, and retrying failed attempts elsewhere.

pub mod config;
pub mod dispatch;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;

pub use config::BalancerConfig;
pub use dispatch::{DispatchError, Dispatcher};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::{Backend, Pool};
