//! Upstream forwarding.
//!
//! # Responsibilities
//! - Define the per-backend forwarding capability (`Forward`)
//! - Rewrite the request target onto a backend base URL
//! - Send the request over a shared hyper-util client

use std::fmt;
use std::str::FromStr;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderValue, Request, Response, Uri, Version};
use axum::BoxError;
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::http::request::strip_hop_by_hop;

/// Shared HTTP client type used for all backends.
pub type HttpClient = Client<HttpConnector, Body>;

/// Build the shared upstream client.
pub fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// Failure to obtain any response from a backend.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The upstream request could not be constructed.
    #[error("invalid upstream target: {0}")]
    InvalidTarget(#[from] axum::http::Error),

    /// Connect, IO or protocol error talking to the backend.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
}

/// Capability to send one request to one upstream and yield its response.
pub trait Forward: Send + Sync + fmt::Debug {
    fn forward(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, ForwardError>>;
}

/// Forwards requests to a single base URL over HTTP/1.1.
#[derive(Clone)]
pub struct HttpForwarder {
    base_url: Url,
    authority: Authority,
    client: HttpClient,
}

impl fmt::Debug for HttpForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpForwarder")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl HttpForwarder {
    pub fn new(base_url: Url, client: HttpClient) -> Result<Self, ForwardError> {
        let authority = Authority::from_str(&authority_of(&base_url))
            .map_err(|e| ForwardError::InvalidTarget(e.into()))?;
        Ok(Self {
            base_url,
            authority,
            client,
        })
    }

    /// Map an inbound URI onto this backend: scheme and authority replaced,
    /// base path joined in front, query preserved.
    pub fn target_uri(&self, inbound: &Uri) -> Result<Uri, ForwardError> {
        let path = join_paths(self.base_url.path(), inbound.path());
        let path_and_query = match inbound.query() {
            Some(q) => format!("{path}?{q}"),
            None => path,
        };

        let uri = Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(PathAndQuery::from_str(&path_and_query).map_err(axum::http::Error::from)?)
            .build()?;
        Ok(uri)
    }

    async fn send(&self, mut request: Request<Body>) -> Result<Response<Body>, ForwardError> {
        *request.uri_mut() = self.target_uri(request.uri())?;
        *request.version_mut() = Version::HTTP_11;
        strip_hop_by_hop(request.headers_mut());
        if let Ok(host) = HeaderValue::from_str(self.authority.as_str()) {
            request.headers_mut().insert(header::HOST, host);
        }

        let response: Response<Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|e| ForwardError::Transport(e.into()))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl Forward for HttpForwarder {
    fn forward(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, ForwardError>> {
        Box::pin(self.send(request))
    }
}

/// `host:port` for a base URL, with the port defaulted from the scheme.
pub fn authority_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn join_paths(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() || path == "/" {
        return format!("{base}/");
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
