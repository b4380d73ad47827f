//! Response construction for balancer-generated replies.
//!
//! Upstream responses pass through untouched (apart from hop-by-hop headers);
//! only failures produced by the balancer itself are built here.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};

/// Short plain-text reply, marked so clients can tell it came from the balancer.
pub fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(format!("{message}\n")));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
