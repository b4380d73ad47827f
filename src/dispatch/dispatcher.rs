//! Request dispatcher.
//!
//! Selects a backend, forwards, evaluates the outcome and retries on a
//! different backend until the attempt bound is reached.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use axum::http::{Request, Response};
use axum::BoxError;
use futures_util::stream::{self, StreamExt};
use tokio::time::{self, Instant};

use crate::config::DispatchConfig;
use crate::dispatch::{DispatchError, ForwardFailure};
use crate::http::request::{replay, request_id};
use crate::load_balancer::{Backend, BackendConnectionGuard, Pool};
use crate::observability::metrics;

/// Outcome of evaluating one attempt.
#[derive(Debug)]
pub enum Verdict {
    /// Hand the response back unchanged.
    Return(Response<Body>),
    /// The backend was demoted; select another.
    Retry,
    /// The backend was demoted and no attempts remain.
    Exhausted,
}

/// Routes requests over a shared pool.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: Arc<Pool>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(pool: Arc<Pool>, config: DispatchConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run a request through SELECT → FORWARD → EVALUATE until it returns,
    /// runs out of alive backends, or exhausts its attempts.
    pub async fn dispatch(&self, request: Request<Body>) -> Result<Response<Body>, DispatchError> {
        let (parts, body) = request.into_parts();
        let body = buffer_body(body, self.config.max_body_bytes).await?;

        let request_id = request_id(&parts.headers);
        let mut attempt = 1;

        loop {
            let backend = self.pool.select(self.config.mode)?;

            tracing::debug!(
                request_id = %request_id,
                backend = %backend.authority(),
                attempt,
                "Forwarding request"
            );

            let outcome = self.forward(&backend, &parts, &body).await;

            match self.evaluate(&backend, attempt, outcome) {
                Verdict::Return(response) => return Ok(response),
                Verdict::Retry => {
                    tracing::info!(request_id = %request_id, attempt, "Retrying on another backend");
                    attempt += 1;
                }
                Verdict::Exhausted => {
                    tracing::warn!(request_id = %request_id, attempts = attempt, "Retries exhausted");
                    return Err(DispatchError::RetriesExhausted { attempts: attempt });
                }
            }
        }
    }

    /// Send one attempt.
    ///
    /// The connection guard and the attempt deadline cover the whole relay:
    /// both move into the response body and end when it finishes, fails or
    /// is dropped. Cancelling this future releases the guard as well.
    async fn forward(
        &self,
        backend: &Arc<Backend>,
        parts: &Parts,
        body: &Bytes,
    ) -> Result<Response<Body>, ForwardFailure> {
        let guard = backend.connection_guard();
        let send = backend.forwarder().forward(replay(parts, body));

        let timeout = self.config.request_timeout();
        let deadline = timeout.map(|limit| Instant::now() + limit);

        let response = match (deadline, timeout) {
            (Some(deadline), Some(limit)) => match time::timeout_at(deadline, send).await {
                Ok(result) => result?,
                Err(_) => return Err(ForwardFailure::Timeout(limit)),
            },
            _ => send.await?,
        };

        let (head, body) = response.into_parts();
        let body = relay_body(body, guard, deadline.zip(timeout));
        Ok(Response::from_parts(head, body))
    }

    /// Classify an attempt and apply its liveness transition.
    ///
    /// Any failure (no status, or a 5xx) marks the backend dead for every
    /// subsequent request until a health probe revives it.
    pub fn evaluate(
        &self,
        backend: &Backend,
        attempt: u32,
        outcome: Result<Response<Body>, ForwardFailure>,
    ) -> Verdict {
        let failure = match outcome {
            Ok(response) if response.status().is_server_error() => {
                ForwardFailure::ServerError(response.status())
            }
            Ok(response) => return Verdict::Return(response),
            Err(failure) => failure,
        };

        let was_alive = backend.set_alive(false);
        tracing::warn!(
            backend = %backend.authority(),
            attempt,
            error = %failure,
            was_alive,
            "Backend failed, marked dead"
        );
        metrics::record_forward_failure(backend.authority(), failure.reason());
        metrics::record_backend_alive(backend.authority(), false);

        if attempt < self.config.max_attempts {
            Verdict::Retry
        } else {
            Verdict::Exhausted
        }
    }
}

/// Buffer the inbound body so it can be replayed on every attempt.
async fn buffer_body(body: Body, limit: usize) -> Result<Bytes, DispatchError> {
    let mut chunks = body.into_data_stream();
    let mut buffered = Vec::new();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(DispatchError::BodyRead)?;
        if buffered.len() + chunk.len() > limit {
            return Err(DispatchError::BodyTooLarge { limit });
        }
        buffered.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(buffered))
}

/// Stream a backend response body, holding `guard` until the stream ends.
///
/// Past the deadline the stream yields an error and stops; the stall
/// counts as a backend failure like any other timeout.
fn relay_body(
    body: Body,
    guard: BackendConnectionGuard,
    deadline: Option<(Instant, std::time::Duration)>,
) -> Body {
    let state = Some((body.into_data_stream(), guard));

    Body::from_stream(stream::unfold(state, move |state| async move {
        let (mut chunks, guard) = state?;

        let next = match deadline {
            Some((deadline, limit)) => match time::timeout_at(deadline, chunks.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let failure = ForwardFailure::Timeout(limit);
                    guard.set_alive(false);
                    tracing::warn!(
                        backend = %guard.authority(),
                        error = %failure,
                        "Response body stalled, backend marked dead"
                    );
                    metrics::record_forward_failure(guard.authority(), failure.reason());
                    metrics::record_backend_alive(guard.authority(), false);
                    let err: BoxError = failure.into();
                    return Some((Err(err), None));
                }
            },
            None => chunks.next().await,
        };

        match next {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((chunks, guard)))),
            Some(Err(e)) => Some((Err(BoxError::from(e)), None)),
            None => None,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectionMode;
    use crate::http::forward::{Forward, ForwardError};
    use axum::http::StatusCode;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use url::Url;

    #[derive(Debug, Clone, Copy)]
    enum Script {
        Status(StatusCode),
        Refused,
        Hang,
        /// Headers arrive, the body never does.
        Stall,
    }

    /// Answers every request per its script and counts calls.
    #[derive(Debug)]
    struct Scripted {
        name: &'static str,
        script: Script,
        calls: AtomicUsize,
    }

    impl Forward for Scripted {
        fn forward(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, ForwardError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self.script;
            let name = self.name;
            Box::pin(async move {
                let body = axum::body::to_bytes(request.into_body(), 1024).await.unwrap_or_default();
                match script {
                    Script::Status(status) => {
                        let mut response = Response::new(Body::from(format!("{name}:{}", body.len())));
                        *response.status_mut() = status;
                        Ok(response)
                    }
                    Script::Refused => Err(ForwardError::Transport("connection refused".into())),
                    Script::Hang => {
                        std::future::pending::<()>().await;
                        unreachable!()
                    }
                    Script::Stall => Ok(Response::new(Body::from_stream(
                        futures_util::stream::pending::<Result<Bytes, std::io::Error>>(),
                    ))),
                }
            })
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        backends: Vec<Arc<Backend>>,
        forwarders: Vec<Arc<Scripted>>,
    }

    impl Fixture {
        fn new(scripts: &[Script], config: DispatchConfig) -> Self {
            let pool = Arc::new(Pool::new());
            let names = ["b1", "b2", "b3", "b4"];
            let mut backends = Vec::new();
            let mut forwarders = Vec::new();
            for (i, script) in scripts.iter().enumerate() {
                let fwd = Arc::new(Scripted {
                    name: names[i],
                    script: *script,
                    calls: AtomicUsize::new(0),
                });
                let url = Url::parse(&format!("http://127.0.0.1:{}", 9000 + i)).unwrap();
                let backend = Arc::new(Backend::new(url, fwd.clone()));
                pool.add_backend(backend.clone());
                backends.push(backend);
                forwarders.push(fwd);
            }
            Self {
                dispatcher: Dispatcher::new(pool, config),
                backends,
                forwarders,
            }
        }

        fn calls(&self) -> Vec<usize> {
            self.forwarders.iter().map(|f| f.calls.load(Ordering::SeqCst)).collect()
        }

        fn connections(&self) -> Vec<usize> {
            self.backends.iter().map(|b| b.active_connections()).collect()
        }
    }

    fn config(mode: SelectionMode, max_attempts: u32) -> DispatchConfig {
        DispatchConfig {
            mode,
            max_attempts,
            request_timeout_ms: 0,
            ..DispatchConfig::default()
        }
    }

    fn get() -> Request<Body> {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    const OK: Script = Script::Status(StatusCode::OK);
    const FAIL: Script = Script::Status(StatusCode::INTERNAL_SERVER_ERROR);

    #[tokio::test]
    async fn test_sequential_round_robin() {
        let fx = Fixture::new(&[OK, OK, OK], config(SelectionMode::RoundRobin, 3));

        let mut bodies = Vec::new();
        for _ in 0..3 {
            let response = fx.dispatcher.dispatch(get()).await.unwrap();
            bodies.push(body_text(response).await);
        }

        assert_eq!(bodies, ["b1:0", "b2:0", "b3:0"]);
        assert_eq!(fx.calls(), [1, 1, 1]);
        assert_eq!(fx.connections(), [0, 0, 0]);
    }

    #[tokio::test]
    async fn test_fails_over_to_healthy_backend() {
        let fx = Fixture::new(&[FAIL, OK], config(SelectionMode::RoundRobin, 3));

        let response = fx.dispatcher.dispatch(get()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "b2:0");

        assert!(!fx.backends[0].is_alive());
        assert!(fx.backends[1].is_alive());
        assert_eq!(fx.calls(), [1, 1]);
        assert_eq!(fx.connections(), [0, 0]);
    }

    #[tokio::test]
    async fn test_all_dead_contacts_nobody() {
        let fx = Fixture::new(&[OK, OK], config(SelectionMode::LeastConnections, 3));
        for b in &fx.backends {
            b.set_alive(false);
        }

        let err = fx.dispatcher.dispatch(get()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoBackendAvailable(_)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(fx.calls(), [0, 0]);
    }

    #[tokio::test]
    async fn test_exhausted_stops_at_max_attempts() {
        let fx = Fixture::new(&[FAIL, FAIL, FAIL], config(SelectionMode::RoundRobin, 2));

        let err = fx.dispatcher.dispatch(get()).await.unwrap_err();
        assert!(matches!(err, DispatchError::RetriesExhausted { attempts: 2 }));
        assert_eq!(fx.calls(), [1, 1, 0]);
        assert!(fx.backends[2].is_alive());
    }

    #[tokio::test]
    async fn test_failed_backend_not_reselected_within_request() {
        let fx = Fixture::new(&[FAIL, Script::Refused, OK], config(SelectionMode::LeastConnections, 3));

        let response = fx.dispatcher.dispatch(get()).await.unwrap();
        assert_eq!(body_text(response).await, "b3:0");
        assert_eq!(fx.calls(), [1, 1, 1]);
        assert!(!fx.backends[0].is_alive());
        assert!(!fx.backends[1].is_alive());
    }

    #[tokio::test]
    async fn test_running_out_of_backends_is_no_backend() {
        let fx = Fixture::new(&[FAIL, FAIL], config(SelectionMode::RoundRobin, 5));

        let err = fx.dispatcher.dispatch(get()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoBackendAvailable(_)));
        assert_eq!(fx.calls(), [1, 1]);
    }

    #[tokio::test]
    async fn test_client_errors_are_success() {
        let fx = Fixture::new(
            &[Script::Status(StatusCode::NOT_FOUND), OK],
            config(SelectionMode::RoundRobin, 3),
        );

        let response = fx.dispatcher.dispatch(get()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(fx.backends[0].is_alive());
        assert_eq!(fx.calls(), [1, 0]);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure_and_releases_connection() {
        let mut cfg = config(SelectionMode::RoundRobin, 2);
        cfg.request_timeout_ms = 50;
        let fx = Fixture::new(&[Script::Hang, OK], cfg);

        let response = fx.dispatcher.dispatch(get()).await.unwrap();
        assert_eq!(body_text(response).await, "b2:0");
        assert!(!fx.backends[0].is_alive());
        assert_eq!(fx.connections(), [0, 0]);
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_releases_connection() {
        let fx = Fixture::new(&[Script::Hang], config(SelectionMode::RoundRobin, 1));

        let dispatch = fx.dispatcher.dispatch(get());
        let result = tokio::time::timeout(Duration::from_millis(50), dispatch).await;
        assert!(result.is_err());
        assert_eq!(fx.connections(), [0]);
        // Cancellation is not a backend failure.
        assert!(fx.backends[0].is_alive());
    }

    #[tokio::test]
    async fn test_body_replayed_on_retry() {
        let fx = Fixture::new(&[FAIL, OK], config(SelectionMode::RoundRobin, 3));
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from("12345"))
            .unwrap();

        let response = fx.dispatcher.dispatch(request).await.unwrap();
        assert_eq!(body_text(response).await, "b2:5");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mut cfg = config(SelectionMode::RoundRobin, 3);
        cfg.max_body_bytes = 4;
        let fx = Fixture::new(&[OK], cfg);
        let request = Request::builder().uri("/").body(Body::from("too long")).unwrap();

        let err = fx.dispatcher.dispatch(request).await.unwrap_err();
        assert!(matches!(err, DispatchError::BodyTooLarge { limit: 4 }));
        assert_eq!(fx.calls(), [0]);
    }

    #[tokio::test]
    async fn test_unreadable_body_is_bad_request() {
        let fx = Fixture::new(&[OK], config(SelectionMode::RoundRobin, 3));
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let request = Request::builder().uri("/").body(Body::from_stream(chunks)).unwrap();

        let err = fx.dispatcher.dispatch(request).await.unwrap_err();
        assert!(matches!(err, DispatchError::BodyRead(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(fx.calls(), [0]);
    }

    #[tokio::test]
    async fn test_streaming_body_holds_connection_until_deadline() {
        let mut cfg = config(SelectionMode::LeastConnections, 3);
        cfg.request_timeout_ms = 50;
        let fx = Fixture::new(&[Script::Stall, OK], cfg);

        let response = fx.dispatcher.dispatch(get()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fx.connections(), [1, 0]);

        // The busy backend is skipped while its body is still in flight.
        let other = fx.dispatcher.dispatch(get()).await.unwrap();
        assert_eq!(body_text(other).await, "b2:0");

        let read = tokio::time::timeout(
            Duration::from_secs(1),
            axum::body::to_bytes(response.into_body(), 1024),
        )
        .await;
        assert!(matches!(read, Ok(Err(_))), "stalled body should end with an error");
        assert_eq!(fx.connections(), [0, 0]);
        assert!(!fx.backends[0].is_alive());
    }

    #[tokio::test]
    async fn test_dropped_response_releases_connection() {
        let fx = Fixture::new(&[Script::Stall], config(SelectionMode::RoundRobin, 1));

        let response = fx.dispatcher.dispatch(get()).await.unwrap();
        assert_eq!(fx.connections(), [1]);

        drop(response);
        assert_eq!(fx.connections(), [0]);
        assert!(fx.backends[0].is_alive());
    }

    #[test]
    fn test_evaluate_transitions() {
        let fx = Fixture::new(&[OK], config(SelectionMode::RoundRobin, 2));
        let b = &fx.backends[0];

        let ok = fx.dispatcher.evaluate(b, 1, Ok(Response::new(Body::empty())));
        assert!(matches!(ok, Verdict::Return(_)));
        assert!(b.is_alive());

        let retry = fx
            .dispatcher
            .evaluate(b, 1, Err(ForwardFailure::Timeout(Duration::from_secs(1))));
        assert!(matches!(retry, Verdict::Retry));
        assert!(!b.is_alive());

        let mut bad = Response::new(Body::empty());
        *bad.status_mut() = StatusCode::BAD_GATEWAY;
        let exhausted = fx.dispatcher.evaluate(b, 2, Ok(bad));
        assert!(matches!(exhausted, Verdict::Exhausted));
    }
}
