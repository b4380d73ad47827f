//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (tracing, request ID)
//! - Own the pool and health monitor lifecycle
//! - Hand every request to the dispatcher

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    response::IntoResponse,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{BalancerConfig, ConfigError};
use crate::dispatch::Dispatcher;
use crate::health::HealthMonitor;
use crate::http::forward::http_client;
use crate::http::request::{append_forwarded_for, request_id};
use crate::load_balancer::Pool;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// HTTP server for the load balancer.
pub struct HttpServer {
    router: Router,
    config: BalancerConfig,
    pool: Arc<Pool>,
}

impl HttpServer {
    /// Create a new HTTP server. Invalid backend addresses are fatal.
    pub fn new(config: BalancerConfig) -> Result<Self, ConfigError> {
        let client = http_client();
        let pool = Arc::new(Pool::from_addresses(&config.backends, &client)?);

        let dispatcher = Arc::new(Dispatcher::new(pool.clone(), config.dispatch.clone()));
        let router = Self::build_router(AppState { dispatcher });

        Ok(Self {
            router,
            config,
            pool,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.pool.len(),
            mode = %self.config.dispatch.mode,
            "HTTP server starting"
        );

        let health = if self.config.health_check.enabled {
            Some(HealthMonitor::new(self.pool.clone(), self.config.health_check.clone()).start())
        } else {
            tracing::info!("Active health checks disabled");
            None
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        // Serve with graceful shutdown
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;

        if let Some(task) = health {
            task.stop().await;
        }

        served?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Shared backend pool.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }
}

/// Main proxy handler.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let request_id = request_id(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    append_forwarded_for(request.headers_mut(), client.ip());

    let response = match state.dispatcher.dispatch(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                error = %e,
                "Request failed"
            );
            e.into_response()
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "Request complete"
    );
    metrics::record_request(response.status().as_u16(), start);
    response
}
