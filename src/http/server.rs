//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with a catch-all gateway handler
//! - Wire up middleware (request ID, tracing, timeout)
//! - Bound in-flight requests with a semaphore (`max_connections`)
//! - Buffer request bodies and hand them to the dispatcher
//! - Record request metrics
//! - Serve listeners until the shutdown signal fires

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::http::request::{InternalRequest, X_REQUEST_ID};
use crate::lifecycle::shutdown;
use crate::lifecycle::Gateway;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub max_body_bytes: usize,

    /// In-flight request slots. Requests past the limit wait for one.
    pub slots: Arc<Semaphore>,
}

/// Public HTTP server of the gateway.
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(gateway: &Gateway) -> Self {
        let state = AppState {
            dispatcher: gateway.dispatcher.clone(),
            max_body_bytes: gateway.config.listener.max_body_bytes,
            slots: Arc::new(Semaphore::new(gateway.config.listener.max_connections.max(1))),
        };
        Self {
            router: build_router(&gateway.config, state),
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        serve(listener, self.router, shutdown, "gateway").await
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
fn build_router(config: &GatewayConfig, state: AppState) -> Router {
    let request_id = HeaderName::from_static(X_REQUEST_ID);
    Router::new()
        .route("/", any(gateway_handler))
        .route("/{*path}", any(gateway_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        )
}

/// Serve `router` on `listener` with graceful shutdown.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: broadcast::Receiver<()>,
    name: &'static str,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(server = name, address = %addr, "HTTP server starting");

    let app = router.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait(shutdown))
        .await?;

    tracing::info!(server = name, "HTTP server stopped");
    Ok(())
}

/// Catch-all handler: every path goes through the dispatcher.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let Ok(_slot) = state.slots.acquire().await else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Request slots closed").into_response();
    };
    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(method = %method, path = %parts.uri.path(), error = %e, "Rejecting request body");
            metrics::record_request(&method, StatusCode::PAYLOAD_TOO_LARGE.as_u16(), start_time);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let request = InternalRequest::from_parts(&parts, addr, body);
    tracing::debug!(
        request_id = %request.header(X_REQUEST_ID).unwrap_or("unknown"),
        method = %method,
        url = %request.url,
        "Dispatching request"
    );

    let response = state.dispatcher.handle(request).await;
    metrics::record_request(&method, response.status.as_u16(), start_time);
    response.into_response()
}
