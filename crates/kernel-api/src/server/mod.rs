use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    ApiError, Category, ErrorCode, Finding, SignalPayload, ZoneRegistration, ZoneStateView,
    SCHEMA_VERSION_V1,
};
use kernel_core::{EmitError, RegistrationError, TickEvent, ZoneNotFound};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::{EngineApi, HealthReport};

mod error;
mod routes;
mod util;

pub use error::ServerError;
use error::HttpApiError;
use util::apply_cors_headers;

#[derive(Debug, Clone)]
pub struct AppState {
    api: Arc<EngineApi>,
}

impl AppState {
    pub fn new(api: Arc<EngineApi>) -> Self {
        Self { api }
    }
}

pub async fn serve(addr: SocketAddr, api: Arc<EngineApi>) -> Result<(), ServerError> {
    serve_with_shutdown(addr, api, std::future::pending()).await
}

pub async fn serve_with_shutdown(
    addr: SocketAddr,
    api: Arc<EngineApi>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let app = router(AppState::new(api));

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "http surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/zones",
            post(routes::register_zone).get(routes::list_zones),
        )
        .route("/api/v1/zones/{zone_id}", get(routes::get_zone))
        .route("/api/v1/signals", post(routes::emit_signal))
        .route("/api/v1/findings", get(routes::get_findings))
        .route("/api/v1/health", get(routes::get_health))
        .route("/api/v1/stream", get(routes::stream_events))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}
