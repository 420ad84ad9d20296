//! Readiness reporting
//!
//! Reads only whether the storage connection is alive. Served over HTTP on
//! its own listener, next to the WebSocket acceptor.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::storage::MessageStore;

/// Readiness endpoint path
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Health {
    Healthy,
    Unhealthy,
}

/// Health report served as JSON
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub health: Health,
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.health == Health::Healthy
    }
}

#[derive(Clone)]
pub struct HealthCheck {
    store: Arc<dyn MessageStore>,
    service_name: String,
}

impl HealthCheck {
    pub fn new(store: Arc<dyn MessageStore>, service_name: impl Into<String>) -> Self {
        Self {
            store,
            service_name: service_name.into(),
        }
    }

    pub fn check(&self) -> HealthStatus {
        let health = if self.store.is_alive() {
            Health::Healthy
        } else {
            Health::Unhealthy
        };
        debug!("Health check: {:?}", health);

        HealthStatus {
            health,
            timestamp: Utc::now(),
            service_name: self.service_name.clone(),
        }
    }
}

/// Router exposing `GET /health`
pub fn router(check: HealthCheck) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .with_state(check)
}

/// Returns 200 OK while storage is alive, 503 Service Unavailable otherwise
async fn health_handler(State(check): State<HealthCheck>) -> (StatusCode, Json<HealthStatus>) {
    let status = check.check();
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// Serve the health router on `listener` until `token` is cancelled
pub async fn serve(
    listener: TcpListener,
    check: HealthCheck,
    token: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Health check: http://{}{}", addr, HEALTH_PATH);
    }

    axum::serve(listener, router(check))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}
