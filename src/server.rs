//! HTTP surface of the exporter
//!
//! # Endpoints
//!
//! - `GET /` - Landing page linking to the metrics path
//! - `GET <metrics path>` - Text exposition, one ingestion cycle per request
//! - `GET /health` - Health check
//!
//! Scrapes always answer `200 OK`; upstream failures only show up in the logs
//! and in the `<ns>_up` metric.

use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::signal;

use crate::scrape::ScrapeHandler;

/// Path of the health endpoint
pub const HEALTH_PATH: &str = "/health";

// =============================================================================
// Application State
// =============================================================================

/// State shared by every request
#[derive(Debug)]
pub struct AppState {
    /// Describe/collect handler
    pub handler: ScrapeHandler,
    /// Title shown on the landing page
    pub title: &'static str,
    /// Exposition path
    pub metrics_path: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests
    pub status: &'static str,
    /// Exporter version
    pub version: &'static str,
    /// Upstream the exporter reads from
    pub upstream: String,
}

// =============================================================================
// Handlers
// =============================================================================

async fn landing(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>{title}</title></head>\n\
         <body>\n\
         <h1>{title}</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        title = state.title,
        path = state.metrics_path,
    ))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (body, content_type) = state.handler.export_http().await;
    ([(header::CONTENT_TYPE, content_type)], body)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        upstream: state.handler.upstream().to_string(),
    })
}

// =============================================================================
// Router
// =============================================================================

/// Build the router; the metrics path must already be validated
pub fn build_router(state: Arc<AppState>) -> Router {
    let metrics_path = state.metrics_path.clone();
    Router::new()
        .route("/", get(landing))
        .route(&metrics_path, get(metrics))
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::ingestion::{IngestOutcome, Ingestor};
    use crate::registry::MetricRegistry;
    use async_trait::async_trait;
    use std::net::SocketAddr;

    struct IdleIngestor;

    #[async_trait]
    impl Ingestor for IdleIngestor {
        fn upstream(&self) -> &str {
            "idle"
        }

        async fn ingest(&self) -> Result<IngestOutcome> {
            Ok(IngestOutcome::default())
        }
    }

    async fn spawn_exporter(metrics_path: &str) -> SocketAddr {
        let handler =
            ScrapeHandler::new("idle", MetricRegistry::new(), Arc::new(IdleIngestor)).unwrap();
        let state = Arc::new(AppState {
            handler,
            title: "Idle Exporter",
            metrics_path: metrics_path.to_string(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_landing_page() {
        let addr = spawn_exporter("/prom").await;
        let body = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("<title>Idle Exporter</title>"));
        assert!(body.contains("<a href=\"/prom\">"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let addr = spawn_exporter("/prom").await;
        let response = reqwest::get(format!("http://{}/prom", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            crate::scrape::TEXT_CONTENT_TYPE
        );
        let body = response.text().await.unwrap();
        assert!(body.contains("idle_up 1"));

        let missing = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let addr = spawn_exporter("/metrics").await;
        let body = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let health: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["upstream"], "idle");
    }
}
