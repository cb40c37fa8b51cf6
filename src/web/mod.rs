//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::registry::Catalog;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub catalog: Arc<Catalog>,
}

/// Web server for watchpost.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<Store>, catalog: Arc<Catalog>) -> Self {
        Self {
            state: AppState {
                config,
                store,
                catalog,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Monitors
            .route("/api/monitors", get(handlers::handle_get_monitors))
            .route("/api/monitors", post(handlers::handle_save_monitor))
            .route("/api/monitors/{id}", get(handlers::handle_get_monitor))
            .route("/api/monitors/{id}/readings", get(handlers::handle_get_readings))
            .route(
                "/api/monitors/{id}/silences",
                get(handlers::handle_get_active_silences),
            )
            .route(
                "/api/monitors/{id}/subprobes/{name}/samples",
                post(handlers::handle_post_samples),
            )
            // Kinds
            .route("/api/probes", get(handlers::handle_get_probe_kinds))
            .route("/api/probes/{id}/blank", get(handlers::handle_blank_probe))
            .route("/api/targets", get(handlers::handle_get_target_kinds))
            .route("/api/targets/{id}/blank", get(handlers::handle_blank_target))
            .route("/api/sources", get(handlers::handle_get_source_kinds))
            // Silences
            .route("/api/silences", get(handlers::handle_get_silences))
            .route("/api/silences", post(handlers::handle_save_silence))
            .route("/api/silences/{id}", get(handlers::handle_get_silence))
            // Settings
            .route("/api/datasources", get(handlers::handle_get_datasources))
            .route("/api/datasources", post(handlers::handle_save_datasources))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
