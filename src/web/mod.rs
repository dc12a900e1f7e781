//! Web server module: the read-only status surface.

mod handlers;

pub use handlers::*;

use crate::config::CanaryConfig;
use crate::health::CanaryState;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CanaryConfig>,
    pub state: CanaryState,
}

/// Status web server.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: Arc<CanaryConfig>, state: CanaryState) -> Self {
        Self {
            state: AppState { config, state },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Pages
            .route("/", get(handlers::handle_status_page))
            .route("/config", get(handlers::handle_config_page))
            // API endpoints
            .route("/api/status", get(handlers::handle_status_json))
            .route("/api/config", get(handlers::handle_config_json))
            // Static assets
            .route("/favicon.ico", get(handlers::handle_favicon))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Serve until the process exits.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let http = &self.state.config.http;
        let addr = format!("{}:{}", http.address, http.port);
        let router = self.routes();

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Web server listening on {}", listener.local_addr()?);
        axum::serve(listener, router).await?;

        Ok(())
    }
}
