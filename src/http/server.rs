//! HTTP server exposing the registered APIs

use super::handler::{
    delete_resource, get_resource, get_resources, patch_resource, put_resource, run_query, status_handler,
};
use crate::registry::ApiRegistry;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Routes over a shared registry
pub fn router(registry: Arc<ApiRegistry>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route(
            "/apis/:api/resource",
            get(get_resource).put(put_resource).patch(patch_resource).delete(delete_resource),
        )
        .route("/apis/:api/resources", get(get_resources))
        .route("/apis/:api/query", get(run_query))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(registry)
}

/// HTTP server managing the REST surface
pub struct HttpServer {
    registry: Arc<ApiRegistry>,
    addr: String,
}

impl HttpServer {
    pub fn new(registry: Arc<ApiRegistry>, addr: impl Into<String>) -> Self {
        Self {
            registry,
            addr: addr.into(),
        }
    }

    /// Bind and serve until the process stops
    pub async fn start(&self) -> std::io::Result<()> {
        let app = router(Arc::clone(&self.registry));
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;

        info!("CRAFTS listening on http://{}", listener.local_addr()?);

        axum::serve(listener, app).await
    }
}
