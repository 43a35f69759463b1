use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::api::api_router;
use crate::artifact::ArtifactStrategy;
use crate::config::Config;
use crate::error::Result;
use crate::store::Store;
use crate::webhooks::WebhookDispatcher;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub artifacts: Arc<dyn ArtifactStrategy>,
    pub webhooks: WebhookDispatcher,
    pub config: Config,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        artifacts: Arc<dyn ArtifactStrategy>,
        config: Config,
    ) -> Result<Self> {
        let webhooks = WebhookDispatcher::new(
            Arc::clone(&store),
            Duration::from_secs(config.webhooks.timeout_secs),
        )?;
        Ok(Self {
            store,
            artifacts,
            webhooks,
            config,
        })
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_router())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
