//! Axum service for CMS webhooks and the public search API.

mod search_api;
mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Json, Router,
};
use brewbook_search::{AlgoliaProvider, SearchIndexService};
use brewbook_storage::HttpFetcher;
use brewbook_sync::{SeedConfig, SeedPipeline, Secret, StoryIndexer};
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;
use tracing::info;

pub use search_api::{SearchHit, SearchPage, SearchParams, DEFAULT_HITS_PER_PAGE, MAX_HITS_PER_PAGE, MAX_PAGE};
pub use webhook::{client_ip, sign_body, verify_signature, WebhookError, SIGNATURE_HEADER};

pub const CRATE_NAME: &str = "brewbook-web";

#[derive(Clone, Default)]
pub struct AppState {
    pub webhook_secret: Option<Secret>,
    /// Runs story syncs for accepted webhooks.
    pub indexer: Option<Arc<StoryIndexer>>,
    /// Search-key index used by `/api/search`.
    pub search: Option<Arc<SearchIndexService>>,
}

impl AppState {
    pub fn new(webhook_secret: Option<Secret>) -> Self {
        Self {
            webhook_secret,
            ..Default::default()
        }
    }

    pub fn with_indexer(mut self, indexer: StoryIndexer) -> Self {
        self.indexer = Some(Arc::new(indexer));
        self
    }

    pub fn with_search(mut self, search: Arc<SearchIndexService>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn from_config(config: &SeedConfig) -> anyhow::Result<Self> {
        let pipeline = SeedPipeline::from_config(config, None)?;
        let mut state = Self::new(config.webhook_secret.clone()).with_indexer(pipeline.story_indexer());
        if let Some(search_config) = config.search.search_config() {
            let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
            let provider = AlgoliaProvider::new(search_config, http);
            state = state.with_search(Arc::new(SearchIndexService::new(Box::new(provider))));
        }
        Ok(state)
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/webhooks/storyblok", post(webhook::storyblok_webhook_handler))
        .route("/api/search", get(search_api::search_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "webhook service listening");
    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SeedConfig::from_env()?;
    let state = AppState::from_config(&config)?;
    serve(state, config.web_port).await
}

async fn root_handler() -> Json<JsonValue> {
    Json(json!({ "message": "Brewbook Webhook Service is running" }))
}

async fn health_handler() -> Json<JsonValue> {
    Json(json!({ "status": "healthy", "service": "brewbook-webhook" }))
}
