//! JSON HTTP API over the ingestion pipeline and retrieval engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Semantic query over committed shards |
//! | `POST` | `/ingest` | Ingest one or more feeds |
//! | `GET`  | `/sources` | List committed shards |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one body shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `embedding_error`
//! (502), `retrieval_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::blob::create_blob_store;
use crate::config::Config;
use crate::error::Error;
use crate::ingest::{build_pipeline, IngestPipeline};
use crate::models::{IngestSummary, SearchResult, ShardMeta};
use crate::retrieval::RetrievalEngine;
use crate::store::ShardStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pipeline: Arc<IngestPipeline>,
    engine: Arc<RetrievalEngine>,
    store: Arc<ShardStore>,
}

/// Start the HTTP server on the configured bind address.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let blob = create_blob_store(&config.store)?;
    let store = Arc::new(ShardStore::new(blob));
    let pipeline = Arc::new(build_pipeline(&config, store.clone())?);
    let embedder = crate::embedding::create_embedder(&config.embedding)?;
    let engine = Arc::new(RetrievalEngine::new(
        store.clone(),
        embedder,
        config.embedding.clone(),
        config.retrieval.dedupe_links,
    ));

    let state = AppState {
        config: config.clone(),
        pipeline,
        engine,
        store,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/search", post(handle_search))
        .route("/ingest", post(handle_ingest))
        .route("/sources", get(handle_sources))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "server listening");
    println!("syndex server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::ShardNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Error::EmbeddingBackend { .. } => (StatusCode::BAD_GATEWAY, "embedding_error"),
            Error::RetrievalUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "retrieval_unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    /// Defaults to `retrieval.top_k` from config.
    top_k: Option<usize>,
    /// Restrict candidates to shards of this feed URL.
    #[serde(alias = "source")]
    source_url: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let top_k = req.top_k.unwrap_or(state.config.retrieval.top_k);
    let results = state
        .engine
        .search(&req.query, top_k, req.source_url.as_deref())
        .await?;
    Ok(Json(SearchResponse { results }))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    #[serde(alias = "feeds")]
    urls: Vec<String>,
    max_articles: Option<usize>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestSummary>, AppError> {
    if req.urls.is_empty() {
        return Err(Error::Validation("urls must not be empty".to_string()).into());
    }
    let cap = req.max_articles.or(state.config.feed.max_articles);
    let summary = state.pipeline.ingest_feeds(&req.urls, cap).await;
    Ok(Json(summary))
}

// ============ GET /sources ============

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<ShardMeta>,
}

async fn handle_sources(State(state): State<AppState>) -> Result<Json<SourcesResponse>, AppError> {
    let sources = state.store.list_sources().await?;
    Ok(Json(SourcesResponse { sources }))
}
