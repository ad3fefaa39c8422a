//! HTTP handlers for the dumpvault daemon. Typed extractors in, typed JSON
//! (or a plain status code) out: ad hoc `(StatusCode, Json<Value>)` error
//! bodies, no stack traces.

use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use dumpvault_core::{EngineError, Item};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

type ErrorResponse = (StatusCode, Json<serde_json::Value>);

/// Run a blocking `Engine` call (disk I/O, SQLite) on the blocking thread
/// pool rather than the handler's async task, so one slow ingest doesn't
/// stall the reactor. Panics inside `f` surface as `Corruption`, which is
/// as much detail as an HTTP client should ever see.
async fn blocking<F, T>(f: F) -> Result<T, ErrorResponse>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(engine_error),
        Err(_) => Err(engine_error(EngineError::Corruption("engine task panicked".into()))),
    }
}

/// Map the engine's error taxonomy onto HTTP status codes, one line per
/// error reason, never a stack trace.
fn engine_error(e: EngineError) -> ErrorResponse {
    let status = match &e {
        EngineError::InvalidInput(_) | EngineError::FileRejected(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound => StatusCode::NOT_FOUND,
        EngineError::DuplicateId => StatusCode::CONFLICT,
        EngineError::Io(_) | EngineError::Corruption(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::ExtractionFailure(_) | EngineError::Timeout => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.kind(), "reason": e.reason() })))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn api_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "items": state.engine.list().map(|v| v.len()).unwrap_or(0),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct IngestTextBody {
    text: String,
}

pub async fn ingest_text(
    State(state): State<AppState>,
    Json(body): Json<IngestTextBody>,
) -> Result<Json<Item>, ErrorResponse> {
    let engine = state.engine.clone();
    let item = blocking(move || engine.ingest_text(&body.text)).await?;
    Ok(Json(item))
}

#[derive(Deserialize)]
pub struct IngestLinkBody {
    url: String,
    title: Option<String>,
}

pub async fn ingest_link(
    State(state): State<AppState>,
    Json(body): Json<IngestLinkBody>,
) -> Result<Json<Item>, ErrorResponse> {
    let engine = state.engine.clone();
    let item = blocking(move || engine.ingest_link(&body.url, body.title.as_deref())).await?;
    Ok(Json(item))
}

#[derive(Deserialize)]
pub struct IngestFileBody {
    path: String,
}

pub async fn ingest_file(
    State(state): State<AppState>,
    Json(body): Json<IngestFileBody>,
) -> Result<Json<Item>, ErrorResponse> {
    let engine = state.engine.clone();
    let item = blocking(move || engine.ingest_file(std::path::Path::new(&body.path))).await?;
    Ok(Json(item))
}

// ---------------------------------------------------------------------------
// Search / list / delete
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    #[serde(default = "default_k")]
    k: usize,
}

fn default_k() -> usize {
    10
}

#[derive(Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    item: Item,
    similarity: f32,
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, ErrorResponse> {
    let engine = state.engine.clone();
    let hits = blocking(move || engine.search(&params.q, params.k)).await?;
    Ok(Json(hits.into_iter().map(|(item, similarity)| SearchHit { item, similarity }).collect()))
}

pub async fn list_items(State(state): State<AppState>) -> Result<Json<Vec<Item>>, ErrorResponse> {
    let engine = state.engine.clone();
    Ok(Json(blocking(move || engine.list()).await?))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<StatusCode, ErrorResponse> {
    let engine = state.engine.clone();
    blocking(move || engine.delete(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// items_updated notification stream — one-way, engine to subscriber only,
// so the UI never calls back into the engine from within a handler.
// ---------------------------------------------------------------------------

pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.engine.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(item_id) => Some(Ok(Event::default().event("items_updated").data(item_id.to_string()))),
        Err(_lagged) => None, // a lagging subscriber just misses some ids; resync via list()
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
