//! HTTP REST API over the catalogue service.
//!
//! One route per operation. Path and query parameters are coerced here,
//! everything else is validated by [`Scout`], and errors leave as
//! `{"error": {"code", "message"}}` with a status chosen by category.

use std::sync::Arc;

use anime_scout::{
    DetailRecord, EpisodeEntry, ErrorCategory, ListingRecord, Scout, ScoutError, StreamResolution,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};

/// Build the axum Router with all REST endpoints.
pub fn router(scout: Arc<Scout>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/anime/latest", get(latest))
        .route("/anime/details/:id", get(details))
        .route("/anime/episodes/:id", get(episodes))
        .route("/anime/stream/:episode_id", get(stream))
        .route("/anime/search", get(search))
        .layer(cors)
        .with_state(scout)
}

/// Serve until `shutdown` resolves, then return.
pub async fn serve(
    addr: &str,
    scout: Arc<Scout>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(scout);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("REST API listening on http://{addr}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

// ── Errors ──────────────────────────────────────────────────────

/// An error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "E_INVALID_PARAMS",
            message: message.into(),
        }
    }
}

impl From<ScoutError> for ApiError {
    fn from(e: ScoutError) -> Self {
        let (status, code) = match e.category() {
            ErrorCategory::NotFound => (StatusCode::NOT_FOUND, "E_NOT_FOUND"),
            ErrorCategory::BadRequest => (StatusCode::BAD_REQUEST, "E_INVALID_PARAMS"),
            ErrorCategory::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "E_UNAVAILABLE"),
            ErrorCategory::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "E_INTERNAL"),
        };
        Self {
            status,
            code,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ── Parameters ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PageParams {
    page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    value: Option<String>,
}

/// A missing page means the first; anything else must be a positive integer.
fn parse_page(raw: Option<&str>) -> Result<u32, ApiError> {
    let Some(raw) = raw else {
        return Ok(1);
    };
    match raw.trim().parse::<u32>() {
        Ok(0) | Err(_) => Err(ApiError::bad_request(format!(
            "page must be a positive integer, got '{raw}'"
        ))),
        Ok(page) => Ok(page),
    }
}

// ── Handlers ────────────────────────────────────────────────────

async fn health(State(scout): State<Arc<Scout>>) -> Json<Value> {
    let stats = scout.stats().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": {
            "alive": stats.engine_alive,
            "launches": stats.launches,
            "active_sessions": stats.active_sessions
        }
    }))
}

async fn latest(
    State(scout): State<Arc<Scout>>,
    Query(params): Query<PageParams>,
) -> ApiResult<Vec<ListingRecord>> {
    let page = parse_page(params.page.as_deref())?;
    Ok(Json(scout.latest_listing(page).await?))
}

async fn details(State(scout): State<Arc<Scout>>, Path(id): Path<String>) -> ApiResult<DetailRecord> {
    Ok(Json(scout.detail(&id).await?))
}

async fn episodes(State(scout): State<Arc<Scout>>, Path(id): Path<String>) -> ApiResult<Vec<EpisodeEntry>> {
    Ok(Json(scout.episodes(&id).await?))
}

async fn stream(
    State(scout): State<Arc<Scout>>,
    Path(episode_id): Path<String>,
) -> ApiResult<StreamResolution> {
    Ok(Json(scout.stream_resolution(&episode_id).await?))
}

async fn search(
    State(scout): State<Arc<Scout>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<ListingRecord>> {
    let query = params.value.unwrap_or_default();
    Ok(Json(scout.search_listing(&query).await?))
}
