use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::context::AppContext;
use crate::query::{ListQuery, Listing, SortKey, SortOrder};
use crate::refresh::RefreshStatus;
use crate::topic::Topic;

/// Upper bound for `limit` so one request cannot ask for an unbounded copy.
pub const MAX_LIMIT: usize = 500;

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/topics", get(list_topics))
        .route("/topics/{id}", get(get_topic))
        .route("/api/v1/topics", get(legacy_topics))
        .route("/status", get(status))
        .route("/admin/refresh", post(admin_refresh))
        .layer(CorsLayer::very_permissive())
        .with_state(ctx)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "topic not found", "id": id })),
            )
                .into_response(),
        }
    }
}

/// Raw query string values; everything is parsed in `into_query` so every
/// bad parameter gets the same JSON 400.
#[derive(Debug, Deserialize)]
struct TopicsParams {
    min_score: Option<String>,
    q: Option<String>,
    sort: Option<String>,
    order: Option<String>,
    limit: Option<String>,
}

impl TopicsParams {
    fn into_query(self) -> Result<ListQuery, ApiError> {
        let sort = param(self.sort, |s| s.parse::<SortKey>())?;
        let order = param(self.order, |s| s.parse::<SortOrder>())?.unwrap_or_default();
        let min_score = param(self.min_score, |s| {
            s.parse::<i64>()
                .map_err(|_| format!("min_score must be an integer, got {s:?}"))
        })?;
        let limit = param(self.limit, |s| {
            s.parse::<usize>()
                .map_err(|_| format!("limit must be a non-negative integer, got {s:?}"))
        })?;
        Ok(ListQuery {
            min_score,
            keyword: self.q,
            sort,
            order,
            limit: Some(limit.unwrap_or(MAX_LIMIT).min(MAX_LIMIT)),
        })
    }
}

/// Blank values count as absent.
fn param<T>(
    raw: Option<String>,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<Option<T>, ApiError> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse)
        .transpose()
        .map_err(ApiError::BadRequest)
}

async fn list_topics(
    State(ctx): State<AppContext>,
    params: Result<Query<TopicsParams>, QueryRejection>,
) -> Result<Json<Listing>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let q = params.into_query()?;
    Ok(Json(ctx.query.list(&q)))
}

async fn get_topic(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Topic>, ApiError> {
    ctx.query.get(&id).map(Json).ok_or(ApiError::NotFound(id))
}

/// Bare array in snapshot order, the shape the web UI consumes.
async fn legacy_topics(State(ctx): State<AppContext>) -> Json<Vec<Topic>> {
    let snap = ctx.query.snapshot();
    Json(snap.topics().to_vec())
}

#[derive(Serialize)]
struct StatusOut {
    generation: u64,
    fetched_at: Option<DateTime<Utc>>,
    topics: usize,
    refresh_interval_secs: u64,
    refresh: RefreshStatus,
}

async fn status(State(ctx): State<AppContext>) -> Json<StatusOut> {
    let snap = ctx.store.current();
    Json(StatusOut {
        generation: snap.generation,
        fetched_at: snap.fetched_at,
        topics: snap.len(),
        refresh_interval_secs: ctx.config.refresh_interval_secs,
        refresh: ctx.refresh.status(),
    })
}

async fn admin_refresh(State(ctx): State<AppContext>) -> impl IntoResponse {
    ctx.refresh.request_refresh();
    tracing::info!(target: "api", "manual refresh requested");
    (StatusCode::ACCEPTED, Json(json!({ "requested": true })))
}
