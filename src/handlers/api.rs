use crate::{
    aggregator::MonthWindow,
    auth::Owner,
    error::LinkError,
    models::{DashboardSummary, Link, LinkWithStats},
    store::ShortenOutcome,
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

// ── Request / response types ───────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateLinkRequest {
    url: String,
    /// Mint a fresh code even if this owner already shortened the same URL.
    #[serde(default)]
    create_new: bool,
}

#[derive(Deserialize)]
pub struct UpdateLinkRequest {
    original_url: String,
}

#[derive(Deserialize)]
pub struct StatsQuery {
    months: Option<u32>,
}

#[derive(Serialize)]
struct LinkResponse {
    success: bool,
    created: bool,
    short_url: String,
    #[serde(flatten)]
    link: Link,
}

// ── Errors ─────────────────────────────────────────────────────────────────

/// Renders a `LinkError` as the `{success, error}` JSON shape the dashboard
/// front-end expects.
pub struct ApiError(pub LinkError);

impl From<LinkError> for ApiError {
    fn from(e: LinkError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            LinkError::InvalidUrl(msg) => (StatusCode::BAD_REQUEST, format!("Invalid URL: {msg}")),
            LinkError::NotFound => (StatusCode::NOT_FOUND, "Link not found.".to_owned()),
            LinkError::Forbidden => (
                StatusCode::FORBIDDEN,
                "You do not own this link.".to_owned(),
            ),
            other => {
                tracing::error!("Request failed: {:?}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error.".to_owned(),
                )
            }
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Handlers ───────────────────────────────────────────────────────────────

/// POST /api/links
pub async fn create_link(
    owner: Owner,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateLinkRequest>,
) -> ApiResult<Response> {
    let (link, outcome) = if body.create_new {
        let link = state.store.create(&body.url, owner.as_str()).await?;
        (link, ShortenOutcome::Created)
    } else {
        state.store.shorten(&body.url, owner.as_str()).await?
    };

    let created = outcome == ShortenOutcome::Created;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    let body = LinkResponse {
        success: true,
        created,
        short_url: state.config.short_url(&link.short_code),
        link,
    };
    Ok((status, Json(body)).into_response())
}

/// GET /api/links
pub async fn list_links(
    owner: Owner,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let links = state.store.list_by_owner(owner.as_str()).await?;
    let totals = state.aggregator.totals_by_link(owner.as_str()).await?;

    let links: Vec<LinkWithStats> = links
        .into_iter()
        .map(|link| {
            let click_count = totals.get(&link.short_code).copied().unwrap_or(0);
            LinkWithStats { link, click_count }
        })
        .collect();

    Ok(Json(json!({ "success": true, "links": links })))
}

/// POST /api/links/:code
pub async fn update_link(
    owner: Owner,
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<UpdateLinkRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let link = state
        .store
        .update(&code, owner.as_str(), &body.original_url)
        .await?;

    Ok(Json(json!({
        "success": true,
        "original_url": link.original_url,
    })))
}

/// DELETE /api/links/:code
pub async fn delete_link(
    owner: Owner,
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.delete(&code, owner.as_str()).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/links/:code/stats?months=N
pub async fn link_stats(
    owner: Owner,
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let link = state.store.fetch_owned(&code, owner.as_str()).await?;

    let months = query
        .months
        .unwrap_or(state.config.dashboard_months)
        .clamp(1, 120);
    let window = MonthWindow::trailing(Utc::now(), months);

    let total = state.aggregator.totals_for_link(&link.short_code).await?;
    let monthly = state
        .aggregator
        .monthly_series_for_link(&link.short_code, window)
        .await?;

    Ok(Json(json!({
        "success": true,
        "code": link.short_code,
        "total_clicks": total,
        "monthly": monthly,
    })))
}

/// GET /api/dashboard
pub async fn dashboard(
    owner: Owner,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DashboardSummary>> {
    let summary = state
        .aggregator
        .dashboard(owner.as_str(), Utc::now())
        .await?;
    Ok(Json(summary))
}
