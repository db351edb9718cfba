//! Thin HTTP and WebSocket surface.
//!
//! Handlers parse and validate the request, call one orchestrator, and map
//! typed errors to statuses through [`ApiError`]. No business logic lives
//! here.

mod error;

pub use error::ApiError;

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::auth::AuthValidator;
use crate::hub::{HubHandle, serve_socket};
use crate::model::{
    DEFAULT_SEARCH_LIMIT, Principal, SearchFilters, SearchQuery, SearchSort, SourceId, Track,
};
use crate::service::{CacheAdmin, NotifyService, SearchService, StreamService, TrackService};

/// Shared handler state; everything is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Search orchestrator.
    pub search: Arc<SearchService>,
    /// Stream orchestrator.
    pub stream: Arc<StreamService>,
    /// Track detail orchestrator.
    pub tracks: Arc<TrackService>,
    /// Notification orchestrator; absent when the bus is not configured.
    pub notify: Option<NotifyService>,
    /// Cache administration.
    pub cache_admin: CacheAdmin,
    /// Delegating token validator.
    pub auth: Arc<AuthValidator>,
    /// Real-time hub handle.
    pub hub: HubHandle,
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/search", get(search))
        .route("/stream/:track_id", get(public_stream))
        .route("/tracks/:source/:id", get(track_detail))
        .route("/ws", get(websocket))
        .route("/api/stream/:track_id", get(authenticated_stream))
        .route("/api/notify", post(notify))
        .route("/api/cache", delete(invalidate_cache))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    page: Option<u32>,
    limit: Option<u32>,
    genre: Option<String>,
    min_duration: Option<u32>,
    max_duration: Option<u32>,
    sort_by: Option<String>,
    order: Option<String>,
}

impl SearchParams {
    fn into_query(self) -> SearchQuery {
        let mut query = SearchQuery::new(
            self.q,
            self.page.unwrap_or(1),
            self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        )
        .with_filters(SearchFilters {
            genre: self.genre,
            min_duration: self.min_duration,
            max_duration: self.max_duration,
        });
        if self.sort_by.is_some() || self.order.is_some() {
            let default = SearchSort::default();
            query = query.with_sort(SearchSort {
                by: self.sort_by.unwrap_or(default.by),
                order: self.order.unwrap_or(default.order),
            });
        }
        query
    }
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<crate::model::SearchResult>, ApiError> {
    let result = state.search.search(params.into_query()).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    source: String,
}

async fn public_stream(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
    Query(params): Query<StreamParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source: SourceId = params.source.parse()?;
    let descriptor = state.stream.get_stream(&track_id, source, true).await?;
    Ok(Json(json!({ "stream_url": descriptor.url })))
}

async fn authenticated_stream(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let _principal = authenticate(&state, &headers).await?;
    let source: SourceId = params.source.parse()?;
    let descriptor = state.stream.get_stream(&track_id, source, false).await?;
    Ok(Json(json!({ "stream_url": descriptor.url })))
}

async fn track_detail(
    State(state): State<AppState>,
    Path((source, id)): Path<(String, String)>,
) -> Result<Json<Track>, ApiError> {
    let source: SourceId = source.parse()?;
    let track = state.tracks.get(source, &id).await?;
    Ok(Json(track))
}

#[derive(Debug, Deserialize)]
struct NotifyBody {
    /// Target user; omitted means broadcast to everyone.
    user_id: Option<String>,
    payload: serde_json::Value,
}

async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NotifyBody>,
) -> Result<(axum::http::StatusCode, Json<serde_json::Value>), ApiError> {
    let _principal = authenticate(&state, &headers).await?;
    let Some(notify) = &state.notify else {
        return Err(ApiError::new(
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "notifications are not configured",
        ));
    };
    match body.user_id {
        Some(user_id) => notify.notify_user(&user_id, body.payload).await?,
        None => notify.notify_all(body.payload).await?,
    }
    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(json!({ "status": "queued" })),
    ))
}

#[derive(Debug, Deserialize)]
struct InvalidateParams {
    prefix: String,
}

async fn invalidate_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<InvalidateParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let _principal = authenticate(&state, &headers).await?;
    if params.prefix.is_empty() {
        return Err(ApiError::bad_request("prefix must not be empty"));
    }
    let removed = state.cache_admin.invalidate_prefix(&params.prefix).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// Upgrades to a WebSocket. Authentication is optional: a valid token scopes
/// the connection to its user, no token means an anonymous connection that
/// only receives broadcasts. An explicitly presented but invalid token is
/// rejected rather than silently downgraded.
async fn websocket(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let principal = match credential(&params, &headers) {
        Some(Credential::Token(token)) => Some(state.auth.validate_token(&token).await?),
        Some(Credential::Header(value)) => Some(state.auth.validate(&value).await?),
        None => None,
    };

    let hub = state.hub.clone();
    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, hub, principal)))
}

enum Credential {
    Token(String),
    Header(String),
}

fn credential(params: &WsParams, headers: &HeaderMap) -> Option<Credential> {
    if let Some(token) = params.token.clone().filter(|t| !t.is_empty()) {
        return Some(Credential::Token(token));
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| Credential::Header(v.to_string()))
}

/// Validates the `Authorization` header and returns the principal.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(axum::http::StatusCode::UNAUTHORIZED, "missing credentials"))?;
    Ok(state.auth.validate(value).await?)
}
