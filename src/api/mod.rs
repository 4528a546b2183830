//! REST surface: routine CRUD, manual trigger, and health.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::auth::{extract_bearer_token, IdentityProvider};
use crate::error::ApiError;
use crate::headers::validate_headers;
use crate::manual_runner::ManualRunner;
use crate::model::{AuthMode, HttpMethod, Routine, RoutineKind, RoutineRun, MAX_NAME_LEN, MIN_INTERVAL_MINUTES};
use crate::store::{NewRoutine, RoutinePatch, RoutineStore};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RoutineStore>,
    pub manual_runner: Arc<ManualRunner>,
    pub identity: Arc<dyn IdentityProvider>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/routines", post(create_routine).get(list_routines))
        .route(
            "/routines/{id}",
            get(get_routine).patch(patch_routine).delete(delete_routine),
        )
        .route("/routines/{id}/run", post(run_routine))
        .route("/routines/{id}/runs", get(list_runs))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let ok = state.store.get_or_create_workspace("__health_check__").await.is_ok();
    let latency_ms = start.elapsed().as_millis() as u64;
    (
        [("Cache-Control", "no-store")],
        Json(serde_json::json!({
            "status": "ok",
            "store": { "ok": ok, "latency_ms": latency_ms }
        })),
    )
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let auth_header = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let token = extract_bearer_token(auth_header)?;
    let user_id = state.identity.user_id_for_token(token).await?;
    let workspace_id = state
        .store
        .get_or_create_workspace(&user_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(workspace_id)
}

#[derive(Debug, Deserialize)]
struct RoutineCreateBody {
    name: String,
    #[serde(default = "default_kind")]
    kind: RoutineKind,
    interval_minutes: i64,
    endpoint_url: String,
    #[serde(default = "default_method")]
    http_method: HttpMethod,
    #[serde(default)]
    headers_json: HashMap<String, String>,
    #[serde(default)]
    auth_mode: AuthModeWire,
    #[serde(default)]
    secret_ref: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum AuthModeWire {
    #[default]
    None,
    SecretRef,
}

impl From<AuthModeWire> for AuthMode {
    fn from(value: AuthModeWire) -> Self {
        match value {
            AuthModeWire::None => AuthMode::None,
            AuthModeWire::SecretRef => AuthMode::SecretRef,
        }
    }
}

fn default_kind() -> RoutineKind {
    RoutineKind::HttpCheck
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

fn validate_endpoint_url(url: &str) -> Result<(), ApiError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) || url.len() < 10 {
        return Err(ApiError::Validation("endpoint_url must be an absolute http(s) URL".to_string()));
    }
    reqwest::Url::parse(url).map_err(|_| ApiError::Validation("endpoint_url must be an absolute http(s) URL".to_string()))?;
    Ok(())
}

fn validate_create(body: &RoutineCreateBody) -> Result<(), ApiError> {
    if body.name.is_empty() || body.name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::Validation(format!("name must be 1..={MAX_NAME_LEN} characters")));
    }
    if body.interval_minutes < MIN_INTERVAL_MINUTES {
        return Err(ApiError::Validation(format!("interval_minutes must be >= {MIN_INTERVAL_MINUTES}")));
    }
    validate_endpoint_url(&body.endpoint_url)?;
    if matches!(AuthMode::from(body.auth_mode), AuthMode::SecretRef) && body.secret_ref.is_none() {
        return Err(ApiError::Validation("secret_ref is required when auth_mode is SECRET_REF".to_string()));
    }
    validate_headers(&body.headers_json).map_err(ApiError::Validation)?;
    Ok(())
}

async fn create_routine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoutineCreateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace_id = authenticate(&state, &headers).await?;
    validate_create(&body)?;

    let now = chrono::Utc::now();
    let next_run_at = crate::schedule_clock::truncate_to_minute(now + chrono::Duration::minutes(body.interval_minutes));
    let routine = state
        .store
        .insert_routine(NewRoutine {
            workspace_id,
            name: body.name,
            kind: body.kind,
            interval_minutes: body.interval_minutes,
            endpoint_url: body.endpoint_url,
            http_method: body.http_method,
            headers_json: body.headers_json,
            auth_mode: body.auth_mode.into(),
            secret_ref: body.secret_ref,
            next_run_at,
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((StatusCode::CREATED, [("Cache-Control", "no-store")], Json(routine)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

fn clamp_limit(limit: Option<i64>) -> Result<i64, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(ApiError::Validation(format!("limit must be 1..={MAX_LIST_LIMIT}")));
    }
    Ok(limit)
}

async fn list_routines(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace_id = authenticate(&state, &headers).await?;
    let limit = clamp_limit(query.limit)?;
    let routines = state
        .store
        .list_routines(workspace_id, limit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((StatusCode::OK, [("Cache-Control", "no-store")], Json(routines)))
}

async fn get_routine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace_id = authenticate(&state, &headers).await?;
    let routine = load_routine(&state, workspace_id, id).await?;
    Ok((StatusCode::OK, [("Cache-Control", "no-store")], Json(routine)))
}

async fn load_routine(state: &AppState, workspace_id: Uuid, id: Uuid) -> Result<Routine, ApiError> {
    state
        .store
        .get_routine(workspace_id, id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("routine {id} not found")))
}

#[derive(Debug, Deserialize, Default)]
struct RoutinePatchBody {
    name: Option<String>,
    interval_minutes: Option<i64>,
    endpoint_url: Option<String>,
    http_method: Option<HttpMethod>,
    headers_json: Option<HashMap<String, String>>,
    auth_mode: Option<AuthModeWire>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    secret_ref: Option<Option<String>>,
    is_active: Option<bool>,
}

fn deserialize_double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

fn validate_patch(body: &RoutinePatchBody) -> Result<(), ApiError> {
    if let Some(name) = &body.name {
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(ApiError::Validation(format!("name must be 1..={MAX_NAME_LEN} characters")));
        }
    }
    if let Some(interval) = body.interval_minutes {
        if interval < MIN_INTERVAL_MINUTES {
            return Err(ApiError::Validation(format!("interval_minutes must be >= {MIN_INTERVAL_MINUTES}")));
        }
    }
    if let Some(url) = &body.endpoint_url {
        validate_endpoint_url(url)?;
    }
    if let Some(headers) = &body.headers_json {
        validate_headers(headers).map_err(ApiError::Validation)?;
    }
    Ok(())
}

async fn patch_routine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<RoutinePatchBody>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace_id = authenticate(&state, &headers).await?;
    validate_patch(&body)?;

    // Changing the interval re-arms the schedule from now, the same as the
    // original PATCH handler, rather than waiting for the next completion.
    let next_run_at = body.interval_minutes.map(|interval| {
        crate::schedule_clock::truncate_to_minute(chrono::Utc::now() + chrono::Duration::minutes(interval))
    });

    let patch = RoutinePatch {
        name: body.name,
        interval_minutes: body.interval_minutes,
        endpoint_url: body.endpoint_url,
        http_method: body.http_method,
        headers_json: body.headers_json,
        auth_mode: body.auth_mode.map(Into::into),
        secret_ref: body.secret_ref,
        is_active: body.is_active,
        next_run_at,
    };

    let updated = state
        .store
        .update_routine(workspace_id, id, patch)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("routine {id} not found")))?;

    Ok((StatusCode::OK, [("Cache-Control", "no-store")], Json(updated)))
}

async fn delete_routine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace_id = authenticate(&state, &headers).await?;
    let deleted = state
        .store
        .delete_routine(workspace_id, id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !deleted {
        return Err(ApiError::NotFound(format!("routine {id} not found")));
    }
    Ok((
        StatusCode::OK,
        [("Cache-Control", "no-store")],
        Json(serde_json::json!({ "status": "deleted" })),
    ))
}

async fn run_routine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace_id = authenticate(&state, &headers).await?;
    let run = state.manual_runner.run(workspace_id, id).await?;
    Ok((StatusCode::OK, [("Cache-Control", "no-store")], Json(run)))
}

async fn list_runs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace_id = authenticate(&state, &headers).await?;
    let limit = clamp_limit(query.limit)?;
    // Ensure the routine belongs to this workspace before listing its runs.
    load_routine(&state, workspace_id, id).await?;

    let runs: Vec<RoutineRun> = state
        .store
        .list_runs(id, limit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((StatusCode::OK, [("Cache-Control", "no-store")], Json(runs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limit_defaults_and_bounds() {
        assert_eq!(clamp_limit(None).unwrap(), DEFAULT_LIST_LIMIT);
        assert_eq!(clamp_limit(Some(1)).unwrap(), 1);
        assert_eq!(clamp_limit(Some(MAX_LIST_LIMIT)).unwrap(), MAX_LIST_LIMIT);
        assert!(clamp_limit(Some(0)).is_err());
        assert!(clamp_limit(Some(MAX_LIST_LIMIT + 1)).is_err());
    }

    #[test]
    fn validate_create_rejects_short_interval() {
        let body = RoutineCreateBody {
            name: "x".to_string(),
            kind: RoutineKind::HttpCheck,
            interval_minutes: 1,
            endpoint_url: "https://example.com".to_string(),
            http_method: HttpMethod::Get,
            headers_json: HashMap::new(),
            auth_mode: AuthModeWire::None,
            secret_ref: None,
        };
        assert!(validate_create(&body).is_err());
    }

    #[test]
    fn validate_create_requires_secret_ref_for_secret_ref_mode() {
        let body = RoutineCreateBody {
            name: "x".to_string(),
            kind: RoutineKind::HttpCheck,
            interval_minutes: 5,
            endpoint_url: "https://example.com".to_string(),
            http_method: HttpMethod::Get,
            headers_json: HashMap::new(),
            auth_mode: AuthModeWire::SecretRef,
            secret_ref: None,
        };
        assert!(validate_create(&body).is_err());
    }
}
