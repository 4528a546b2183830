//! Supabase (PostgREST) backed `RoutineStore`.
//!
//! Talks to a Supabase project's auto-generated REST API over `reqwest`,
//! using the service-role key for both the `apikey` header and the bearer
//! credential, the same shape the original admin client used.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::traits::{NewRoutine, NewRun, RoutinePatch, RoutineStore};
use crate::error::StoreError;
use crate::model::{AuthMode, HttpMethod, Routine, RoutineKind, RoutineRun, RunStatus, TriggeredBy};

/// REST-backed `RoutineStore` talking to a PostgREST endpoint.
pub struct SupabaseRoutineStore {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl SupabaseRoutineStore {
    pub fn new(base_url: &str, service_role_key: &SecretString, timeout_secs: u64) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let mut headers = HeaderMap::new();
        let key = service_role_key.expose_secret();
        headers.insert(
            "apikey",
            HeaderValue::from_str(key).map_err(|e| StoreError::Request(e.to_string()))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| StoreError::Request(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    async fn req(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<(u16, Value), StoreError> {
        let url = format!("{}/rest/v1/{path}", self.base_url);
        let mut req = self
            .client
            .request(method, url)
            .headers(self.headers.clone())
            .query(query);
        if let Some(extra) = extra_headers {
            req = req.headers(extra);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| StoreError::Request(e.to_string()))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let value: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| StoreError::Serialization(e.to_string()))?
        };
        Ok((status, value))
    }

    fn return_representation() -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("Prefer", HeaderValue::from_static("return=representation"));
        h
    }
}

/// Wire row shape for the `routines` table.
#[derive(Debug, Deserialize)]
struct RoutineRow {
    id: Uuid,
    workspace_id: Uuid,
    name: String,
    kind: String,
    interval_minutes: i64,
    endpoint_url: String,
    http_method: String,
    headers_json: HashMap<String, String>,
    auth_mode: String,
    secret_ref: Option<String>,
    is_active: bool,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    lock_until: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RoutineRow> for Routine {
    type Error = StoreError;

    fn try_from(row: RoutineRow) -> Result<Self, StoreError> {
        let kind = match row.kind.as_str() {
            "HTTP_CHECK" => RoutineKind::HttpCheck,
            "WEBHOOK_CALL" => RoutineKind::WebhookCall,
            other => return Err(StoreError::Serialization(format!("unknown routine kind: {other}"))),
        };
        let http_method = match row.http_method.as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            other => return Err(StoreError::Serialization(format!("unknown http method: {other}"))),
        };
        let auth_mode = match row.auth_mode.as_str() {
            "NONE" => AuthMode::None,
            "SECRET_REF" => AuthMode::SecretRef,
            other => return Err(StoreError::Serialization(format!("unknown auth mode: {other}"))),
        };
        Ok(Routine {
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            kind,
            interval_minutes: row.interval_minutes,
            endpoint_url: row.endpoint_url,
            http_method,
            headers_json: row.headers_json,
            auth_mode,
            secret_ref: row.secret_ref,
            is_active: row.is_active,
            next_run_at: row.next_run_at,
            last_run_at: row.last_run_at,
            lock_until: row.lock_until,
            locked_by: row.locked_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn rows_to_routines(value: Value) -> Result<Vec<Routine>, StoreError> {
    let rows: Vec<RoutineRow> =
        serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    rows.into_iter().map(Routine::try_from).collect()
}

#[derive(Debug, Deserialize)]
struct RunRow {
    id: Uuid,
    routine_id: Uuid,
    triggered_by: String,
    status: String,
    http_status: Option<u16>,
    duration_ms: i64,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for RoutineRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, StoreError> {
        let triggered_by = match row.triggered_by.as_str() {
            "MANUAL" => TriggeredBy::Manual,
            "SCHEDULE" => TriggeredBy::Schedule,
            other => return Err(StoreError::Serialization(format!("unknown triggered_by: {other}"))),
        };
        let status = match row.status.as_str() {
            "SUCCESS" => RunStatus::Success,
            "FAIL" => RunStatus::Fail,
            other => return Err(StoreError::Serialization(format!("unknown run status: {other}"))),
        };
        Ok(RoutineRun {
            id: row.id,
            routine_id: row.routine_id,
            triggered_by,
            status,
            http_status: row.http_status,
            duration_ms: row.duration_ms.max(0) as u64,
            error_message: row.error_message,
            started_at: row.started_at,
            finished_at: row.finished_at,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl RoutineStore for SupabaseRoutineStore {
    async fn get_or_create_workspace(&self, owner_id: &str) -> Result<Uuid, StoreError> {
        let filter = format!("eq.{owner_id}");
        let (status, body) = self
            .req(
                reqwest::Method::GET,
                "workspaces",
                &[("owner_id", filter.as_str()), ("select", "id"), ("limit", "1")],
                None,
                None,
            )
            .await?;
        if status != 200 {
            return Err(StoreError::UnexpectedStatus { status, body: body.to_string() });
        }
        if let Some(row) = body.as_array().and_then(|a| a.first()) {
            if let Some(id) = row.get("id").and_then(|v| v.as_str()) {
                return Uuid::parse_str(id).map_err(|e| StoreError::Serialization(e.to_string()));
            }
        }

        let (status, body) = self
            .req(
                reqwest::Method::POST,
                "workspaces",
                &[],
                Some(&json!({ "owner_id": owner_id })),
                Some(Self::return_representation()),
            )
            .await?;
        if status != 201 {
            return Err(StoreError::UnexpectedStatus { status, body: body.to_string() });
        }
        let row = body
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| StoreError::Serialization("empty insert response".to_string()))?;
        let id = row
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StoreError::Serialization("missing id in insert response".to_string()))?;
        Uuid::parse_str(id).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn insert_routine(&self, fields: NewRoutine) -> Result<Routine, StoreError> {
        let body = json!({
            "workspace_id": fields.workspace_id,
            "name": fields.name,
            "kind": fields.kind.as_str(),
            "interval_minutes": fields.interval_minutes,
            "endpoint_url": fields.endpoint_url,
            "http_method": if matches!(fields.http_method, HttpMethod::Get) { "GET" } else { "POST" },
            "headers_json": fields.headers_json,
            "auth_mode": if matches!(fields.auth_mode, AuthMode::None) { "NONE" } else { "SECRET_REF" },
            "secret_ref": fields.secret_ref,
            "is_active": true,
            "next_run_at": fields.next_run_at,
        });
        let (status, resp) = self
            .req(reqwest::Method::POST, "routines", &[], Some(&body), Some(Self::return_representation()))
            .await?;
        if status != 201 {
            return Err(StoreError::UnexpectedStatus { status, body: resp.to_string() });
        }
        rows_to_routines(resp)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Serialization("empty insert response".to_string()))
    }

    async fn list_routines(&self, workspace_id: Uuid, limit: i64) -> Result<Vec<Routine>, StoreError> {
        let ws_filter = format!("eq.{workspace_id}");
        let limit_str = limit.to_string();
        let (status, body) = self
            .req(
                reqwest::Method::GET,
                "routines",
                &[
                    ("workspace_id", ws_filter.as_str()),
                    ("select", "*"),
                    ("order", "created_at.desc"),
                    ("limit", limit_str.as_str()),
                ],
                None,
                None,
            )
            .await?;
        if status != 200 {
            return Err(StoreError::UnexpectedStatus { status, body: body.to_string() });
        }
        rows_to_routines(body)
    }

    async fn get_routine(&self, workspace_id: Uuid, routine_id: Uuid) -> Result<Option<Routine>, StoreError> {
        let id_filter = format!("eq.{routine_id}");
        let ws_filter = format!("eq.{workspace_id}");
        let (status, body) = self
            .req(
                reqwest::Method::GET,
                "routines",
                &[("id", id_filter.as_str()), ("workspace_id", ws_filter.as_str()), ("select", "*")],
                None,
                None,
            )
            .await?;
        if status != 200 {
            return Err(StoreError::UnexpectedStatus { status, body: body.to_string() });
        }
        Ok(rows_to_routines(body)?.into_iter().next())
    }

    async fn update_routine(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        patch: RoutinePatch,
    ) -> Result<Option<Routine>, StoreError> {
        let mut body = serde_json::Map::new();
        if let Some(v) = patch.name {
            body.insert("name".to_string(), json!(v));
        }
        if let Some(v) = patch.interval_minutes {
            body.insert("interval_minutes".to_string(), json!(v));
        }
        if let Some(v) = patch.endpoint_url {
            body.insert("endpoint_url".to_string(), json!(v));
        }
        if let Some(v) = patch.http_method {
            body.insert(
                "http_method".to_string(),
                json!(if matches!(v, HttpMethod::Get) { "GET" } else { "POST" }),
            );
        }
        if let Some(v) = patch.headers_json {
            body.insert("headers_json".to_string(), json!(v));
        }
        if let Some(v) = patch.auth_mode {
            body.insert(
                "auth_mode".to_string(),
                json!(if matches!(v, AuthMode::None) { "NONE" } else { "SECRET_REF" }),
            );
        }
        if let Some(v) = patch.secret_ref {
            body.insert("secret_ref".to_string(), json!(v));
        }
        if let Some(v) = patch.is_active {
            body.insert("is_active".to_string(), json!(v));
        }
        if let Some(v) = patch.next_run_at {
            body.insert("next_run_at".to_string(), json!(v));
        }
        body.insert("updated_at".to_string(), json!(Utc::now()));

        let id_filter = format!("eq.{routine_id}");
        let ws_filter = format!("eq.{workspace_id}");
        let (status, resp) = self
            .req(
                reqwest::Method::PATCH,
                "routines",
                &[("id", id_filter.as_str()), ("workspace_id", ws_filter.as_str())],
                Some(&Value::Object(body)),
                Some(Self::return_representation()),
            )
            .await?;
        if status != 200 {
            return Err(StoreError::UnexpectedStatus { status, body: resp.to_string() });
        }
        Ok(rows_to_routines(resp)?.into_iter().next())
    }

    async fn delete_routine(&self, workspace_id: Uuid, routine_id: Uuid) -> Result<bool, StoreError> {
        let id_filter = format!("eq.{routine_id}");
        let ws_filter = format!("eq.{workspace_id}");
        let (status, resp) = self
            .req(
                reqwest::Method::DELETE,
                "routines",
                &[("id", id_filter.as_str()), ("workspace_id", ws_filter.as_str())],
                None,
                Some(Self::return_representation()),
            )
            .await?;
        if status != 200 {
            return Err(StoreError::UnexpectedStatus { status, body: resp.to_string() });
        }
        Ok(resp.as_array().map(|a| !a.is_empty()).unwrap_or(false))
    }

    async fn insert_run(&self, fields: NewRun) -> Result<RoutineRun, StoreError> {
        let body = json!({
            "routine_id": fields.routine_id,
            "triggered_by": if matches!(fields.triggered_by, TriggeredBy::Manual) { "MANUAL" } else { "SCHEDULE" },
            "status": if matches!(fields.status, RunStatus::Success) { "SUCCESS" } else { "FAIL" },
            "http_status": fields.http_status,
            "duration_ms": fields.duration_ms,
            "error_message": fields.error_message,
            "started_at": fields.started_at,
            "finished_at": fields.finished_at,
        });
        let (status, resp) = self
            .req(reqwest::Method::POST, "routine_runs", &[], Some(&body), Some(Self::return_representation()))
            .await?;
        if status != 201 {
            return Err(StoreError::UnexpectedStatus { status, body: resp.to_string() });
        }
        let rows: Vec<RunRow> =
            serde_json::from_value(resp).map_err(|e| StoreError::Serialization(e.to_string()))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Serialization("empty insert response".to_string()))?
            .try_into()
    }

    async fn list_runs(&self, routine_id: Uuid, limit: i64) -> Result<Vec<RoutineRun>, StoreError> {
        let id_filter = format!("eq.{routine_id}");
        let limit_str = limit.to_string();
        let (status, body) = self
            .req(
                reqwest::Method::GET,
                "routine_runs",
                &[
                    ("routine_id", id_filter.as_str()),
                    ("select", "*"),
                    ("order", "created_at.desc"),
                    ("limit", limit_str.as_str()),
                ],
                None,
                None,
            )
            .await?;
        if status != 200 {
            return Err(StoreError::UnexpectedStatus { status, body: body.to_string() });
        }
        let rows: Vec<RunRow> =
            serde_json::from_value(body).map_err(|e| StoreError::Serialization(e.to_string()))?;
        rows.into_iter().map(RoutineRun::try_from).collect()
    }

    async fn touch_last_run(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id_filter = format!("eq.{routine_id}");
        let ws_filter = format!("eq.{workspace_id}");
        let (status, body) = self
            .req(
                reqwest::Method::PATCH,
                "routines",
                &[("id", id_filter.as_str()), ("workspace_id", ws_filter.as_str())],
                Some(&json!({ "last_run_at": ts })),
                None,
            )
            .await?;
        if status != 200 && status != 204 {
            return Err(StoreError::UnexpectedStatus { status, body: body.to_string() });
        }
        Ok(())
    }

    async fn list_due_routines(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Routine>, StoreError> {
        let cutoff_filter = format!("lte.{}", cutoff.to_rfc3339());
        let limit_str = limit.to_string();
        let (status, body) = self
            .req(
                reqwest::Method::GET,
                "routines",
                &[
                    ("is_active", "eq.true"),
                    ("next_run_at", cutoff_filter.as_str()),
                    ("or", &format!("(lock_until.is.null,lock_until.lt.{})", cutoff.to_rfc3339())),
                    ("select", "*"),
                    ("order", "next_run_at.asc"),
                    ("limit", limit_str.as_str()),
                ],
                None,
                None,
            )
            .await?;
        if status != 200 {
            return Err(StoreError::UnexpectedStatus { status, body: body.to_string() });
        }
        rows_to_routines(body)
    }

    async fn try_lock_routine(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        now: DateTime<Utc>,
        lease_seconds: i64,
        locked_by: &str,
    ) -> Result<Option<Routine>, StoreError> {
        // PostgREST cannot express `lock_until IS NULL OR lock_until < now`
        // as a single filter set, so the predicate is split into two
        // sequential conditional PATCH attempts. The affected-row count
        // (an empty vs. non-empty `return=representation` body) is the
        // actual source of truth for whether the lease was acquired.
        let id_filter = format!("eq.{routine_id}");
        let ws_eq = format!("eq.{workspace_id}");
        let lock_until = now + chrono::Duration::seconds(lease_seconds);
        let body = json!({ "lock_until": lock_until, "locked_by": locked_by });

        let (status, resp) = self
            .req(
                reqwest::Method::PATCH,
                "routines",
                &[
                    ("id", id_filter.as_str()),
                    ("workspace_id", ws_eq.as_str()),
                    ("lock_until", "is.null"),
                ],
                Some(&body),
                Some(Self::return_representation()),
            )
            .await?;
        if status != 200 {
            return Err(StoreError::UnexpectedStatus { status, body: resp.to_string() });
        }
        if let Some(routine) = rows_to_routines(resp)?.into_iter().next() {
            return Ok(Some(routine));
        }

        let expired_filter = format!("lt.{}", now.to_rfc3339());
        let (status, resp) = self
            .req(
                reqwest::Method::PATCH,
                "routines",
                &[
                    ("id", id_filter.as_str()),
                    ("workspace_id", ws_eq.as_str()),
                    ("lock_until", expired_filter.as_str()),
                ],
                Some(&body),
                Some(Self::return_representation()),
            )
            .await?;
        if status != 200 {
            return Err(StoreError::UnexpectedStatus { status, body: resp.to_string() });
        }
        Ok(rows_to_routines(resp)?.into_iter().next())
    }

    async fn finish_scheduled_run(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        locked_by: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id_filter = format!("eq.{routine_id}");
        let ws_filter = format!("eq.{workspace_id}");
        let locked_by_filter = format!("eq.{locked_by}");
        let body = json!({
            "last_run_at": last_run_at,
            "next_run_at": next_run_at,
            "lock_until": Value::Null,
            "locked_by": Value::Null,
        });
        let (status, body_resp) = self
            .req(
                reqwest::Method::PATCH,
                "routines",
                &[
                    ("id", id_filter.as_str()),
                    ("workspace_id", ws_filter.as_str()),
                    ("locked_by", locked_by_filter.as_str()),
                ],
                Some(&body),
                None,
            )
            .await?;
        if status != 200 && status != 204 {
            return Err(StoreError::UnexpectedStatus { status, body: body_resp.to_string() });
        }
        Ok(())
    }

    async fn release_lock(&self, workspace_id: Uuid, routine_id: Uuid, locked_by: &str) -> Result<(), StoreError> {
        let id_filter = format!("eq.{routine_id}");
        let ws_filter = format!("eq.{workspace_id}");
        let locked_by_filter = format!("eq.{locked_by}");
        let body = json!({ "lock_until": Value::Null, "locked_by": Value::Null });
        let (status, body_resp) = self
            .req(
                reqwest::Method::PATCH,
                "routines",
                &[
                    ("id", id_filter.as_str()),
                    ("workspace_id", ws_filter.as_str()),
                    ("locked_by", locked_by_filter.as_str()),
                ],
                Some(&body),
                None,
            )
            .await?;
        if status != 200 && status != 204 {
            return Err(StoreError::UnexpectedStatus { status, body: body_resp.to_string() });
        }
        Ok(())
    }
}
