//! `RoutineStore` — single async interface for all scheduler persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{HttpMethod, Routine, RoutineKind, RoutineRun};

/// Fields accepted when creating a routine. Lock/scheduling fields are
/// store-managed and not settable directly.
#[derive(Debug, Clone)]
pub struct NewRoutine {
    pub workspace_id: Uuid,
    pub name: String,
    pub kind: RoutineKind,
    pub interval_minutes: i64,
    pub endpoint_url: String,
    pub http_method: HttpMethod,
    pub headers_json: std::collections::HashMap<String, String>,
    pub auth_mode: crate::model::AuthMode,
    pub secret_ref: Option<String>,
    pub next_run_at: DateTime<Utc>,
}

/// Patch applied by `PATCH /routines/{id}`. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct RoutinePatch {
    pub name: Option<String>,
    pub interval_minutes: Option<i64>,
    pub endpoint_url: Option<String>,
    pub http_method: Option<HttpMethod>,
    pub headers_json: Option<std::collections::HashMap<String, String>>,
    pub auth_mode: Option<crate::model::AuthMode>,
    pub secret_ref: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Fields accepted when inserting a run record.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub routine_id: Uuid,
    pub triggered_by: crate::model::TriggeredBy,
    pub status: crate::model::RunStatus,
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Backend-agnostic persistence interface for routines and their runs.
///
/// Implementations must uphold (I1)/(I2) from the data model: lock fields
/// are set/cleared atomically, and `try_lock_routine`'s conditional update
/// must never let two concurrent callers both observe success for the same
/// routine while its lease is live.
#[async_trait]
pub trait RoutineStore: Send + Sync {
    /// Return the single workspace owned by `owner_id`, creating it if absent.
    async fn get_or_create_workspace(&self, owner_id: &str) -> Result<Uuid, StoreError>;

    async fn insert_routine(&self, fields: NewRoutine) -> Result<Routine, StoreError>;

    async fn list_routines(
        &self,
        workspace_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Routine>, StoreError>;

    async fn get_routine(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
    ) -> Result<Option<Routine>, StoreError>;

    async fn update_routine(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        patch: RoutinePatch,
    ) -> Result<Option<Routine>, StoreError>;

    async fn delete_routine(&self, workspace_id: Uuid, routine_id: Uuid) -> Result<bool, StoreError>;

    async fn insert_run(&self, fields: NewRun) -> Result<RoutineRun, StoreError>;

    async fn list_runs(&self, routine_id: Uuid, limit: i64) -> Result<Vec<RoutineRun>, StoreError>;

    /// Manual-run bookkeeping only: does not touch scheduling/lock fields.
    async fn touch_last_run(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Active routines whose `next_run_at <= cutoff` and with no live lease,
    /// ordered by `next_run_at` ascending.
    async fn list_due_routines(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Routine>, StoreError>;

    /// Conditional lease acquisition: succeeds only if `lock_until` is null
    /// or already expired as of `now`. Returns the post-update row on
    /// success, `None` if the condition did not hold.
    async fn try_lock_routine(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        now: DateTime<Utc>,
        lease_seconds: i64,
        locked_by: &str,
    ) -> Result<Option<Routine>, StoreError>;

    /// Clears the lease and advances scheduling fields, filtered by
    /// `locked_by` so a stale owner cannot clobber a fresher lease. Silent
    /// no-op if the filter does not match.
    async fn finish_scheduled_run(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        locked_by: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Clears only the lease fields, filtered by `locked_by`. Crash-recovery
    /// fallback; a no-op if `finish_scheduled_run` already cleared the lock.
    async fn release_lock(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        locked_by: &str,
    ) -> Result<(), StoreError>;
}
