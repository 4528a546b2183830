//! In-memory `RoutineStore`, used by tests in place of the Supabase backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::traits::{NewRoutine, NewRun, RoutinePatch, RoutineStore};
use crate::error::StoreError;
use crate::model::{Routine, RoutineRun};

#[derive(Default)]
struct State {
    workspaces: HashMap<String, Uuid>,
    routines: HashMap<Uuid, Routine>,
    runs: HashMap<Uuid, RoutineRun>,
}

/// A `tokio::sync::Mutex`-free, `std::sync::Mutex`-guarded in-memory store.
/// Single-process only; intended for tests and local development, not for
/// multi-instance deployments (see `store::rest_backend` for that).
pub struct InMemoryRoutineStore {
    state: Mutex<State>,
}

impl Default for InMemoryRoutineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRoutineStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

#[async_trait]
impl RoutineStore for InMemoryRoutineStore {
    async fn get_or_create_workspace(&self, owner_id: &str) -> Result<Uuid, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.workspaces.get(owner_id) {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        state.workspaces.insert(owner_id.to_string(), id);
        Ok(id)
    }

    async fn insert_routine(&self, fields: NewRoutine) -> Result<Routine, StoreError> {
        let now = Utc::now();
        let routine = Routine {
            id: Uuid::new_v4(),
            workspace_id: fields.workspace_id,
            name: fields.name,
            kind: fields.kind,
            interval_minutes: fields.interval_minutes,
            endpoint_url: fields.endpoint_url,
            http_method: fields.http_method,
            headers_json: fields.headers_json,
            auth_mode: fields.auth_mode,
            secret_ref: fields.secret_ref,
            is_active: true,
            next_run_at: Some(fields.next_run_at),
            last_run_at: None,
            lock_until: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().unwrap().routines.insert(routine.id, routine.clone());
        Ok(routine)
    }

    async fn list_routines(
        &self,
        workspace_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Routine>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut routines: Vec<Routine> = state
            .routines
            .values()
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
            .collect();
        routines.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        routines.truncate(limit.max(0) as usize);
        Ok(routines)
    }

    async fn get_routine(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
    ) -> Result<Option<Routine>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .routines
            .get(&routine_id)
            .filter(|r| r.workspace_id == workspace_id)
            .cloned())
    }

    async fn update_routine(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        patch: RoutinePatch,
    ) -> Result<Option<Routine>, StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(routine) = state
            .routines
            .get_mut(&routine_id)
            .filter(|r| r.workspace_id == workspace_id)
        else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            routine.name = name;
        }
        if let Some(interval) = patch.interval_minutes {
            routine.interval_minutes = interval;
        }
        if let Some(url) = patch.endpoint_url {
            routine.endpoint_url = url;
        }
        if let Some(method) = patch.http_method {
            routine.http_method = method;
        }
        if let Some(headers) = patch.headers_json {
            routine.headers_json = headers;
        }
        if let Some(mode) = patch.auth_mode {
            routine.auth_mode = mode;
        }
        if let Some(secret_ref) = patch.secret_ref {
            routine.secret_ref = secret_ref;
        }
        if let Some(active) = patch.is_active {
            routine.is_active = active;
        }
        if let Some(next_run_at) = patch.next_run_at {
            routine.next_run_at = Some(next_run_at);
        }
        routine.updated_at = Utc::now();
        Ok(Some(routine.clone()))
    }

    async fn delete_routine(&self, workspace_id: Uuid, routine_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        let belongs = state
            .routines
            .get(&routine_id)
            .map(|r| r.workspace_id == workspace_id)
            .unwrap_or(false);
        if belongs {
            state.routines.remove(&routine_id);
        }
        Ok(belongs)
    }

    async fn insert_run(&self, fields: NewRun) -> Result<RoutineRun, StoreError> {
        let run = RoutineRun {
            id: Uuid::new_v4(),
            routine_id: fields.routine_id,
            triggered_by: fields.triggered_by,
            status: fields.status,
            http_status: fields.http_status,
            duration_ms: fields.duration_ms,
            error_message: fields.error_message,
            started_at: fields.started_at,
            finished_at: fields.finished_at,
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn list_runs(&self, routine_id: Uuid, limit: i64) -> Result<Vec<RoutineRun>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut runs: Vec<RoutineRun> = state
            .runs
            .values()
            .filter(|r| r.routine_id == routine_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn touch_last_run(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(routine) = state
            .routines
            .get_mut(&routine_id)
            .filter(|r| r.workspace_id == workspace_id)
        {
            routine.last_run_at = Some(ts);
        }
        Ok(())
    }

    async fn list_due_routines(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Routine>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut due: Vec<Routine> = state
            .routines
            .values()
            .filter(|r| r.is_due(cutoff))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn try_lock_routine(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        now: DateTime<Utc>,
        lease_seconds: i64,
        locked_by: &str,
    ) -> Result<Option<Routine>, StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(routine) = state
            .routines
            .get_mut(&routine_id)
            .filter(|r| r.workspace_id == workspace_id)
        else {
            return Ok(None);
        };
        let available = match routine.lock_until {
            None => true,
            Some(until) => until < now,
        };
        if !available {
            return Ok(None);
        }
        routine.lock_until = Some(now + chrono::Duration::seconds(lease_seconds));
        routine.locked_by = Some(locked_by.to_string());
        routine.updated_at = now;
        Ok(Some(routine.clone()))
    }

    async fn finish_scheduled_run(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        locked_by: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(routine) = state
            .routines
            .get_mut(&routine_id)
            .filter(|r| r.workspace_id == workspace_id && r.locked_by.as_deref() == Some(locked_by))
        {
            routine.last_run_at = Some(last_run_at);
            routine.next_run_at = Some(next_run_at);
            routine.lock_until = None;
            routine.locked_by = None;
            routine.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn release_lock(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        locked_by: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(routine) = state
            .routines
            .get_mut(&routine_id)
            .filter(|r| r.workspace_id == workspace_id && r.locked_by.as_deref() == Some(locked_by))
        {
            routine.lock_until = None;
            routine.locked_by = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthMode, HttpMethod, RoutineKind};
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    fn new_fields(workspace_id: Uuid, next_run_at: DateTime<Utc>) -> NewRoutine {
        NewRoutine {
            workspace_id,
            name: "ping".to_string(),
            kind: RoutineKind::HttpCheck,
            interval_minutes: 5,
            endpoint_url: "https://example.com".to_string(),
            http_method: HttpMethod::Get,
            headers_json: Map::new(),
            auth_mode: AuthMode::None,
            secret_ref: None,
            next_run_at,
        }
    }

    #[tokio::test]
    async fn lock_invariant_holds_after_lock_and_release() {
        let store = InMemoryRoutineStore::new();
        let ws = store.get_or_create_workspace("owner").await.unwrap();
        let now = Utc::now();
        let routine = store.insert_routine(new_fields(ws, now)).await.unwrap();

        let locked = store
            .try_lock_routine(ws, routine.id, now, 45, "worker-a")
            .await
            .unwrap()
            .unwrap();
        assert!(locked.lock_invariant_holds());
        assert_eq!(locked.locked_by.as_deref(), Some("worker-a"));

        store.release_lock(ws, routine.id, "worker-a").await.unwrap();
        let after = store.get_routine(ws, routine.id).await.unwrap().unwrap();
        assert!(after.lock_invariant_holds());
        assert!(after.locked_by.is_none());
    }

    #[tokio::test]
    async fn exactly_one_winner_among_concurrent_lockers() {
        let store = Arc::new(InMemoryRoutineStore::new());
        let ws = store.get_or_create_workspace("owner").await.unwrap();
        let now = Utc::now();
        let routine = store.insert_routine(new_fields(ws, now)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let id = routine.id;
            handles.push(tokio::spawn(async move {
                store
                    .try_lock_routine(ws, id, now, 45, &format!("worker-{i}"))
                    .await
                    .unwrap()
                    .is_some()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn finish_scheduled_run_is_noop_under_wrong_owner() {
        let store = InMemoryRoutineStore::new();
        let ws = store.get_or_create_workspace("owner").await.unwrap();
        let now = Utc::now();
        let routine = store.insert_routine(new_fields(ws, now)).await.unwrap();
        store
            .try_lock_routine(ws, routine.id, now, 45, "worker-a")
            .await
            .unwrap();

        store
            .finish_scheduled_run(ws, routine.id, "worker-b", now, now + chrono::Duration::minutes(5))
            .await
            .unwrap();

        let after = store.get_routine(ws, routine.id).await.unwrap().unwrap();
        assert_eq!(after.locked_by.as_deref(), Some("worker-a"));
        assert!(after.last_run_at.is_none());
    }

    #[tokio::test]
    async fn list_due_routines_respects_lease_and_activity() {
        let store = InMemoryRoutineStore::new();
        let ws = store.get_or_create_workspace("owner").await.unwrap();
        let now = Utc::now();
        let due = store.insert_routine(new_fields(ws, now)).await.unwrap();
        let future = store
            .insert_routine(new_fields(ws, now + chrono::Duration::hours(1)))
            .await
            .unwrap();

        let candidates = store.list_due_routines(now, 20).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, due.id);
        assert!(!candidates.iter().any(|r| r.id == future.id));
    }
}
