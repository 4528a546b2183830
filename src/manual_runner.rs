//! `ManualRunner` — the `POST /routines/{id}/run` execution path.
//!
//! Deliberately orthogonal to the scheduler: it does not acquire the lease
//! and does not touch `next_run_at`, only `last_run_at`.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{ApiError, StoreError};
use crate::model::{RoutineRun, RunStatus, TriggeredBy};
use crate::prober::HttpProber;
use crate::store::{NewRun, RoutineStore};

pub struct ManualRunner {
    store: Arc<dyn RoutineStore>,
    prober: Arc<dyn HttpProber>,
}

impl ManualRunner {
    pub fn new(store: Arc<dyn RoutineStore>, prober: Arc<dyn HttpProber>) -> Self {
        Self { store, prober }
    }

    pub async fn run(&self, workspace_id: Uuid, routine_id: Uuid) -> Result<RoutineRun, ApiError> {
        let routine = self
            .store
            .get_routine(workspace_id, routine_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound(format!("routine {routine_id} not found")))?;

        let outcome = self.prober.probe(&routine).await;

        let run = self
            .store
            .insert_run(NewRun {
                routine_id: routine.id,
                triggered_by: TriggeredBy::Manual,
                status: if outcome.success { RunStatus::Success } else { RunStatus::Fail },
                http_status: outcome.http_status,
                duration_ms: outcome.duration_ms,
                error_message: outcome.error_message,
                started_at: outcome.started_at,
                finished_at: outcome.finished_at,
            })
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        if let Err(e) = self.touch_last_run(workspace_id, routine.id, outcome.finished_at).await {
            tracing::warn!(routine_id = %routine.id, error = %e, "touch_last_run failed after manual run");
        }

        Ok(run)
    }

    async fn touch_last_run(
        &self,
        workspace_id: Uuid,
        routine_id: Uuid,
        ts: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        self.store.touch_last_run(workspace_id, routine_id, ts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthMode, HttpMethod, RoutineKind};
    use crate::prober::ReqwestProber;
    use crate::secrets::EnvSecretProvider;
    use crate::store::{InMemoryRoutineStore, NewRoutine};
    use std::collections::HashMap;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn manual_run_does_not_touch_schedule_or_lease() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let store: Arc<dyn RoutineStore> = Arc::new(InMemoryRoutineStore::new());
        let ws = store.get_or_create_workspace("owner").await.unwrap();
        let now = chrono::Utc::now();
        let routine = store
            .insert_routine(NewRoutine {
                workspace_id: ws,
                name: "manual-test".to_string(),
                kind: RoutineKind::HttpCheck,
                interval_minutes: 5,
                endpoint_url: server.uri(),
                http_method: HttpMethod::Get,
                headers_json: HashMap::new(),
                auth_mode: AuthMode::None,
                secret_ref: None,
                next_run_at: now + chrono::Duration::hours(1),
            })
            .await
            .unwrap();

        // Scheduler leases it concurrently with the manual run.
        store.try_lock_routine(ws, routine.id, now, 45, "scheduler-1").await.unwrap();

        let prober: Arc<dyn HttpProber> = Arc::new(ReqwestProber::new(
            reqwest::Client::new(),
            Arc::new(EnvSecretProvider::new()),
        ));
        let runner = ManualRunner::new(Arc::clone(&store), prober);
        let run = runner.run(ws, routine.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.triggered_by, TriggeredBy::Manual);

        let after = store.get_routine(ws, routine.id).await.unwrap().unwrap();
        assert!(after.last_run_at.is_some());
        assert_eq!(after.next_run_at.unwrap(), routine.next_run_at.unwrap());
        assert_eq!(after.locked_by.as_deref(), Some("scheduler-1"));
    }

    #[tokio::test]
    async fn run_against_missing_routine_is_not_found() {
        let store: Arc<dyn RoutineStore> = Arc::new(InMemoryRoutineStore::new());
        let ws = store.get_or_create_workspace("owner").await.unwrap();
        let prober: Arc<dyn HttpProber> = Arc::new(ReqwestProber::new(
            reqwest::Client::new(),
            Arc::new(EnvSecretProvider::new()),
        ));
        let runner = ManualRunner::new(store, prober);
        let result = runner.run(ws, Uuid::new_v4()).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
