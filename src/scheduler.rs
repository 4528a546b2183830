//! The scheduler tick: selects due routines, leases them, and fans out a
//! bounded worker pool to execute and finalize each one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;

use crate::model::{RunStatus, TriggeredBy};
use crate::prober::HttpProber;
use crate::schedule_clock::ScheduleClock;
use crate::store::{NewRun, RoutineStore};

/// Dependencies and tuning knobs for one `Scheduler`.
pub struct Scheduler {
    store: Arc<dyn RoutineStore>,
    prober: Arc<dyn HttpProber>,
    clock: Arc<dyn ScheduleClock>,
    instance_id: String,
    due_slack_secs: i64,
    lock_lease_secs: i64,
    batch_limit: i64,
    max_concurrency: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn RoutineStore>,
        prober: Arc<dyn HttpProber>,
        clock: Arc<dyn ScheduleClock>,
        instance_id: String,
        due_slack_secs: i64,
        lock_lease_secs: i64,
        batch_limit: i64,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            prober,
            clock,
            instance_id,
            due_slack_secs,
            lock_lease_secs,
            batch_limit,
            max_concurrency,
        }
    }

    /// Run one tick: select due routines, lease each, then execute the
    /// leased set under a bounded worker pool. Returns the number of
    /// routines executed this tick.
    pub async fn tick(&self) -> usize {
        let now = Utc::now();
        let due_cutoff = now + chrono::Duration::seconds(self.due_slack_secs);

        let candidates = match self.store.list_due_routines(due_cutoff, self.batch_limit).await {
            Ok(routines) => routines,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list due routines");
                return 0;
            }
        };

        let mut locked = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self
                .store
                .try_lock_routine(
                    candidate.workspace_id,
                    candidate.id,
                    now,
                    self.lock_lease_secs,
                    &self.instance_id,
                )
                .await
            {
                Ok(Some(routine)) => locked.push(routine),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(routine_id = %candidate.id, error = %e, "try_lock_routine failed");
                }
            }
        }

        let leased_count = locked.len();
        if leased_count == 0 {
            return 0;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(leased_count);
        for routine in locked {
            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let prober = Arc::clone(&self.prober);
            let clock = Arc::clone(&self.clock);
            let instance_id = self.instance_id.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                run_one_scheduled(store, prober, clock, routine, instance_id).await;
            }));
        }

        futures::future::join_all(handles).await;
        leased_count
    }
}

async fn run_one_scheduled(
    store: Arc<dyn RoutineStore>,
    prober: Arc<dyn HttpProber>,
    clock: Arc<dyn ScheduleClock>,
    routine: crate::model::Routine,
    locked_by: String,
) {
    let workspace_id = routine.workspace_id;
    let routine_id = routine.id;
    let result = execute_leased_routine(&store, &prober, &clock, &routine, &locked_by).await;
    if let Err(e) = result {
        tracing::error!(routine_id = %routine_id, error = %e, "scheduled run failed");
        let now = Utc::now();
        let _ = store
            .insert_run(NewRun {
                routine_id,
                triggered_by: TriggeredBy::Schedule,
                status: RunStatus::Fail,
                http_status: None,
                duration_ms: 0,
                error_message: Some(crate::model::truncate(&format!("scheduler_error:{e}"), 180)),
                started_at: now,
                finished_at: now,
            })
            .await;
    }

    // Best-effort regardless of outcome above: a no-op if
    // finish_scheduled_run already cleared the lease.
    if let Err(e) = store.release_lock(workspace_id, routine_id, &locked_by).await {
        tracing::warn!(routine_id = %routine_id, error = %e, "release_lock failed");
    }
}

async fn execute_leased_routine(
    store: &Arc<dyn RoutineStore>,
    prober: &Arc<dyn HttpProber>,
    clock: &Arc<dyn ScheduleClock>,
    routine: &crate::model::Routine,
    locked_by: &str,
) -> Result<(), crate::error::StoreError> {
    let outcome = prober.probe(routine).await;
    let next_run_at = clock.advance(routine, outcome.finished_at);

    if let Err(e) = store
        .insert_run(NewRun {
            routine_id: routine.id,
            triggered_by: TriggeredBy::Schedule,
            status: if outcome.success { RunStatus::Success } else { RunStatus::Fail },
            http_status: outcome.http_status,
            duration_ms: outcome.duration_ms,
            error_message: outcome.error_message.clone(),
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
        })
        .await
    {
        tracing::warn!(routine_id = %routine.id, error = %e, "insert_run failed");
    }

    store
        .finish_scheduled_run(
            routine.workspace_id,
            routine.id,
            locked_by,
            outcome.finished_at,
            next_run_at,
        )
        .await
}

/// Spawns the background tick loop, mirroring the skip-first-tick idiom used
/// for the teacher's other periodic background tasks.
pub fn spawn_ticker(scheduler: Arc<Scheduler>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let executed = scheduler.tick().await;
            if executed > 0 {
                tracing::info!(executed, "scheduler tick completed");
            }
        }
    })
}
