//! `ScheduleClock` — drift-free computation of a routine's next run slot.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};

use crate::model::Routine;

/// Computes the next scheduled run instant for a routine.
#[async_trait]
pub trait ScheduleClock: Send + Sync {
    fn advance(&self, routine: &Routine, now: DateTime<Utc>) -> DateTime<Utc>;
}

/// Stateless, wall-clock-based `ScheduleClock`.
///
/// Anchors on the routine's current `next_run_at` slot (not on completion
/// time) so execution latency never accumulates drift. A long outage
/// collapses to a single upcoming slot rather than a burst of catch-up runs.
pub struct SystemScheduleClock;

impl Default for SystemScheduleClock {
    fn default() -> Self {
        Self
    }
}

#[async_trait]
impl ScheduleClock for SystemScheduleClock {
    fn advance(&self, routine: &Routine, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval = Duration::minutes(routine.interval_minutes.max(1));
        let anchor = routine.next_run_at.unwrap_or(now);
        let mut candidate = anchor + interval;
        while candidate <= now {
            candidate += interval;
        }
        truncate_to_minute(candidate)
    }
}

pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthMode, HttpMethod, RoutineKind};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn routine_with(interval_minutes: i64, next_run_at: Option<DateTime<Utc>>) -> Routine {
        let now = Utc::now();
        Routine {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            name: "clock-test".to_string(),
            kind: RoutineKind::HttpCheck,
            interval_minutes,
            endpoint_url: "https://example.com".to_string(),
            http_method: HttpMethod::Get,
            headers_json: HashMap::new(),
            auth_mode: AuthMode::None,
            secret_ref: None,
            is_active: true,
            next_run_at,
            last_run_at: None,
            lock_until: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn advances_one_interval_when_on_time() {
        let anchor = "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let routine = routine_with(5, Some(anchor));
        let now = "2025-01-01T00:05:00Z".parse::<DateTime<Utc>>().unwrap();

        let next = SystemScheduleClock.advance(&routine, now);
        assert_eq!(next, "2025-01-01T00:10:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn catch_up_collapses_backlog_to_single_slot() {
        let anchor = "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let routine = routine_with(5, Some(anchor));
        let now = "2025-01-01T00:23:17Z".parse::<DateTime<Utc>>().unwrap();

        let next = SystemScheduleClock.advance(&routine, now);
        assert_eq!(next, "2025-01-01T00:25:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn result_is_always_strictly_after_now_and_truncated() {
        let anchor = "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let routine = routine_with(7, Some(anchor));
        for offset_secs in [0_i64, 1, 59, 600, 54321] {
            let now = anchor + Duration::seconds(offset_secs);
            let next = SystemScheduleClock.advance(&routine, now);
            assert!(next > now);
            assert_eq!(next.second(), 0);
            assert_eq!(next.nanosecond(), 0);
        }
    }

    #[test]
    fn missing_anchor_falls_back_to_now() {
        let routine = routine_with(5, None);
        let now = "2025-01-01T00:00:30Z".parse::<DateTime<Utc>>().unwrap();
        let next = SystemScheduleClock.advance(&routine, now);
        assert_eq!(next, "2025-01-01T00:05:00Z".parse::<DateTime<Utc>>().unwrap());
    }
}
