//! Core types for the routine scheduler.
//!
//! A routine is a named, workspace-owned HTTP health check with an interval
//! trigger. Each routine fires independently when its `next_run_at` slot
//! arrives; a run records the outcome of one execution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum allowed interval between scheduled executions.
pub const MIN_INTERVAL_MINUTES: i64 = 5;
/// Maximum length of a routine name.
pub const MAX_NAME_LEN: usize = 80;

/// What kind of probe a routine performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutineKind {
    HttpCheck,
    WebhookCall,
}

impl RoutineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutineKind::HttpCheck => "HTTP_CHECK",
            RoutineKind::WebhookCall => "WEBHOOK_CALL",
        }
    }
}

/// HTTP method a routine's probe issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

/// How a routine authenticates against its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMode {
    None,
    SecretRef,
}

/// A persisted, scheduled HTTP health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routine {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub kind: RoutineKind,
    pub interval_minutes: i64,
    pub endpoint_url: String,
    pub http_method: HttpMethod,
    pub headers_json: HashMap<String, String>,
    pub auth_mode: AuthMode,
    pub secret_ref: Option<String>,
    pub is_active: bool,

    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub lock_until: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Routine {
    /// (I1): lock fields are either both present or both absent.
    pub fn lock_invariant_holds(&self) -> bool {
        self.lock_until.is_some() == self.locked_by.is_some()
    }

    /// True when `now` has reached this routine's slot and no live lease holds.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        let due = self.next_run_at.map(|t| t <= now).unwrap_or(false);
        let leased = self.lock_until.map(|t| t >= now).unwrap_or(false);
        due && !leased
    }
}

/// What triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggeredBy {
    Manual,
    Schedule,
}

/// Outcome of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Fail,
}

/// An immutable record of one routine execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineRun {
    pub id: Uuid,
    pub routine_id: Uuid,
    pub triggered_by: TriggeredBy,
    pub status: RunStatus,
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Truncate a string to at most `max_len` chars, respecting char boundaries.
pub fn truncate(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_routine(now: DateTime<Utc>) -> Routine {
        Routine {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            name: "ping-prod".to_string(),
            kind: RoutineKind::HttpCheck,
            interval_minutes: 5,
            endpoint_url: "https://example.com/health".to_string(),
            http_method: HttpMethod::Get,
            headers_json: HashMap::new(),
            auth_mode: AuthMode::None,
            secret_ref: None,
            is_active: true,
            next_run_at: Some(now),
            last_run_at: None,
            lock_until: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn lock_invariant_both_present_or_absent() {
        let now = Utc::now();
        let mut r = base_routine(now);
        assert!(r.lock_invariant_holds());
        r.lock_until = Some(now);
        assert!(!r.lock_invariant_holds());
        r.locked_by = Some("worker-1".to_string());
        assert!(r.lock_invariant_holds());
    }

    #[test]
    fn due_requires_active_past_slot_and_no_lease() {
        let now = Utc::now();
        let mut r = base_routine(now);
        assert!(r.is_due(now));

        r.is_active = false;
        assert!(!r.is_due(now));
        r.is_active = true;

        r.lock_until = Some(now + chrono::Duration::seconds(30));
        r.locked_by = Some("worker-1".to_string());
        assert!(!r.is_due(now));

        r.lock_until = Some(now - chrono::Duration::seconds(30));
        assert!(r.is_due(now));
    }

    #[test]
    fn not_due_before_slot() {
        let now = Utc::now();
        let mut r = base_routine(now);
        r.next_run_at = Some(now + chrono::Duration::minutes(1));
        assert!(!r.is_due(now));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "exception: caf\u{e9} failure with a very long message";
        let t = truncate(s, 10);
        assert_eq!(t.chars().count(), 10);

        let short = "short";
        assert_eq!(truncate(short, 100), "short");
    }

    #[test]
    fn routine_kind_tags() {
        assert_eq!(RoutineKind::HttpCheck.as_str(), "HTTP_CHECK");
        assert_eq!(RoutineKind::WebhookCall.as_str(), "WEBHOOK_CALL");
    }
}
