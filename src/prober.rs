//! `HttpProber` — executes one HTTP request against a routine's endpoint.
//!
//! Never raises: every failure mode (timeout, transport error, non-2xx
//! status, missing secret) is classified into a `RunOutcome` value.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;

use crate::model::{truncate, Routine};
use crate::secrets::SecretProvider;

const ERROR_MESSAGE_MAX_LEN: usize = 180;

/// The outcome of one probe attempt. Infallible by construction — a FAIL
/// outcome is not an error, it's data.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub started_at: chrono::DateTime<Utc>,
    pub finished_at: chrono::DateTime<Utc>,
}

/// Executes the HTTP probe described by a routine.
#[async_trait]
pub trait HttpProber: Send + Sync {
    async fn probe(&self, routine: &Routine) -> RunOutcome;
}

/// Production `HttpProber` backed by a shared `reqwest::Client`.
pub struct ReqwestProber {
    client: reqwest::Client,
    secrets: std::sync::Arc<dyn SecretProvider>,
}

impl ReqwestProber {
    pub fn new(client: reqwest::Client, secrets: std::sync::Arc<dyn SecretProvider>) -> Self {
        Self { client, secrets }
    }
}

#[async_trait]
impl HttpProber for ReqwestProber {
    async fn probe(&self, routine: &Routine) -> RunOutcome {
        let started_at = Utc::now();

        let mut headers = reqwest::header::HeaderMap::new();
        for (k, v) in &routine.headers_json {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                headers.insert(name, value);
            }
        }

        if let crate::model::AuthMode::SecretRef = routine.auth_mode {
            let secret_ref = match &routine.secret_ref {
                Some(r) => r,
                None => {
                    return fail(started_at, "missing_secret_ref_value".to_string());
                }
            };
            match self.secrets.resolve(secret_ref).await {
                Some(secret) => {
                    let value = format!("Bearer {}", secret.expose_secret());
                    match reqwest::header::HeaderValue::from_str(&value) {
                        Ok(hv) => {
                            headers.insert(reqwest::header::AUTHORIZATION, hv);
                        }
                        Err(e) => return fail(started_at, format!("exception:{e}")),
                    }
                }
                None => return fail(started_at, "missing_secret_ref_value".to_string()),
            }
        }

        let request = self
            .client
            .request(routine.http_method.as_reqwest(), &routine.endpoint_url)
            .headers(headers);

        match request.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let finished_at = Utc::now();
                let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
                if (200..300).contains(&status) {
                    RunOutcome {
                        success: true,
                        http_status: Some(status),
                        duration_ms,
                        error_message: None,
                        started_at,
                        finished_at,
                    }
                } else {
                    RunOutcome {
                        success: false,
                        http_status: Some(status),
                        duration_ms,
                        error_message: Some(format!("http_error:{status}")),
                        started_at,
                        finished_at,
                    }
                }
            }
            Err(e) if e.is_timeout() => fail(started_at, "timeout".to_string()),
            Err(e) => fail(started_at, format!("exception:{e}")),
        }
    }
}

fn fail(started_at: chrono::DateTime<Utc>, message: String) -> RunOutcome {
    let finished_at = Utc::now();
    RunOutcome {
        success: false,
        http_status: None,
        duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        error_message: Some(truncate(&message, ERROR_MESSAGE_MAX_LEN)),
        started_at,
        finished_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthMode, HttpMethod, RoutineKind};
    use crate::secrets::EnvSecretProvider;
    use std::collections::HashMap;
    use std::sync::Arc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn routine_for(url: String) -> Routine {
        let now = Utc::now();
        Routine {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            name: "probe".to_string(),
            kind: RoutineKind::HttpCheck,
            interval_minutes: 5,
            endpoint_url: url,
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

    fn prober() -> ReqwestProber {
        ReqwestProber::new(
            reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(2))
                .build()
                .unwrap(),
            Arc::new(EnvSecretProvider::new()),
        )
    }

    #[tokio::test]
    async fn success_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let routine = routine_for(format!("{}/ok", server.uri()));
        let outcome = prober().probe(&routine).await;
        assert!(outcome.success);
        assert_eq!(outcome.http_status, Some(200));
        assert!(outcome.error_message.is_none());
    }

    #[tokio::test]
    async fn fail_on_500() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let routine = routine_for(format!("{}/broken", server.uri()));
        let outcome = prober().probe(&routine).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_message.as_deref(), Some("http_error:500"));
    }

    #[tokio::test]
    async fn timeout_classified_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
            .mount(&server)
            .await;

        let routine = routine_for(format!("{}/slow", server.uri()));
        let outcome = prober().probe(&routine).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_message.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn missing_secret_short_circuits_without_network_call() {
        let mut routine = routine_for("https://example.invalid/should-not-be-called".to_string());
        routine.auth_mode = AuthMode::SecretRef;
        routine.secret_ref = Some("MISSING_TOKEN_XYZ".to_string());

        let outcome = prober().probe(&routine).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_message.as_deref(), Some("missing_secret_ref_value"));
    }
}
