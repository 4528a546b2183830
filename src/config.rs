//! Environment-driven configuration for the scheduler and REST server.

use crate::error::ConfigError;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Top-level application configuration, populated once at startup and shared
/// by the REST server and the background ticker.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_role_key: secrecy::SecretString,
    pub supabase_anon_key: secrecy::SecretString,

    pub http_timeout_secs: u64,
    pub lock_lease_secs: i64,
    pub scheduler_batch_limit: i64,
    pub max_concurrency: usize,
    pub due_slack_secs: i64,
    pub scheduler_tick_secs: u64,

    pub instance_id: String,
    pub http_bind_addr: String,
}

impl AppConfig {
    /// Build configuration from the process environment. Fails hard only for
    /// Supabase connection details — everything else has a sane default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let supabase_url = std::env::var("SUPABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("SUPABASE_URL".to_string()))?;
        let supabase_service_role_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("SUPABASE_SERVICE_ROLE_KEY".to_string()))?
            .into();
        let supabase_anon_key = std::env::var("SUPABASE_ANON_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("SUPABASE_ANON_KEY".to_string()))?
            .into();

        let instance_id = std::env::var("INSTANCE_ID")
            .or_else(|_| std::env::var("WEBSITE_INSTANCE_ID"))
            .unwrap_or_else(|_| format!("local-{}", uuid::Uuid::new_v4()));

        Ok(Self {
            supabase_url,
            supabase_service_role_key,
            supabase_anon_key,
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECONDS", 8),
            lock_lease_secs: env_or("LOCK_LEASE_SECONDS", 45),
            scheduler_batch_limit: env_or("SCHEDULER_BATCH_LIMIT", 20),
            max_concurrency: env_or("MAX_CONCURRENCY", 5),
            due_slack_secs: env_or("DUE_SLACK_SECONDS", 3),
            scheduler_tick_secs: env_or("SCHEDULER_TICK_SECONDS", 300),
            instance_id,
            http_bind_addr: std::env::var("HTTP_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_parses_and_falls_back() {
        assert_eq!(env_or::<u64>("ROUTINE_SCHEDULER_NONEXISTENT_VAR", 8), 8);
    }
}
