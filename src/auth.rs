//! Bearer-token authentication against the Supabase-compatible identity
//! provider, mirroring the original `get_user_id_from_request`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::AuthError;

/// Resolves a bearer token to a user id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_id_for_token(&self, token: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
}

/// Production `IdentityProvider`, backed by `{SUPABASE_URL}/auth/v1/user`.
pub struct SupabaseIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    anon_key: SecretString,
}

impl SupabaseIdentityProvider {
    pub fn new(client: reqwest::Client, base_url: &str, anon_key: SecretString) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
        }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentityProvider {
    async fn user_id_for_token(&self, token: &str) -> Result<String, AuthError> {
        let resp = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", self.anon_key.expose_secret())
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .map_err(|_| AuthError::InvalidToken)?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(AuthError::InvalidToken);
        }
        resp.json::<UserResponse>()
            .await
            .map(|u| u.id)
            .map_err(|_| AuthError::InvalidToken)
    }
}

/// Extracts the bearer token from an `Authorization` header value.
pub fn extract_bearer_token(header_value: Option<&str>) -> Result<&str, AuthError> {
    let value = header_value.ok_or(AuthError::MissingToken)?;
    value.strip_prefix("Bearer ").ok_or(AuthError::MissingToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token_from_bearer_header() {
        assert_eq!(extract_bearer_token(Some("Bearer abc123")).unwrap(), "abc123");
    }

    #[test]
    fn missing_header_is_missing_token() {
        assert!(matches!(extract_bearer_token(None), Err(AuthError::MissingToken)));
    }

    #[test]
    fn non_bearer_scheme_is_missing_token() {
        assert!(matches!(extract_bearer_token(Some("Basic abc")), Err(AuthError::MissingToken)));
    }
}
