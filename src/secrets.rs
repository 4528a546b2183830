//! Secret resolution: maps a routine's `secret_ref` to a concrete credential.

use async_trait::async_trait;
use secrecy::SecretString;

/// Resolves a logical `secret_ref` to a credential string.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Returns `None` when no matching secret is configured.
    async fn resolve(&self, secret_ref: &str) -> Option<SecretString>;
}

/// Resolves secrets from the process environment: `secret_ref = "X"` looks
/// up `SECRET_X`; a ref that already starts with `SECRET_` is used as-is.
pub struct EnvSecretProvider;

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvSecretProvider {
    pub fn new() -> Self {
        Self
    }

    fn env_key(secret_ref: &str) -> String {
        if secret_ref.starts_with("SECRET_") {
            secret_ref.to_string()
        } else {
            format!("SECRET_{secret_ref}")
        }
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn resolve(&self, secret_ref: &str) -> Option<SecretString> {
        std::env::var(Self::env_key(secret_ref)).ok().map(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn resolves_bare_ref_via_secret_prefix() {
        // SAFETY: test runs single-threaded per-test via tokio::test's
        // current-thread runtime; env var name is unique to this test.
        unsafe { std::env::set_var("SECRET_TEST_PROBE_TOKEN", "shh") };
        let provider = EnvSecretProvider::new();
        let resolved = provider.resolve("TEST_PROBE_TOKEN").await.unwrap();
        assert_eq!(resolved.expose_secret(), "shh");
        unsafe { std::env::remove_var("SECRET_TEST_PROBE_TOKEN") };
    }

    #[tokio::test]
    async fn resolves_prefixed_ref_as_is() {
        unsafe { std::env::set_var("SECRET_ALREADY_PREFIXED", "tok") };
        let provider = EnvSecretProvider::new();
        let resolved = provider.resolve("SECRET_ALREADY_PREFIXED").await.unwrap();
        assert_eq!(resolved.expose_secret(), "tok");
        unsafe { std::env::remove_var("SECRET_ALREADY_PREFIXED") };
    }

    #[tokio::test]
    async fn missing_secret_resolves_to_none() {
        let provider = EnvSecretProvider::new();
        assert!(provider.resolve("DOES_NOT_EXIST_ABC").await.is_none());
    }
}
