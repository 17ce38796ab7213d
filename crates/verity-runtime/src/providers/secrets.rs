//! Secure credential handling for LLM providers.
//!
//! Credentials are wrapped in [`SecretString`] as soon as they are loaded:
//!
//! - **No accidental logging**: Credentials cannot appear in Debug/Display output
//! - **Memory safety**: Credentials are zeroed on drop
//! - **Explicit use**: The raw value is only reachable through [`ApiCredential::expose`]
//!
//! ## Usage
//!
//! ```ignore
//! use verity_runtime::providers::secrets::ApiCredential;
//!
//! // Configured key with env fallback
//! let cred = ApiCredential::from_config_or_env(config.api_key.as_deref(), "ANTHROPIC_API_KEY", "Anthropic API key")?;
//!
//! // Use in HTTP header (explicit exposure)
//! request.header("x-api-key", cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
///
/// Useful when diagnosing configuration without exposing the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from the runtime configuration file
    Config,
    /// Loaded from environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API credential.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Create a new credential from a string value.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Use the configured value when present, otherwise the environment.
    pub fn from_config_or_env(
        configured: Option<&str>,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = configured.filter(|v| !v.is_empty()) {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        if let Ok(value) = std::env::var(env_var) {
            return Ok(Self::new(value, CredentialSource::Environment, name));
        }

        Err(ProviderError::NotConfigured(format!(
            "{} required: set 'api_key' in runtime config or {} environment variable",
            name, env_var
        )))
    }

    /// Expose the credential value for use in API calls.
    ///
    /// # Security
    ///
    /// Only call this where the credential is actually needed (setting an
    /// HTTP header). Never store the exposed value.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Check if the credential is empty.
    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    /// Get the source of this credential.
    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Get the human-readable name of this credential.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted_in_debug() {
        let secret = "sk-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Programmatic, "Test API key");

        let debug = format!("{:?}", cred);
        assert!(!debug.contains(secret), "Secret exposed in Debug!");
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_credential_redacted_in_display() {
        let secret = "sk-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Config, "Test API key");

        let display = format!("{}", cred);
        assert!(!display.contains(secret), "Secret exposed in Display!");
        assert!(display.contains("Test API key"));
        assert!(display.contains("config"));
    }

    #[test]
    fn test_from_config_or_env_prefers_config() {
        std::env::set_var("VERITY_TEST_KEY_PRIORITY", "env-key");
        let cred = ApiCredential::from_config_or_env(
            Some("config-key"),
            "VERITY_TEST_KEY_PRIORITY",
            "Test key",
        )
        .unwrap();

        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), CredentialSource::Config);

        std::env::remove_var("VERITY_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_from_config_or_env_falls_back_to_env() {
        std::env::set_var("VERITY_TEST_KEY_FALLBACK", "env-key");
        let cred =
            ApiCredential::from_config_or_env(Some(""), "VERITY_TEST_KEY_FALLBACK", "Test key")
                .unwrap();

        assert_eq!(cred.expose(), "env-key");
        assert_eq!(cred.source(), CredentialSource::Environment);
        assert_eq!(cred.name(), "Test key");

        std::env::remove_var("VERITY_TEST_KEY_FALLBACK");
    }

    #[test]
    fn test_from_config_or_env_error_when_missing() {
        let err = ApiCredential::from_config_or_env(None, "VERITY_NONEXISTENT_VAR_12345", "Test key")
            .unwrap_err();

        assert!(err.to_string().contains("Test key"));
        assert!(err.to_string().contains("VERITY_NONEXISTENT_VAR_12345"));
    }
}
