//! U2F method configuration.

use url::Url;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid app id: {0}")]
    InvalidAppId(String),
}

/// Recognized options of the U2F method.
///
/// The app id is the application identity every challenge is bound to; it
/// is normalized to the origin (scheme + host + port) of the configured
/// URL. `allow_entry_batching` controls whether authentication checks the
/// union of all the user's keys for this method rather than only the
/// selected record. `help_url` is informational and has no behavioral
/// effect.
#[derive(Debug, Clone)]
pub struct U2fConfig {
    app_id: String,
    pub allow_entry_batching: bool,
    pub help_url: Option<String>,
}

impl U2fConfig {
    /// Create a configuration bound to the given site URL.
    pub fn new(app_id: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(app_id).map_err(|e| ConfigError::InvalidAppId(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidAppId(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }

        let origin = url.origin().ascii_serialization();
        if origin == "null" {
            return Err(ConfigError::InvalidAppId("opaque origin".into()));
        }

        Ok(Self {
            app_id: origin,
            allow_entry_batching: true,
            help_url: None,
        })
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `STEPGUARD_APP_ID` - site URL (default: "https://localhost")
    /// - `STEPGUARD_ALLOW_ENTRY_BATCHING` - "0"/"false"/"no" to disable
    /// - `STEPGUARD_HELP_URL` - informational help link
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_id = std::env::var("STEPGUARD_APP_ID")
            .unwrap_or_else(|_| "https://localhost".to_string());
        let mut config = Self::new(&app_id)?;

        if let Ok(value) = std::env::var("STEPGUARD_ALLOW_ENTRY_BATCHING") {
            config.allow_entry_batching =
                !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Ok(value) = std::env::var("STEPGUARD_HELP_URL") {
            if !value.is_empty() {
                config.help_url = Some(value);
            }
        }
        Ok(config)
    }

    pub fn with_entry_batching(mut self, allow: bool) -> Self {
        self.allow_entry_batching = allow;
        self
    }

    pub fn with_help_url(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }

    /// The normalized application identity (origin).
    pub fn app_id(&self) -> &str {
        &self.app_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_id_normalizes_to_origin() {
        let config = U2fConfig::new("https://example.com/some/path?x=1").unwrap();
        assert_eq!(config.app_id(), "https://example.com");

        let config = U2fConfig::new("https://example.com:8443/login").unwrap();
        assert_eq!(config.app_id(), "https://example.com:8443");
    }

    #[test]
    fn batching_defaults_on() {
        let config = U2fConfig::new("https://example.com").unwrap();
        assert!(config.allow_entry_batching);
        assert!(config.help_url.is_none());

        let config = config.with_entry_batching(false).with_help_url("https://docs");
        assert!(!config.allow_entry_batching);
        assert_eq!(config.help_url.as_deref(), Some("https://docs"));
    }

    #[test]
    fn rejects_unusable_app_ids() {
        assert!(U2fConfig::new("not a url").is_err());
        assert!(U2fConfig::new("ftp://example.com").is_err());
        assert!(U2fConfig::new("data:text/plain,hello").is_err());
    }
}
