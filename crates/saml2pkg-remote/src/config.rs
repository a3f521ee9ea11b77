use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Registry endpoint with optional bearer authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Bound on connecting and on waiting for a response. Artifact bodies get
    /// four times as long.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim().to_owned(),
            auth_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_token_sets_auth() {
        let config = RemoteConfig::new(" https://api.github.com/repos/x/y/releases ").with_token("t0k");
        assert_eq!(config.url, "https://api.github.com/repos/x/y/releases");
        assert_eq!(config.auth_token.as_deref(), Some("t0k"));
        assert_eq!(config.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let config = RemoteConfig::new("https://example.com").with_timeout(Duration::ZERO);
        assert_eq!(config.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn missing_timeout_deserializes_to_default() {
        let config: RemoteConfig =
            serde_json::from_str(r#"{"url": "https://example.com"}"#).unwrap();
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }
}
