//! Engine configuration.

use crate::error::{AuthError, AuthResult};
use crate::retry::RetryPolicy;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT_API_URL: &str = "https://api.hearth.homes";

/// Tunables for the session engine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the identity service.
    pub base_url: String,
    /// Assumed lifetime of an issued credential.
    pub token_ttl: Duration,
    /// How long before expiry renewal should run.
    pub renewal_lead: Duration,
    /// Retry behavior for identity reads and writes.
    pub retry: RetryPolicy,
    /// Renewal failures tolerated before the session is torn down.
    pub refresh_max_retries: u32,
    /// Base delay between renewal retries; retry `n` waits `n * base`.
    pub refresh_base_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            token_ttl: Duration::from_secs(30 * 60),
            renewal_lead: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
            refresh_max_retries: 3,
            refresh_base_delay: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    /// Defaults, with the API URL taken from `HEARTH_API_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("HEARTH_API_URL") {
            if !url.trim().is_empty() {
                debug!(url = %url, "Using API URL from environment");
                config.base_url = url;
            }
        }
        config
    }

    /// Parsed and validated API base URL.
    pub fn api_url(&self) -> AuthResult<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| AuthError::Validation(format!("invalid API URL {:?}: {}", self.base_url, e)))
    }

    /// How long after issuance the credential should be renewed.
    pub fn renew_after(&self) -> Duration {
        self.token_ttl.saturating_sub(self.renewal_lead)
    }

    /// Delay before renewal retry number `retry_count` (1-indexed).
    pub fn refresh_delay_for(&self, retry_count: u32) -> Duration {
        self.refresh_base_delay.saturating_mul(retry_count)
    }
}
