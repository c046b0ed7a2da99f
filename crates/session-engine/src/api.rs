//! HTTP client for the Hearth identity service.
//!
//! The [`IdentityApi`] trait is the seam the session manager is built
//! against; tests inject a scripted implementation, production code uses
//! [`HttpIdentityApi`].

use crate::error::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Fields submitted at registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
}

/// Outbound surface of the identity service.
#[async_trait::async_trait]
pub trait IdentityApi: Send + Sync {
    /// Create an account. Returns the raw identity payload; registration
    /// alone does not yield a credential.
    async fn register(&self, request: &RegistrationRequest) -> AuthResult<Value>;

    /// Exchange credentials for a bearer token.
    async fn login(&self, email: &str, password: &str) -> AuthResult<TokenResponse>;

    /// Fetch the identity the given credential belongs to.
    async fn fetch_identity(&self, token: &str) -> AuthResult<Value>;

    /// Apply a partial update to the current identity.
    async fn update_identity(&self, token: &str, fields: &Value) -> AuthResult<Value>;

    /// Invalidate the credential server-side.
    async fn logout(&self, token: &str) -> AuthResult<()>;
}

/// Production [`IdentityApi`] backed by reqwest.
#[derive(Clone)]
pub struct HttpIdentityApi {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityApi {
    /// Create a client for the identity service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn classify_failure(response: reqwest::Response) -> AuthError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "Identity service request failed");
        AuthError::from_status(status, body)
    }
}

#[async_trait::async_trait]
impl IdentityApi for HttpIdentityApi {
    async fn register(&self, request: &RegistrationRequest) -> AuthResult<Value> {
        let url = self.endpoint("/auth/register");
        debug!(url = %url, email = %request.email, "Submitting registration");

        let response = self.http_client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }
        Ok(response.json().await?)
    }

    async fn login(&self, email: &str, password: &str) -> AuthResult<TokenResponse> {
        let url = self.endpoint("/auth/login");
        debug!(url = %url, email = %email, "Submitting login");

        // The token endpoint takes form-encoded username/password.
        let response = self
            .http_client
            .post(&url)
            .form(&[("username", email), ("password", password)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch_identity(&self, token: &str) -> AuthResult<Value> {
        let url = self.endpoint("/users/me");
        debug!(url = %url, "Fetching current identity");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }
        Ok(response.json().await?)
    }

    async fn update_identity(&self, token: &str, fields: &Value) -> AuthResult<Value> {
        let url = self.endpoint("/users/me");
        debug!(url = %url, "Updating current identity");

        let response = self
            .http_client
            .patch(&url)
            .bearer_auth(token)
            .json(fields)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }
        Ok(response.json().await?)
    }

    async fn logout(&self, token: &str) -> AuthResult<()> {
        let url = self.endpoint("/auth/logout");
        debug!(url = %url, "Notifying server of logout");

        let response = self.http_client.post(&url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }
        Ok(())
    }
}
