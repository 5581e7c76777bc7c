//! The external OAuth collaborator.
//!
//! Two operations matter to the gateway: exchanging an authorization code
//! for a token pair (account provisioning) and refreshing an expiring pair.
//! Both are behind a trait so tests can drop in an in-memory endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::OauthConfig;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// A fresh token pair from the OAuth endpoint. `refresh_token` is absent
/// when the endpoint chooses not to rotate it.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// Failure talking to the token endpoint. The HTTP status (when there is
/// one) drives the refresher's classification.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TokenEndpointError {
    pub status: Option<u16>,
    pub message: String,
}

impl TokenEndpointError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a refresh token for a new grant.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, TokenEndpointError>;

    /// Exchange an authorization code (plus PKCE verifier) for a grant.
    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant, TokenEndpointError>;
}

/// Token endpoint over HTTP, sharing the process-wide reqwest client.
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    config: OauthConfig,
}

impl HttpTokenEndpoint {
    pub fn new(client: reqwest::Client, config: OauthConfig) -> Self {
        Self { client, config }
    }

    async fn post_form(
        &self,
        form: &[(&str, &str)],
    ) -> Result<TokenGrant, TokenEndpointError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .timeout(REFRESH_TIMEOUT)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TokenEndpointError::transport("token endpoint timed out")
                } else {
                    TokenEndpointError::transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenEndpointError {
                status: Some(status.as_u16()),
                message: if body.is_empty() {
                    format!("token endpoint returned {}", status)
                } else {
                    format!("token endpoint returned {}: {}", status, body)
                },
            });
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| TokenEndpointError::transport(format!("invalid token response: {}", e)))
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, TokenEndpointError> {
        self.post_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
        ])
        .await
    }

    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant, TokenEndpointError> {
        self.post_form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("state", state),
            ("code_verifier", code_verifier),
            ("client_id", &self.config.client_id),
            ("redirect_uri", &self.config.redirect_uri),
        ])
        .await
    }
}
