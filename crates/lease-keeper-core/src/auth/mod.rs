//! Credential providers and bearer tokens.
//!
//! # Overview
//!
//! A [`CredentialProvider`] produces a [`BearerToken`] scoped to the messaging
//! service. The subscription client asks for a token exactly once, while it is
//! being built; tokens are never refreshed afterwards.
//!
//! Providers:
//! - [`StaticTokenProvider`] - a pre-minted access token
//! - [`ServiceAccountProvider`] - signed JWT assertion exchanged for a token
//! - [`AuthorizedUserProvider`] - refresh token exchanged for a token
//! - [`MetadataServerProvider`] - the compute metadata server
//! - [`EnvironmentCredentialProvider`] - discovers one of the above from the environment

mod environment;
mod metadata;
mod service_account;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, error};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AuthError;

pub use environment::{
    EnvironmentCredentialProvider, ACCESS_TOKEN_ENV, APPLICATION_CREDENTIALS_ENV,
    METADATA_HOST_ENV,
};
pub use metadata::MetadataServerProvider;
pub use service_account::{
    AuthorizedUserCredentials, AuthorizedUserProvider, CredentialFile, ServiceAccountKey,
    ServiceAccountProvider, DEFAULT_TOKEN_URI,
};

/// OAuth scope granting access to the messaging service
pub const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

// ============================================================================
// Bearer Token
// ============================================================================

/// Short-lived access token sent as `Authorization: Bearer <token>`.
///
/// The value is wiped from memory on drop and never shown by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BearerToken {
    value: String,
    #[zeroize(skip)]
    expires_at: Option<DateTime<Utc>>,
}

impl BearerToken {
    /// Token with unknown lifetime
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// Token with a known expiry
    pub fn with_expiry(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Raw token value (only for building the authorization header)
    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Tokens without a known expiry are never reported as expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Check if the token expires within `margin`
    pub fn expires_soon(&self, margin: Duration) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() + margin >= at)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("value", &"<REDACTED>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Source of bearer tokens for the messaging scope.
///
/// Implementations perform at most one exchange per call and never retry.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a token usable for the messaging scope.
    ///
    /// # Errors
    ///
    /// - `AuthError::CredentialUnavailable` if no credential source is configured
    /// - `AuthError::TokenExchangeFailed` if exchanging the credential fails
    async fn obtain(&self) -> Result<BearerToken, AuthError>;
}

/// Provider handing out a fixed, pre-minted token
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: BearerToken,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: BearerToken::new(token),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn obtain(&self) -> Result<BearerToken, AuthError> {
        if self.token.is_empty() {
            return Err(AuthError::CredentialUnavailable {
                message: "static token is empty".to_string(),
            });
        }

        Ok(self.token.clone())
    }
}

// ============================================================================
// Token Exchange
// ============================================================================

/// OAuth token endpoint response
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// HTTP client used for token exchanges
fn exchange_client(source_name: &str) -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| AuthError::TokenExchangeFailed {
            source_name: source_name.to_string(),
            message: format!("Failed to create HTTP client: {}", e),
        })
}

/// Send a prepared token request and turn the response into a [`BearerToken`].
async fn exchange_token(
    request: reqwest::RequestBuilder,
    source_name: &str,
) -> Result<BearerToken, AuthError> {
    let failed = |message: String| AuthError::TokenExchangeFailed {
        source_name: source_name.to_string(),
        message,
    };

    let response = request.send().await.map_err(|e| {
        error!(source = source_name, error = %e, "Token request failed");
        failed(format!("HTTP request failed: {}", e))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error body".to_string());
        error!(source = source_name, status = %status, "Token endpoint rejected credential");
        return Err(failed(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    let token = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| failed(format!("Failed to parse token response: {}", e)))?;

    if token.access_token.is_empty() {
        return Err(failed("token endpoint returned an empty access token".to_string()));
    }

    debug!(
        source = source_name,
        expires_in = ?token.expires_in,
        "Obtained access token"
    );

    Ok(match token.expires_in {
        Some(seconds) => {
            BearerToken::with_expiry(token.access_token, Utc::now() + Duration::seconds(seconds))
        }
        None => BearerToken::new(token.access_token),
    })
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
