//! Credential files: service account keys and authorized user refresh tokens.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

use super::{exchange_client, exchange_token, BearerToken, CredentialProvider, PUBSUB_SCOPE};
use crate::error::AuthError;

/// Token endpoint used when a credential file does not name one
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for service account assertions, in seconds
const ASSERTION_LIFETIME_SECONDS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

// ============================================================================
// Credential File
// ============================================================================

/// Contents of a JSON credential file, discriminated by its `type` field
#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUserCredentials),
}

impl CredentialFile {
    /// Read and parse a credential file.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentialFile` if the file cannot be read or
    /// is not a supported credential type.
    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            AuthError::InvalidCredentialFile {
                path: path.to_path_buf(),
                message: format!("unable to read file: {}", e),
            }
        })?;

        Self::parse(&contents).map_err(|message| AuthError::InvalidCredentialFile {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse credential file contents
    pub fn parse(contents: &str) -> Result<Self, String> {
        serde_json::from_str(contents).map_err(|e| format!("unsupported credential file: {}", e))
    }

    /// Turn the file into the matching provider
    pub fn into_provider(self, scope: &str) -> Box<dyn CredentialProvider> {
        match self {
            Self::ServiceAccount(key) => Box::new(ServiceAccountProvider::new(key).with_scope(scope)),
            Self::AuthorizedUser(credentials) => Box::new(AuthorizedUserProvider::new(credentials)),
        }
    }
}

impl fmt::Debug for CredentialFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount(key) => f.debug_tuple("ServiceAccount").field(key).finish(),
            Self::AuthorizedUser(creds) => f.debug_tuple("AuthorizedUser").field(creds).finish(),
        }
    }
}

// ============================================================================
// Service Account
// ============================================================================

/// Service account key as issued in a JSON key file
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<REDACTED>")
            .field("private_key_id", &self.private_key_id)
            .field("project_id", &self.project_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Claims of the self-signed assertion exchanged at the token endpoint
#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Exchanges an RS256-signed JWT assertion for an access token
#[derive(Debug, Clone)]
pub struct ServiceAccountProvider {
    key: ServiceAccountKey,
    scope: String,
}

impl ServiceAccountProvider {
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            scope: PUBSUB_SCOPE.to_string(),
        }
    }

    /// Request a different OAuth scope
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn key(&self) -> &ServiceAccountKey {
        &self.key
    }

    /// Sign the assertion presented to the token endpoint
    fn assertion(&self) -> Result<String, AuthError> {
        let invalid = |message: String| AuthError::TokenExchangeFailed {
            source_name: "service account".to_string(),
            message,
        };

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.key.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECONDS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| invalid(format!("invalid private key: {}", e)))?;

        jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|e| invalid(format!("assertion signing failed: {}", e)))
    }
}

#[async_trait]
impl CredentialProvider for ServiceAccountProvider {
    async fn obtain(&self) -> Result<BearerToken, AuthError> {
        let source_name = "service account";
        let assertion = self.assertion()?;

        debug!(
            client_email = %self.key.client_email,
            token_uri = %self.key.token_uri,
            "Exchanging service account assertion"
        );

        let request = exchange_client(source_name)?
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())]);

        exchange_token(request, source_name).await
    }
}

// ============================================================================
// Authorized User
// ============================================================================

/// End-user credentials holding a long-lived refresh token
#[derive(Clone, Deserialize)]
pub struct AuthorizedUserCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for AuthorizedUserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedUserCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("refresh_token", &"<REDACTED>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Exchanges a refresh token for an access token
#[derive(Debug, Clone)]
pub struct AuthorizedUserProvider {
    credentials: AuthorizedUserCredentials,
}

impl AuthorizedUserProvider {
    pub fn new(credentials: AuthorizedUserCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for AuthorizedUserProvider {
    async fn obtain(&self) -> Result<BearerToken, AuthError> {
        let source_name = "authorized user";

        debug!(token_uri = %self.credentials.token_uri, "Exchanging refresh token");

        let request = exchange_client(source_name)?
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
            ]);

        exchange_token(request, source_name).await
    }
}

#[cfg(test)]
#[path = "service_account_tests.rs"]
mod tests;
