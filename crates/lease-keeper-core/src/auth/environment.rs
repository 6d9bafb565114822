//! Ambient credential discovery.
//!
//! Sources are tried in order:
//! 1. `PUBSUB_ACCESS_TOKEN` - a pre-minted access token
//! 2. `GOOGLE_APPLICATION_CREDENTIALS` - a service account or authorized user file
//! 3. The gcloud well-known file written by `gcloud auth application-default login`
//! 4. The metadata server, when `GCE_METADATA_HOST` is set or it was enabled explicitly

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    BearerToken, CredentialFile, CredentialProvider, MetadataServerProvider, StaticTokenProvider,
    PUBSUB_SCOPE,
};
use crate::error::AuthError;

/// Variable holding a pre-minted access token
pub const ACCESS_TOKEN_ENV: &str = "PUBSUB_ACCESS_TOKEN";
/// Variable pointing to a JSON credential file
pub const APPLICATION_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
/// Variable naming the metadata server host
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

/// File name gcloud uses for application default credentials
const WELL_KNOWN_FILE: &str = "application_default_credentials.json";

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Discovers credentials from the process environment
#[derive(Clone)]
pub struct EnvironmentCredentialProvider {
    lookup: EnvLookup,
    scope: String,
    use_metadata_server: bool,
}

impl EnvironmentCredentialProvider {
    /// Provider reading the real process environment
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    /// Provider reading variables through `lookup`
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Arc::new(lookup),
            scope: PUBSUB_SCOPE.to_string(),
            use_metadata_server: false,
        }
    }

    /// Request a different OAuth scope
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Fall back to the well-known metadata host even when `GCE_METADATA_HOST` is unset
    pub fn with_metadata_server(mut self, enabled: bool) -> Self {
        self.use_metadata_server = enabled;
        self
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.is_empty())
    }

    /// Location of the gcloud application default credentials file.
    ///
    /// `%APPDATA%\gcloud` on Windows, `$HOME/.config/gcloud` elsewhere.
    pub fn well_known_file(&self) -> Option<PathBuf> {
        if cfg!(windows) {
            self.var("APPDATA")
                .map(|dir| Path::new(&dir).join("gcloud").join(WELL_KNOWN_FILE))
        } else {
            self.var("HOME").map(|dir| {
                Path::new(&dir)
                    .join(".config")
                    .join("gcloud")
                    .join(WELL_KNOWN_FILE)
            })
        }
    }

    /// Pick the first configured credential source.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::CredentialUnavailable` when no source is configured and
    /// `AuthError::InvalidCredentialFile` when the credential file is unusable.
    pub async fn resolve(&self) -> Result<Box<dyn CredentialProvider>, AuthError> {
        if let Some(token) = self.var(ACCESS_TOKEN_ENV) {
            info!(source = ACCESS_TOKEN_ENV, "Using pre-minted access token");
            return Ok(Box::new(StaticTokenProvider::new(token)));
        }

        if let Some(path) = self.var(APPLICATION_CREDENTIALS_ENV) {
            let path = PathBuf::from(path);
            info!(path = %path.display(), "Using credential file");
            let file = CredentialFile::load(&path).await?;
            return Ok(file.into_provider(&self.scope));
        }

        if let Some(path) = self.well_known_file() {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                info!(path = %path.display(), "Using gcloud application default credentials");
                let file = CredentialFile::load(&path).await?;
                return Ok(file.into_provider(&self.scope));
            }
        }

        if let Some(host) = self.var(METADATA_HOST_ENV) {
            info!(host = %host, "Using metadata server");
            return Ok(Box::new(MetadataServerProvider::from_host(&host).with_scope(&self.scope)));
        }

        if self.use_metadata_server {
            info!("Using default metadata server");
            return Ok(Box::new(MetadataServerProvider::new().with_scope(&self.scope)));
        }

        debug!("No credential source found in environment");
        Err(AuthError::CredentialUnavailable {
            message: format!(
                "set {}, {} or {}, or run `gcloud auth application-default login`",
                ACCESS_TOKEN_ENV, APPLICATION_CREDENTIALS_ENV, METADATA_HOST_ENV
            ),
        })
    }
}

impl Default for EnvironmentCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EnvironmentCredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentCredentialProvider")
            .field("scope", &self.scope)
            .field("use_metadata_server", &self.use_metadata_server)
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for EnvironmentCredentialProvider {
    async fn obtain(&self) -> Result<BearerToken, AuthError> {
        self.resolve().await?.obtain().await
    }
}

#[cfg(test)]
#[path = "environment_tests.rs"]
mod tests;
