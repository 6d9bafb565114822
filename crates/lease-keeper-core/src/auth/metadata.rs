//! Tokens from the compute metadata server.

use async_trait::async_trait;
use tracing::debug;

use super::{exchange_client, exchange_token, BearerToken, CredentialProvider, PUBSUB_SCOPE};
use crate::error::AuthError;

const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const TOKEN_PATH: &str = "computeMetadata/v1/instance/service-accounts/default/token";

/// Asks the metadata server for a token of the instance's default service account
#[derive(Debug, Clone)]
pub struct MetadataServerProvider {
    base_url: String,
    scope: String,
}

impl MetadataServerProvider {
    /// Provider for the well-known metadata host
    pub fn new() -> Self {
        Self::from_host(DEFAULT_METADATA_HOST)
    }

    /// Provider for an explicit `host[:port]`
    pub fn from_host(host: &str) -> Self {
        Self {
            base_url: format!("http://{}", host.trim_end_matches('/')),
            scope: PUBSUB_SCOPE.to_string(),
        }
    }

    /// Request a different OAuth scope
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Token endpoint on the metadata server
    pub fn token_url(&self) -> String {
        format!("{}/{}", self.base_url, TOKEN_PATH)
    }
}

impl Default for MetadataServerProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for MetadataServerProvider {
    async fn obtain(&self) -> Result<BearerToken, AuthError> {
        let source_name = "metadata server";
        let url = self.token_url();

        debug!(url = %url, "Requesting token from metadata server");

        let request = exchange_client(source_name)?
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .query(&[("scopes", self.scope.as_str())]);

        exchange_token(request, source_name).await
    }
}
