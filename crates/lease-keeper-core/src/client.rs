//! Subscription client: fetch, extend and acknowledge leases on one subscription.
//!
//! Every operation is a single request/response exchange. The client keeps no
//! record of which leases are in flight, runs no deadline timer and never retries.
//! A lease that is not acknowledged in time is simply redelivered by the endpoint.
//!
//! A [`Connection`] carries the transport and token. [`SubscriptionClient`]s
//! derived from it share both, so one connection can serve many concurrent
//! workers across subscriptions.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument};
use url::Url;

use crate::auth::{BearerToken, CredentialProvider};
use crate::decoder::{decode_batch, decode_json};
use crate::error::{
    DecodeError, SubscriptionError, SubscriptionResult, TransportError, ValidationError,
};
use crate::identity::{ProjectId, SubscriptionPath};
use crate::lease::{Batch, LeaseToken};
use crate::transport::{AuthenticatedTransport, HttpTransport, RawResponse, TransportRequest};
use crate::wire::{
    AcknowledgeRequest, ListSubscriptionsResponse, ModifyAckDeadlineRequest, PullRequest,
    SubscriptionInfo,
};

/// Production endpoint of the messaging service
pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

// ============================================================================
// Operations
// ============================================================================

/// Remote operations issued by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Pull,
    ModifyAckDeadline,
    Acknowledge,
    ListSubscriptions,
}

impl Operation {
    /// Name used in logs and, for lease operations, as the `:{operation}` URL suffix
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::ModifyAckDeadline => "modifyAckDeadline",
            Self::Acknowledge => "acknowledge",
            Self::ListSubscriptions => "listSubscriptions",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for subscription client behavior.
///
/// The request timeout is the only bound on how long an operation can take;
/// the client adds no deadline of its own.
///
/// # Examples
///
/// ```
/// use lease_keeper_core::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_endpoint("http://localhost:8085")
///     .with_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the messaging endpoint
    pub endpoint: String,
    /// Total request timeout
    pub timeout: Duration,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// User agent string for requests
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("lease-keeper/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a new builder for client configuration.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Set the endpoint base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Parse the endpoint into a base URL
    fn endpoint_url(&self) -> Result<Url, ValidationError> {
        let url = Url::parse(&self.endpoint).map_err(|e| ValidationError::InvalidFormat {
            field: "endpoint".to_string(),
            message: e.to_string(),
        })?;

        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidFormat {
                field: "endpoint".to_string(),
                message: "must be an http or https base URL".to_string(),
            });
        }

        Ok(url)
    }
}

/// Builder for constructing `ClientConfig` instances.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Authenticated link to the messaging endpoint, not bound to any subscription.
///
/// Hands out [`SubscriptionClient`]s and answers project-level queries. Clones
/// share the same transport and token.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn HttpTransport>,
    endpoint: Url,
}

impl Connection {
    /// Create a new builder for a connection.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Base URL requests are sent to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Client bound to `subscription` sharing this connection
    pub fn subscription(&self, subscription: SubscriptionPath) -> SubscriptionClient {
        SubscriptionClient {
            connection: self.clone(),
            subscription,
        }
    }

    /// List every subscription of `project`, following pagination to the end.
    ///
    /// # Errors
    ///
    /// - `SubscriptionError::Transport` if a request fails
    /// - `SubscriptionError::UnexpectedStatus` for a non-2xx page
    /// - `SubscriptionError::Decode` for a page that is not a subscription listing,
    ///   or when the endpoint hands out a page token it already returned
    #[instrument(skip(self), fields(project = %project))]
    pub async fn list_subscriptions(
        &self,
        project: &ProjectId,
    ) -> SubscriptionResult<Vec<SubscriptionInfo>> {
        let base = self.join(&format!("v1/projects/{}/subscriptions", project))?;

        let mut subscriptions = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();

        loop {
            let mut url = base.clone();
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }

            let response = self
                .execute(Operation::ListSubscriptions, TransportRequest::get(url))
                .await?;
            let page: ListSubscriptionsResponse = decode_json(&response)?;

            debug!(page_size = page.subscriptions.len(), "Received subscription page");
            subscriptions.extend(page.subscriptions);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) if !seen_tokens.insert(next.clone()) => {
                    error!(page_token = %next, "Endpoint repeated a page token");
                    return Err(DecodeError::MalformedResponse {
                        message: format!("page token {:?} was already returned", next),
                    }
                    .into());
                }
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        info!(count = subscriptions.len(), "Listed subscriptions");
        Ok(subscriptions)
    }

    fn join(&self, path: &str) -> SubscriptionResult<Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/{}", base, path)).map_err(|e| {
            TransportError::InvalidRequest {
                message: format!("cannot build URL for {}: {}", path, e),
            }
            .into()
        })
    }

    /// Send `request` and reject any non-2xx response.
    async fn execute(
        &self,
        operation: Operation,
        request: TransportRequest,
    ) -> SubscriptionResult<RawResponse> {
        debug!(operation = %operation, url = %request.url(), "Dispatching request");

        let response = self.transport.send(request).await.map_err(|e| {
            error!(operation = %operation, error = %e, "Unable to make request");
            SubscriptionError::from(e)
        })?;

        if !response.is_success() {
            let body = response.body_text();
            error!(
                operation = %operation,
                status = response.status,
                body = %body,
                "Unexpected status code"
            );

            return Err(SubscriptionError::UnexpectedStatus {
                operation,
                status: response.status,
                body,
            });
        }

        Ok(response)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint.as_str())
            .field("transport", &"<HttpTransport>")
            .finish()
    }
}

/// Builder for constructing `Connection` instances.
#[derive(Debug, Default)]
pub struct ConnectionBuilder {
    config: Option<ClientConfig>,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client configuration.
    ///
    /// If not set, uses `ClientConfig::default()`.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Obtain a token from `provider` once and build an authenticated connection.
    ///
    /// The token is not refreshed later; connect again once it expires.
    ///
    /// # Errors
    ///
    /// - `SubscriptionError::Auth` if the provider cannot produce a token
    /// - `SubscriptionError::Validation` if the endpoint is not a valid URL
    /// - `SubscriptionError::Transport` if the HTTP client cannot be created
    pub async fn connect(self, provider: &dyn CredentialProvider) -> SubscriptionResult<Connection> {
        let token = provider.obtain().await.map_err(|e| {
            error!(error = %e, "Unable to obtain bearer token");
            SubscriptionError::from(e)
        })?;

        self.build_with_token(token)
    }

    /// Build an authenticated connection around an already obtained token.
    pub fn build_with_token(self, token: BearerToken) -> SubscriptionResult<Connection> {
        let config = self.config.clone().unwrap_or_default();
        let transport = AuthenticatedTransport::new(token, &config)?;
        self.build_with_transport(transport)
    }

    /// Build a connection on top of a custom transport.
    pub fn build_with_transport(
        self,
        transport: impl HttpTransport + 'static,
    ) -> SubscriptionResult<Connection> {
        let config = self.config.unwrap_or_default();
        let endpoint = config.endpoint_url()?;

        debug!(endpoint = %endpoint, "Built connection");

        Ok(Connection {
            transport: Arc::new(transport),
            endpoint,
        })
    }
}

// ============================================================================
// Subscription Client
// ============================================================================

/// Client for the lease lifecycle of one subscription.
///
/// # Examples
///
/// ```no_run
/// # use lease_keeper_core::{EnvironmentCredentialProvider, SubscriptionClient, SubscriptionPath};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let subscription = SubscriptionPath::from_parts("my-project", "orders")?;
/// let client = SubscriptionClient::builder(subscription)
///     .connect(&EnvironmentCredentialProvider::new())
///     .await?;
///
/// let batch = client.fetch(20).await?;
/// for lease in &batch {
///     println!("{}", lease.payload_text()?);
/// }
/// if !batch.is_empty() {
///     client.acknowledge(&batch.lease_tokens()).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SubscriptionClient {
    connection: Connection,
    subscription: SubscriptionPath,
}

impl SubscriptionClient {
    /// Create a new builder for a client bound to `subscription`.
    pub fn builder(subscription: SubscriptionPath) -> SubscriptionClientBuilder {
        SubscriptionClientBuilder {
            subscription,
            connection: ConnectionBuilder::new(),
        }
    }

    /// Subscription this client operates on
    pub fn subscription(&self) -> &SubscriptionPath {
        &self.subscription
    }

    /// Connection shared with every client derived from this one
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Client for another subscription sharing this client's transport and token
    pub fn for_subscription(&self, subscription: SubscriptionPath) -> Self {
        self.connection.subscription(subscription)
    }

    // ========================================================================
    // Lease Lifecycle
    // ========================================================================

    /// Pull up to `max_messages` leases.
    ///
    /// An empty batch means nothing was available and is not an error.
    ///
    /// # Errors
    ///
    /// - `SubscriptionError::Validation` if `max_messages` is 0 (no request is sent)
    /// - `SubscriptionError::Transport` if the request fails
    /// - `SubscriptionError::UnexpectedStatus` for a non-2xx response
    /// - `SubscriptionError::Decode` for a 2xx response that is not a pull result
    #[instrument(skip(self), fields(subscription = %self.subscription))]
    pub async fn fetch(&self, max_messages: u32) -> SubscriptionResult<Batch> {
        if max_messages == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }

        let url = self.operation_url(Operation::Pull)?;
        let request = TransportRequest::post_json(url, &PullRequest { max_messages })?;
        let response = self.connection.execute(Operation::Pull, request).await?;

        let batch = decode_batch(&response)?;
        if batch.len() > max_messages as usize {
            error!(
                received = batch.len(),
                requested = max_messages,
                "Endpoint returned more messages than requested"
            );
            return Err(DecodeError::BatchTooLarge {
                received: batch.len(),
                requested: max_messages,
            }
            .into());
        }

        info!(count = batch.len(), "Fetched leases");
        Ok(batch)
    }

    /// Postpone redelivery of the given leases by `extension_seconds` from now.
    ///
    /// The extension applies to all listed leases or, if this returns an error,
    /// must be assumed to have applied to none of them.
    ///
    /// # Errors
    ///
    /// - `SubscriptionError::EmptyLeaseSet` if `lease_tokens` is empty (no request is sent)
    /// - `SubscriptionError::Transport` / `UnexpectedStatus` as for [`Self::fetch`]
    #[instrument(skip(self, lease_tokens), fields(subscription = %self.subscription, count = lease_tokens.len()))]
    pub async fn extend_lease(
        &self,
        lease_tokens: &[LeaseToken],
        extension_seconds: u32,
    ) -> SubscriptionResult<()> {
        self.modify_ack_deadline(lease_tokens, extension_seconds)
            .await?;

        info!(
            count = lease_tokens.len(),
            extension_seconds = extension_seconds,
            "Extended leases"
        );
        Ok(())
    }

    /// Give the leases back for immediate redelivery.
    ///
    /// Equivalent to extending by zero seconds.
    #[instrument(skip(self, lease_tokens), fields(subscription = %self.subscription, count = lease_tokens.len()))]
    pub async fn release(&self, lease_tokens: &[LeaseToken]) -> SubscriptionResult<()> {
        self.modify_ack_deadline(lease_tokens, 0).await?;

        info!(count = lease_tokens.len(), "Released leases");
        Ok(())
    }

    /// Permanently remove the given leases from redelivery.
    ///
    /// Same all-or-nothing semantics as [`Self::extend_lease`]. What happens to
    /// tokens that were already acknowledged or have expired is up to the endpoint.
    ///
    /// # Errors
    ///
    /// - `SubscriptionError::EmptyLeaseSet` if `lease_tokens` is empty (no request is sent)
    /// - `SubscriptionError::Transport` / `UnexpectedStatus` as for [`Self::fetch`]
    #[instrument(skip(self, lease_tokens), fields(subscription = %self.subscription, count = lease_tokens.len()))]
    pub async fn acknowledge(&self, lease_tokens: &[LeaseToken]) -> SubscriptionResult<()> {
        if lease_tokens.is_empty() {
            error!("No lease tokens provided");
            return Err(SubscriptionError::EmptyLeaseSet {
                operation: Operation::Acknowledge,
            });
        }

        let url = self.operation_url(Operation::Acknowledge)?;
        let request = TransportRequest::post_json(
            url,
            &AcknowledgeRequest {
                ack_ids: lease_tokens,
            },
        )?;
        self.connection
            .execute(Operation::Acknowledge, request)
            .await?;

        info!(count = lease_tokens.len(), "Acknowledged leases");
        Ok(())
    }

    /// List every subscription of `project`.
    ///
    /// See [`Connection::list_subscriptions`].
    pub async fn list_subscriptions(
        &self,
        project: &ProjectId,
    ) -> SubscriptionResult<Vec<SubscriptionInfo>> {
        self.connection.list_subscriptions(project).await
    }

    async fn modify_ack_deadline(
        &self,
        lease_tokens: &[LeaseToken],
        ack_deadline_seconds: u32,
    ) -> SubscriptionResult<()> {
        if lease_tokens.is_empty() {
            error!("No lease tokens provided");
            return Err(SubscriptionError::EmptyLeaseSet {
                operation: Operation::ModifyAckDeadline,
            });
        }

        let url = self.operation_url(Operation::ModifyAckDeadline)?;
        let request = TransportRequest::post_json(
            url,
            &ModifyAckDeadlineRequest {
                ack_ids: lease_tokens,
                ack_deadline_seconds,
            },
        )?;
        self.connection
            .execute(Operation::ModifyAckDeadline, request)
            .await?;
        Ok(())
    }

    /// `{endpoint}/v1/projects/{project}/subscriptions/{subscription}:{operation}`
    fn operation_url(&self, operation: Operation) -> SubscriptionResult<Url> {
        self.connection
            .join(&format!("v1/{}:{}", self.subscription, operation))
    }
}

impl fmt::Debug for SubscriptionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("connection", &self.connection)
            .field("subscription", &self.subscription.to_string())
            .finish()
    }
}

/// Builder for constructing `SubscriptionClient` instances.
///
/// Shorthand for building a [`Connection`] and binding it to one subscription.
#[derive(Debug)]
pub struct SubscriptionClientBuilder {
    subscription: SubscriptionPath,
    connection: ConnectionBuilder,
}

impl SubscriptionClientBuilder {
    /// Set the client configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.connection = self.connection.config(config);
        self
    }

    /// See [`ConnectionBuilder::connect`].
    pub async fn connect(
        self,
        provider: &dyn CredentialProvider,
    ) -> SubscriptionResult<SubscriptionClient> {
        let connection = self.connection.connect(provider).await?;
        Ok(connection.subscription(self.subscription))
    }

    pub fn build_with_token(self, token: BearerToken) -> SubscriptionResult<SubscriptionClient> {
        let connection = self.connection.build_with_token(token)?;
        Ok(connection.subscription(self.subscription))
    }

    pub fn build_with_transport(
        self,
        transport: impl HttpTransport + 'static,
    ) -> SubscriptionResult<SubscriptionClient> {
        let connection = self.connection.build_with_transport(transport)?;
        Ok(connection.subscription(self.subscription))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
