//! # Lease Keeper Core
//!
//! Client for the lease lifecycle of a pull subscription on a hosted
//! publish/subscribe service.
//!
//! A consumer fetches a batch of messages, each of which comes with a lease
//! token. While the lease is held the message is hidden from other consumers.
//! The consumer may extend the lease while processing and acknowledges the
//! message once done. A lease that runs out is redelivered by the service.
//!
//! This library provides:
//! - Bearer-token credential discovery and an authenticated HTTP transport
//! - Fetch, extend, release and acknowledge on a single subscription
//! - Typed leases with lazily decoded payloads
//! - Subscription discovery for a project
//!
//! There is no background work: no lease timers, no retries, no token refresh.
//!
//! ## Module Organization
//!
//! - [`auth`] - Credential providers and bearer tokens
//! - [`client`] - Connection, subscription client and their configuration
//! - [`decoder`] - Pull response decoding
//! - [`error`] - Error types for all operations
//! - [`identity`] - Project and subscription identifiers
//! - [`lease`] - Leases, batches and payload policies
//! - [`transport`] - HTTP transport seam

pub mod auth;
pub mod client;
pub mod decoder;
pub mod error;
pub mod identity;
pub mod lease;
pub mod transport;

mod wire;

pub use auth::{
    BearerToken, CredentialProvider, EnvironmentCredentialProvider, MetadataServerProvider,
    ServiceAccountProvider, StaticTokenProvider, PUBSUB_SCOPE,
};
pub use client::{
    ClientConfig, ClientConfigBuilder, Connection, ConnectionBuilder, Operation,
    SubscriptionClient, SubscriptionClientBuilder, DEFAULT_ENDPOINT,
};
pub use error::{
    AuthError, DecodeError, PayloadDecodeError, SubscriptionError, SubscriptionResult,
    TransportError, ValidationError,
};
pub use identity::{ProjectId, SubscriptionId, SubscriptionPath};
pub use lease::{Batch, DecodedBatch, DecodedLease, Lease, LeaseToken, MessageId, PayloadPolicy};
pub use transport::{AuthenticatedTransport, HttpTransport, RawResponse, TransportRequest};
pub use wire::SubscriptionInfo;
