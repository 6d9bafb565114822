//! Error types for lease lifecycle operations.
//!
//! Every failure is returned to the immediate caller. The classification helpers
//! (`is_transient`) are informational only: nothing in this crate retries.

use std::path::PathBuf;

use thiserror::Error;

use crate::client::Operation;
use crate::lease::LeaseToken;

/// Standard result type for subscription operations
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Top-level error for every operation exposed by [`crate::SubscriptionClient`].
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Credential lookup or token exchange failed while building the client.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The request never produced an HTTP response.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The endpoint answered with a non-2xx status.
    #[error("Unexpected status {status} for {operation}: {body}")]
    UnexpectedStatus {
        operation: Operation,
        status: u16,
        body: String,
    },

    /// A 2xx response could not be turned into typed records.
    #[error("Response decoding failed: {0}")]
    Decode(#[from] DecodeError),

    /// Extend/acknowledge was called without any lease tokens.
    #[error("No lease tokens supplied for {operation}")]
    EmptyLeaseSet { operation: Operation },

    /// A caller-supplied argument failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl SubscriptionError {
    /// Check if the same call could succeed if the caller tried again.
    ///
    /// Transient conditions include:
    /// - Network failures and timeouts
    /// - Server errors (5xx)
    /// - Rate limiting (429)
    /// - Token exchange failures
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_transient(),
            Self::Transport(e) => e.is_transient(),
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
            Self::EmptyLeaseSet { .. } => false,
            Self::Validation(_) => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised while obtaining a bearer token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential source is configured in the environment.
    #[error("No credential source available: {message}")]
    CredentialUnavailable { message: String },

    /// A credential was found but could not be exchanged for an access token.
    #[error("Token exchange with {source_name} failed: {message}")]
    TokenExchangeFailed {
        source_name: String,
        message: String,
    },

    /// A credential file exists but cannot be used.
    #[error("Invalid credential file {}: {message}", .path.display())]
    InvalidCredentialFile { path: PathBuf, message: String },
}

impl AuthError {
    /// Only token exchange failures can clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TokenExchangeFailed { .. })
    }
}

/// Errors raised by the authenticated transport before a response exists.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport holds no bearer token and refuses to send.
    #[error("No bearer token available; refusing to send unauthenticated request")]
    MissingToken,

    /// Connection, TLS, timeout or body read failure.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request body could not be serialized.
    #[error("Request serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request could not be built (bad URL, bad client settings).
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::MissingToken => false,
            Self::Http(e) => !e.is_builder(),
            Self::Serialization(_) => false,
            Self::InvalidRequest { .. } => false,
        }
    }
}

/// Errors raised while decoding a successful response body.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unexpected content type: {content_type:?}")]
    UnexpectedContentType { content_type: Option<String> },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("Endpoint returned {received} messages but only {requested} were requested")]
    BatchTooLarge { received: usize, requested: u32 },
}

/// Payload decode failure scoped to a single lease.
///
/// Never invalidates the rest of the batch the lease arrived in.
#[derive(Debug, Clone, Error)]
pub enum PayloadDecodeError {
    #[error("Payload of lease {lease_token} is not valid base64: {source}")]
    InvalidBase64 {
        lease_token: LeaseToken,
        source: base64::DecodeError,
    },

    #[error("Payload of lease {lease_token} is not valid UTF-8")]
    InvalidUtf8 { lease_token: LeaseToken },
}

impl PayloadDecodeError {
    /// Lease whose payload failed to decode.
    pub fn lease_token(&self) -> &LeaseToken {
        match self {
            Self::InvalidBase64 { lease_token, .. } => lease_token,
            Self::InvalidUtf8 { lease_token } => lease_token,
        }
    }
}

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing.
    #[error("Required field missing: {field}")]
    Required { field: String },

    /// A field has an invalid format.
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    /// A field value is out of the acceptable range.
    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
