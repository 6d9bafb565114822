//! Authenticated HTTP transport.
//!
//! [`HttpTransport`] is the seam between the subscription client and the network.
//! [`AuthenticatedTransport`] is the production implementation: it attaches the
//! bearer token to every request and refuses to send when it has none.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, warn};
use url::Url;

use crate::auth::BearerToken;
use crate::client::ClientConfig;
use crate::error::TransportError;

// ============================================================================
// Request / Response
// ============================================================================

/// HTTP methods used by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// A fully described request: method, target and optional JSON body
#[derive(Debug, Clone)]
pub struct TransportRequest {
    method: Method,
    url: Url,
    body: Option<Bytes>,
}

impl TransportRequest {
    /// GET request without a body
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            body: None,
        }
    }

    /// POST request with `body` serialized as JSON
    pub fn post_json(url: Url, body: &impl Serialize) -> Result<Self, TransportError> {
        let body = serde_json::to_vec(body)?;
        Ok(Self {
            method: Method::Post,
            url,
            body: Some(Bytes::from(body)),
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// Status, content type and body of a completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, content_type: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    /// 2xx response with a JSON body
    pub fn json(status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(status, Some("application/json".to_string()), body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, replacing invalid UTF-8
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Sends one request and returns the raw response.
///
/// Implementations must not retry and must not interpret the status code.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError>;
}

// ============================================================================
// Authenticated Transport
// ============================================================================

/// reqwest-backed transport that attaches `Authorization: Bearer <token>`.
///
/// The token is fixed at construction and never refreshed. Once it expires,
/// every request is rejected by the endpoint and a new client must be built.
#[derive(Clone)]
pub struct AuthenticatedTransport {
    http_client: reqwest::Client,
    token: BearerToken,
}

impl AuthenticatedTransport {
    /// Build the underlying HTTP client from `config` and bind it to `token`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` if the HTTP client cannot be created.
    pub fn new(token: BearerToken, config: &ClientConfig) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self::with_client(http_client, token))
    }

    /// Use an already configured HTTP client
    pub fn with_client(http_client: reqwest::Client, token: BearerToken) -> Self {
        Self { http_client, token }
    }

    pub fn token(&self) -> &BearerToken {
        &self.token
    }
}

#[async_trait]
impl HttpTransport for AuthenticatedTransport {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        if self.token.is_empty() {
            error!(url = %request.url, "Refusing to send request without bearer token");
            return Err(TransportError::MissingToken);
        }

        debug!(method = %request.method, url = %request.url, "Sending request");

        let mut builder = match request.method {
            Method::Get => self.http_client.get(request.url.clone()),
            Method::Post => self.http_client.post(request.url.clone()),
        }
        .header(AUTHORIZATION, format!("Bearer {}", self.token.secret()));

        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = builder.send().await.map_err(|e| {
            error!(url = %request.url, error = %e, "Unable to make request");
            TransportError::Http(e)
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // A failed status is still reported when its body cannot be read.
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) if !(200..300).contains(&status) => {
                warn!(url = %request.url, status = status, error = %e, "Unable to read error body");
                Bytes::new()
            }
            Err(e) => {
                error!(url = %request.url, error = %e, "Unable to read response body");
                return Err(TransportError::Http(e));
            }
        };

        debug!(status = status, bytes = body.len(), "Received response");

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

impl fmt::Debug for AuthenticatedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedTransport")
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
