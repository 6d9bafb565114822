//! Leases and batches: messages delivered by a pull and not yet acknowledged.
//!
//! A [`Lease`] keeps its payload in wire form. The payload is decoded only when
//! [`Lease::payload`] is called, so one corrupt message never invalidates the
//! rest of the [`Batch`] it arrived in.
//!
//! The client keeps no local deadline timer. Whether a lease is still valid is
//! known only to the endpoint; an expired lease shows up again as a redelivery
//! with a higher [`Lease::delivery_attempt`].

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PayloadDecodeError, ValidationError};

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque, server-assigned token (`ackId`) required to extend or acknowledge a lease.
///
/// Once acknowledged a token must not be reused; the endpoint decides what a
/// repeated acknowledgement means.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Create new lease token; empty tokens are rejected
    pub fn new(token: impl Into<String>) -> Result<Self, ValidationError> {
        let token = token.into();
        if token.is_empty() {
            return Err(ValidationError::Required {
                field: "lease_token".to_string(),
            });
        }

        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LeaseToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Server-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Lease
// ============================================================================

/// One delivered-but-unacknowledged message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    lease_token: LeaseToken,
    message_id: MessageId,
    encoded_payload: String,
    publish_time: String,
    delivery_attempt: u32,
    attributes: HashMap<String, String>,
    ordering_key: Option<String>,
}

impl Lease {
    /// Create a lease from raw payload bytes, encoding them into wire form.
    pub fn new(lease_token: LeaseToken, message_id: MessageId, payload: &[u8]) -> Self {
        Self::from_wire(
            lease_token,
            message_id,
            general_purpose::STANDARD.encode(payload),
        )
    }

    /// Create a lease from a payload that is still in wire (base64) form.
    pub fn from_wire(
        lease_token: LeaseToken,
        message_id: MessageId,
        encoded_payload: impl Into<String>,
    ) -> Self {
        Self {
            lease_token,
            message_id,
            encoded_payload: encoded_payload.into(),
            publish_time: String::new(),
            delivery_attempt: 1,
            attributes: HashMap::new(),
            ordering_key: None,
        }
    }

    /// Set the publish timestamp (RFC 3339)
    pub fn with_publish_time(mut self, publish_time: impl Into<String>) -> Self {
        self.publish_time = publish_time.into();
        self
    }

    /// Set the delivery attempt; values below 1 are raised to 1
    pub fn with_delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = attempt.max(1);
        self
    }

    /// Add a message attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the ordering key the message was published with
    pub fn with_ordering_key(mut self, ordering_key: impl Into<String>) -> Self {
        self.ordering_key = Some(ordering_key.into());
        self
    }

    pub fn lease_token(&self) -> &LeaseToken {
        &self.lease_token
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Payload exactly as it arrived on the wire
    pub fn encoded_payload(&self) -> &str {
        &self.encoded_payload
    }

    /// Decode the payload from its wire encoding.
    ///
    /// Decoding happens on every call; nothing is cached on the lease.
    pub fn payload(&self) -> Result<Bytes, PayloadDecodeError> {
        general_purpose::STANDARD
            .decode(&self.encoded_payload)
            .map(Bytes::from)
            .map_err(|source| PayloadDecodeError::InvalidBase64 {
                lease_token: self.lease_token.clone(),
                source,
            })
    }

    /// Decode the payload and interpret it as UTF-8 text
    pub fn payload_text(&self) -> Result<String, PayloadDecodeError> {
        let bytes = self.payload()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PayloadDecodeError::InvalidUtf8 {
            lease_token: self.lease_token.clone(),
        })
    }

    /// Publish timestamp as sent by the endpoint
    pub fn publish_time_raw(&self) -> &str {
        &self.publish_time
    }

    /// Publish timestamp, if present and valid RFC 3339
    pub fn publish_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.publish_time)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Delivery attempt counter, starting at 1
    pub fn delivery_attempt(&self) -> u32 {
        self.delivery_attempt
    }

    /// Whether this is not the first delivery of the message
    pub fn is_redelivery(&self) -> bool {
        self.delivery_attempt > 1
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn ordering_key(&self) -> Option<&str> {
        self.ordering_key.as_deref()
    }
}

// ============================================================================
// Batch
// ============================================================================

/// Ordered leases returned by one fetch. May be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    leases: Vec<Lease>,
}

impl Batch {
    pub fn new(leases: Vec<Lease>) -> Self {
        Self { leases }
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn leases(&self) -> &[Lease] {
        &self.leases
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Lease> {
        self.leases.iter()
    }

    /// Lease tokens in delivery order, ready for extend or acknowledge
    pub fn lease_tokens(&self) -> Vec<LeaseToken> {
        self.leases.iter().map(|l| l.lease_token.clone()).collect()
    }

    /// Decode every payload in the batch under the given policy.
    ///
    /// With [`PayloadPolicy::Skip`] corrupt leases are collected in
    /// [`DecodedBatch::rejected`] and the rest are returned ready for processing.
    /// With [`PayloadPolicy::FailBatch`] the first corrupt lease fails the call.
    pub fn decode_payloads(&self, policy: PayloadPolicy) -> Result<DecodedBatch, PayloadDecodeError> {
        let mut decoded = DecodedBatch::default();

        for lease in &self.leases {
            match lease.payload() {
                Ok(payload) => decoded.ready.push(DecodedLease {
                    lease: lease.clone(),
                    payload,
                }),
                Err(e) => match policy {
                    PayloadPolicy::Skip => decoded.rejected.push(e),
                    PayloadPolicy::FailBatch => return Err(e),
                },
            }
        }

        Ok(decoded)
    }

    pub fn into_leases(self) -> Vec<Lease> {
        self.leases
    }
}

impl IntoIterator for Batch {
    type Item = Lease;
    type IntoIter = std::vec::IntoIter<Lease>;

    fn into_iter(self) -> Self::IntoIter {
        self.leases.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Lease;
    type IntoIter = std::slice::Iter<'a, Lease>;

    fn into_iter(self) -> Self::IntoIter {
        self.leases.iter()
    }
}

// ============================================================================
// Payload Handling Policy
// ============================================================================

/// What to do with a batch that contains a lease whose payload cannot be decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadPolicy {
    /// Process the decodable leases and leave the corrupt ones unacknowledged
    #[default]
    Skip,
    /// Refuse to process any lease of the batch
    FailBatch,
}

impl fmt::Display for PayloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::FailBatch => write!(f, "fail-batch"),
        }
    }
}

impl FromStr for PayloadPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "fail-batch" => Ok(Self::FailBatch),
            other => Err(ValidationError::InvalidFormat {
                field: "payload_policy".to_string(),
                message: format!("expected 'skip' or 'fail-batch', got '{}'", other),
            }),
        }
    }
}

/// A lease together with its decoded payload
#[derive(Debug, Clone)]
pub struct DecodedLease {
    pub lease: Lease,
    pub payload: Bytes,
}

/// Result of decoding a whole batch under [`PayloadPolicy::Skip`]
#[derive(Debug, Clone, Default)]
pub struct DecodedBatch {
    /// Leases whose payload decoded, in delivery order
    pub ready: Vec<DecodedLease>,
    /// Per-lease decode failures
    pub rejected: Vec<PayloadDecodeError>,
}

impl DecodedBatch {
    /// Tokens of the leases that are safe to process and acknowledge
    pub fn ready_tokens(&self) -> Vec<LeaseToken> {
        self.ready
            .iter()
            .map(|d| d.lease.lease_token().clone())
            .collect()
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
