//! Lease decoder: turns a raw pull response into a typed [`Batch`].
//!
//! Only the envelope is validated here. Payloads stay in wire form until the
//! caller asks for them through [`crate::Lease::payload`].

use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::error::DecodeError;
use crate::lease::{Batch, Lease, LeaseToken, MessageId};
use crate::transport::RawResponse;
use crate::wire::PullResponse;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Check that the response declares a JSON body.
pub fn ensure_json(response: &RawResponse) -> Result<(), DecodeError> {
    let is_json = response
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.to_ascii_lowercase().contains(JSON_CONTENT_TYPE));

    if !is_json {
        error!(content_type = ?response.content_type, "Unexpected content type");
        return Err(DecodeError::UnexpectedContentType {
            content_type: response.content_type.clone(),
        });
    }

    Ok(())
}

/// Parse a JSON response body into `T`.
///
/// An empty body is treated as `{}`.
pub(crate) fn decode_json<T>(response: &RawResponse) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
{
    ensure_json(response)?;

    let body: &[u8] = if response.body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        &response.body
    };

    serde_json::from_slice(body).map_err(|e| {
        error!(error = %e, "Unable to unmarshal response");
        DecodeError::MalformedResponse {
            message: e.to_string(),
        }
    })
}

/// Decode a pull response into a batch of leases.
///
/// # Errors
///
/// - `DecodeError::UnexpectedContentType` if the body is not declared as JSON
/// - `DecodeError::MalformedResponse` if the body does not have the pull shape
///   or a message arrives without a lease token
pub fn decode_batch(response: &RawResponse) -> Result<Batch, DecodeError> {
    let pull: PullResponse = decode_json(response)?;

    let mut leases = Vec::with_capacity(pull.received_messages.len());
    for (index, received) in pull.received_messages.into_iter().enumerate() {
        let lease_token =
            LeaseToken::new(received.ack_id).map_err(|_| DecodeError::MalformedResponse {
                message: format!("received message {} has an empty ackId", index),
            })?;

        if received.message.message_id.is_empty() {
            warn!(lease_token = %lease_token, "Received message without messageId");
        }

        let message = received.message;
        let mut lease = Lease::from_wire(
            lease_token,
            MessageId::new(message.message_id),
            message.data,
        )
        .with_publish_time(message.publish_time)
        .with_delivery_attempt(received.delivery_attempt.unwrap_or(1));

        for (key, value) in message.attributes {
            lease = lease.with_attribute(key, value);
        }
        if let Some(ordering_key) = message.ordering_key.filter(|k| !k.is_empty()) {
            lease = lease.with_ordering_key(ordering_key);
        }

        leases.push(lease);
    }

    Ok(Batch::new(leases))
}

#[cfg(test)]
#[path = "decoder_tests.rs"]
mod tests;
