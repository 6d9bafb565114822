//! JSON bodies exchanged with the subscription endpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::lease::LeaseToken;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PullRequest {
    pub max_messages: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ModifyAckDeadlineRequest<'a> {
    pub ack_ids: &'a [LeaseToken],
    pub ack_deadline_seconds: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AcknowledgeRequest<'a> {
    pub ack_ids: &'a [LeaseToken],
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PullResponse {
    #[serde(default)]
    pub received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReceivedMessage {
    pub ack_id: String,
    pub message: WireMessage,
    #[serde(default)]
    pub delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub publish_time: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub ordering_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListSubscriptionsResponse {
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionInfo>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Subscription as described by the listing endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    /// Full resource name: `projects/{project}/subscriptions/{subscription}`
    pub name: String,
    /// Topic the subscription is attached to
    #[serde(default)]
    pub topic: String,
    /// Default lease duration granted by a pull
    #[serde(default)]
    pub ack_deadline_seconds: u32,
}

impl SubscriptionInfo {
    /// Last path segment of the resource name
    pub fn subscription_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}
