//! Common test utilities for lease-keeper integration tests
//!
//! This module provides:
//! - A mock messaging endpoint backed by wiremock
//! - Builders for pull response bodies
//! - Client construction against the mock endpoint

#![allow(dead_code)]

use base64::{engine::general_purpose, Engine as _};
use lease_keeper_core::{
    ClientConfig, LeaseToken, StaticTokenProvider, SubscriptionClient, SubscriptionPath,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PROJECT: &str = "integration-project";
pub const SUBSCRIPTION: &str = "integration-sub";
pub const TOKEN: &str = "ya29.integration";

// ============================================================================
// Mock Endpoint
// ============================================================================

/// Messaging endpoint double for one subscription
pub struct MockEndpoint {
    pub server: MockServer,
}

impl MockEndpoint {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// URL path of `operation` on the test subscription
    pub fn operation_path(&self, operation: &str) -> String {
        format!(
            "/v1/projects/{}/subscriptions/{}:{}",
            PROJECT, SUBSCRIPTION, operation
        )
    }

    /// Mock for `operation` that callers refine with matchers and expectations
    pub fn operation(&self, operation: &str) -> wiremock::MockBuilder {
        Mock::given(method("POST")).and(path(self.operation_path(operation)))
    }

    /// Answer every pull with `body`
    pub async fn serve_pull(&self, body: Value) {
        self.operation("pull")
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answer `operation` with `{}` and assert it is called exactly `times`
    pub async fn accept(&self, operation: &str, times: u64) {
        self.operation(operation)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Requests that reached `operation`, as JSON bodies
    pub async fn bodies(&self, operation: &str) -> Vec<Value> {
        let target = self.operation_path(operation);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == target)
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    /// Client bound to the test subscription, authenticated with [`TOKEN`]
    pub async fn client(&self) -> SubscriptionClient {
        SubscriptionClient::builder(subscription())
            .config(ClientConfig::default().with_endpoint(self.server.uri()))
            .connect(&StaticTokenProvider::new(TOKEN))
            .await
            .unwrap()
    }
}

// ============================================================================
// Test Data Builders
// ============================================================================

pub fn subscription() -> SubscriptionPath {
    SubscriptionPath::from_parts(PROJECT, SUBSCRIPTION).unwrap()
}

/// One `receivedMessages` entry carrying `payload`
pub fn received(ack_id: &str, payload: &[u8]) -> Value {
    json!({
        "ackId": ack_id,
        "message": {
            "data": general_purpose::STANDARD.encode(payload),
            "messageId": format!("msg-{}", ack_id),
            "publishTime": "2024-03-01T12:00:00.123456Z"
        },
        "deliveryAttempt": 1
    })
}

/// Pull response body with the given entries
pub fn pull_body(entries: Vec<Value>) -> Value {
    json!({ "receivedMessages": entries })
}

pub fn tokens(values: &[&str]) -> Vec<LeaseToken> {
    values.iter().map(|v| LeaseToken::new(*v).unwrap()).collect()
}
