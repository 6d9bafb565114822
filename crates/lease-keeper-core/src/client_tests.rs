//! Tests for the subscription client.

use super::*;
use crate::auth::StaticTokenProvider;
use crate::error::TransportError;
use crate::transport::Method;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Helpers
// ============================================================================

/// Transport that replays scripted responses and records every request.
#[derive(Default)]
struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl ScriptedTransport {
    fn replying(responses: Vec<RawResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Arc::default(),
        }
    }

    fn failing(error: TransportError) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Err(error)])),
            requests: Arc::default(),
        }
    }

    fn recorder(&self) -> Arc<Mutex<Vec<TransportRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RawResponse::json(200, "{}")))
    }
}

fn subscription() -> SubscriptionPath {
    SubscriptionPath::from_parts("test-project", "orders-sub").unwrap()
}

fn tokens(values: &[&str]) -> Vec<LeaseToken> {
    values.iter().map(|v| LeaseToken::new(*v).unwrap()).collect()
}

fn scripted_client(
    responses: Vec<RawResponse>,
) -> (SubscriptionClient, Arc<Mutex<Vec<TransportRequest>>>) {
    let transport = ScriptedTransport::replying(responses);
    let recorder = transport.recorder();
    let client = SubscriptionClient::builder(subscription())
        .build_with_transport(transport)
        .unwrap();
    (client, recorder)
}

async fn wiremock_client(server: &MockServer) -> SubscriptionClient {
    SubscriptionClient::builder(subscription())
        .config(ClientConfig::default().with_endpoint(server.uri()))
        .connect(&StaticTokenProvider::new("test-token"))
        .await
        .unwrap()
}

fn request_json(request: &TransportRequest) -> serde_json::Value {
    serde_json::from_slice(request.body().unwrap()).unwrap()
}

const SUB_PATH: &str = "/v1/projects/test-project/subscriptions/orders-sub";

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_client_config_defaults() {
    let config = ClientConfig::default();

    assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert_eq!(config.connect_timeout, Duration::from_secs(10));
    assert!(config.user_agent.starts_with("lease-keeper/"));
}

#[test]
fn test_client_config_builder() {
    let config = ClientConfig::builder()
        .endpoint("http://localhost:8085")
        .timeout(Duration::from_secs(5))
        .connect_timeout(Duration::from_secs(2))
        .user_agent("worker/1.0")
        .build();

    assert_eq!(config.endpoint, "http://localhost:8085");
    assert_eq!(config.timeout, Duration::from_secs(5));
    assert_eq!(config.connect_timeout, Duration::from_secs(2));
    assert_eq!(config.user_agent, "worker/1.0");
}

#[test]
fn test_invalid_endpoint_is_rejected() {
    for endpoint in ["not a url", "ftp://example.com", "mailto:ops@example.com"] {
        let result = SubscriptionClient::builder(subscription())
            .config(ClientConfig::default().with_endpoint(endpoint))
            .build_with_transport(ScriptedTransport::default());

        assert!(
            matches!(result, Err(SubscriptionError::Validation(_))),
            "endpoint {:?} should be rejected",
            endpoint
        );
    }
}

#[test]
fn test_operation_names() {
    assert_eq!(Operation::Pull.to_string(), "pull");
    assert_eq!(Operation::ModifyAckDeadline.to_string(), "modifyAckDeadline");
    assert_eq!(Operation::Acknowledge.to_string(), "acknowledge");
    assert_eq!(Operation::ListSubscriptions.as_str(), "listSubscriptions");
}

#[tokio::test]
async fn test_connect_fails_without_credentials() {
    let result = SubscriptionClient::builder(subscription())
        .connect(&StaticTokenProvider::new(""))
        .await;

    assert!(matches!(result, Err(SubscriptionError::Auth(_))));
}

// ============================================================================
// Fetch
// ============================================================================

#[tokio::test]
async fn test_fetch_sends_max_messages_to_pull_url() {
    let (client, requests) = scripted_client(vec![RawResponse::json(200, "{}")]);

    let batch = assert_ok!(client.fetch(10).await);
    assert!(batch.is_empty());

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method(), Method::Post);
    assert_eq!(
        requests[0].url().as_str(),
        "https://pubsub.googleapis.com/v1/projects/test-project/subscriptions/orders-sub:pull"
    );
    assert_eq!(request_json(&requests[0]), json!({ "maxMessages": 10 }));
}

#[tokio::test]
async fn test_fetch_zero_is_rejected_without_request() {
    let (client, requests) = scripted_client(vec![]);

    let err = assert_err!(client.fetch(0).await);

    match err {
        SubscriptionError::Validation(ValidationError::OutOfRange { field, .. }) => {
            assert_eq!(field, "max_messages");
        }
        other => panic!("Expected OutOfRange, got {:?}", other),
    }
    assert!(requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_returns_leases_in_order() {
    let body = json!({
        "receivedMessages": [
            { "ackId": "a1", "message": { "data": "aGVsbG8=", "messageId": "m1" } },
            { "ackId": "a2", "message": { "data": "d29ybGQ=", "messageId": "m2" } }
        ]
    });
    let (client, _) = scripted_client(vec![RawResponse::json(200, body.to_string())]);

    let batch = client.fetch(5).await.unwrap();

    let payloads: Vec<String> = batch.iter().map(|l| l.payload_text().unwrap()).collect();
    assert_eq!(payloads, vec!["hello", "world"]);
    assert_eq!(batch.lease_tokens(), tokens(&["a1", "a2"]));
}

#[tokio::test]
async fn test_fetch_rejects_oversized_batch() {
    let body = json!({
        "receivedMessages": [
            { "ackId": "a1", "message": { "data": "", "messageId": "m1" } },
            { "ackId": "a2", "message": { "data": "", "messageId": "m2" } }
        ]
    });
    let (client, _) = scripted_client(vec![RawResponse::json(200, body.to_string())]);

    let result = client.fetch(1).await;

    assert!(matches!(
        result,
        Err(SubscriptionError::Decode(DecodeError::BatchTooLarge {
            received: 2,
            requested: 1
        }))
    ));
}

#[tokio::test]
async fn test_fetch_wrong_content_type_is_decode_error() {
    let (client, _) = scripted_client(vec![RawResponse::new(
        200,
        Some("text/plain".to_string()),
        "{}",
    )]);

    let result = client.fetch(1).await;

    assert!(matches!(
        result,
        Err(SubscriptionError::Decode(DecodeError::UnexpectedContentType { .. }))
    ));
}

#[tokio::test]
async fn test_transport_failure_is_propagated() {
    let client = SubscriptionClient::builder(subscription())
        .build_with_transport(ScriptedTransport::failing(TransportError::MissingToken))
        .unwrap();

    let result = client.fetch(1).await;

    assert!(matches!(
        result,
        Err(SubscriptionError::Transport(TransportError::MissingToken))
    ));
}

// ============================================================================
// Extend / Release / Acknowledge
// ============================================================================

#[tokio::test]
async fn test_extend_lease_body() {
    let (client, requests) = scripted_client(vec![RawResponse::json(200, "{}")]);

    assert_ok!(client.extend_lease(&tokens(&["a1", "a2"]), 60).await);

    let requests = requests.lock().unwrap();
    assert!(requests[0]
        .url()
        .as_str()
        .ends_with("/subscriptions/orders-sub:modifyAckDeadline"));
    assert_eq!(
        request_json(&requests[0]),
        json!({ "ackIds": ["a1", "a2"], "ackDeadlineSeconds": 60 })
    );
}

#[tokio::test]
async fn test_release_extends_by_zero() {
    let (client, requests) = scripted_client(vec![RawResponse::json(200, "{}")]);

    assert_ok!(client.release(&tokens(&["a1"])).await);

    let requests = requests.lock().unwrap();
    assert_eq!(
        request_json(&requests[0]),
        json!({ "ackIds": ["a1"], "ackDeadlineSeconds": 0 })
    );
}

#[tokio::test]
async fn test_acknowledge_body() {
    let (client, requests) = scripted_client(vec![RawResponse::json(200, "{}")]);

    assert_ok!(client.acknowledge(&tokens(&["a1", "a2"])).await);

    let requests = requests.lock().unwrap();
    assert!(requests[0]
        .url()
        .as_str()
        .ends_with("/subscriptions/orders-sub:acknowledge"));
    assert_eq!(request_json(&requests[0]), json!({ "ackIds": ["a1", "a2"] }));
}

#[tokio::test]
async fn test_empty_lease_set_sends_nothing() {
    let (client, requests) = scripted_client(vec![]);

    let extend = client.extend_lease(&[], 30).await;
    let release = client.release(&[]).await;
    let ack = client.acknowledge(&[]).await;

    assert!(matches!(
        extend,
        Err(SubscriptionError::EmptyLeaseSet {
            operation: Operation::ModifyAckDeadline
        })
    ));
    assert!(matches!(
        release,
        Err(SubscriptionError::EmptyLeaseSet { .. })
    ));
    assert!(matches!(
        ack,
        Err(SubscriptionError::EmptyLeaseSet {
            operation: Operation::Acknowledge
        })
    ));
    assert!(requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_non_success_status_carries_status_and_body() {
    let cases = [
        (Operation::Pull, 403u16, "permission denied"),
        (Operation::ModifyAckDeadline, 400, "invalid ack id"),
        (Operation::Acknowledge, 503, "unavailable"),
    ];

    for (operation, status, body) in cases {
        let (client, _) = scripted_client(vec![RawResponse::new(
            status,
            Some("text/plain".to_string()),
            body,
        )]);

        let result = match operation {
            Operation::Pull => client.fetch(1).await.map(|_| ()),
            Operation::ModifyAckDeadline => client.extend_lease(&tokens(&["a1"]), 10).await,
            _ => client.acknowledge(&tokens(&["a1"])).await,
        };

        match result {
            Err(SubscriptionError::UnexpectedStatus {
                operation: got_operation,
                status: got_status,
                body: got_body,
            }) => {
                assert_eq!(got_operation, operation);
                assert_eq!(got_status, status);
                assert_eq!(got_body, body);
            }
            other => panic!("Expected UnexpectedStatus for {}, got {:?}", operation, other),
        }
    }
}

#[tokio::test]
async fn test_for_subscription_shares_transport() {
    let (client, requests) = scripted_client(vec![]);
    let other = client.for_subscription(SubscriptionPath::from_parts("test-project", "audit-sub").unwrap());

    other.acknowledge(&tokens(&["z1"])).await.unwrap();

    assert_eq!(other.subscription().subscription().as_str(), "audit-sub");
    assert_eq!(client.subscription().subscription().as_str(), "orders-sub");
    let requests = requests.lock().unwrap();
    assert!(requests[0]
        .url()
        .as_str()
        .ends_with("/subscriptions/audit-sub:acknowledge"));
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_list_subscriptions_follows_pages() {
    let first = json!({
        "subscriptions": [
            { "name": "projects/test-project/subscriptions/a", "topic": "projects/test-project/topics/t", "ackDeadlineSeconds": 10 }
        ],
        "nextPageToken": "page-2"
    });
    let second = json!({
        "subscriptions": [
            { "name": "projects/test-project/subscriptions/b", "topic": "projects/test-project/topics/t", "ackDeadlineSeconds": 60 }
        ]
    });
    let (client, requests) = scripted_client(vec![
        RawResponse::json(200, first.to_string()),
        RawResponse::json(200, second.to_string()),
    ]);
    let project = ProjectId::new("test-project").unwrap();

    let subscriptions = client.list_subscriptions(&project).await.unwrap();

    let ids: Vec<&str> = subscriptions.iter().map(|s| s.subscription_id()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(subscriptions[1].ack_deadline_seconds, 60);

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method(), Method::Get);
    assert_eq!(requests[0].url().query(), None);
    assert_eq!(
        requests[0].url().path(),
        "/v1/projects/test-project/subscriptions"
    );
    assert_eq!(requests[1].url().query(), Some("pageToken=page-2"));
}

#[tokio::test]
async fn test_list_subscriptions_rejects_repeated_page_token() {
    let page = |name: &str, next: &str| {
        RawResponse::json(
            200,
            json!({
                "subscriptions": [{ "name": format!("projects/test-project/subscriptions/{}", name) }],
                "nextPageToken": next
            })
            .to_string(),
        )
    };
    let (client, requests) = scripted_client(vec![
        page("a", "page-2"),
        page("b", "page-3"),
        page("c", "page-2"),
        page("d", ""),
    ]);
    let project = ProjectId::new("test-project").unwrap();

    let result = client.list_subscriptions(&project).await;

    match result {
        Err(SubscriptionError::Decode(DecodeError::MalformedResponse { message })) => {
            assert!(message.contains("page-2"));
        }
        other => panic!("Expected MalformedResponse, got {:?}", other),
    }
    assert_eq!(requests.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_list_subscriptions_stops_on_endlessly_repeated_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/test-project/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subscriptions": [{ "name": "projects/test-project/subscriptions/loop" }],
            "nextPageToken": "same"
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = wiremock_client(&mock_server).await;
    let project = ProjectId::new("test-project").unwrap();

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        client.list_subscriptions(&project),
    )
    .await
    .expect("listing should not loop forever");

    assert!(matches!(
        result,
        Err(SubscriptionError::Decode(DecodeError::MalformedResponse { .. }))
    ));
}

#[tokio::test]
async fn test_connection_lists_without_subscription() {
    let transport = ScriptedTransport::replying(vec![RawResponse::json(
        200,
        json!({ "subscriptions": [{ "name": "projects/p1/subscriptions/only" }] }).to_string(),
    )]);
    let recorder = transport.recorder();
    let connection = Connection::builder().build_with_transport(transport).unwrap();

    let subscriptions = connection
        .list_subscriptions(&ProjectId::new("p1").unwrap())
        .await
        .unwrap();

    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].topic, "");
    assert_eq!(
        recorder.lock().unwrap()[0].url().as_str(),
        "https://pubsub.googleapis.com/v1/projects/p1/subscriptions"
    );

    let client = connection.subscription(SubscriptionPath::from_parts("p1", "only").unwrap());
    assert_eq!(client.subscription().to_string(), "projects/p1/subscriptions/only");
}

// ============================================================================
// Over HTTP
// ============================================================================

#[tokio::test]
async fn test_lifecycle_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}:pull", SUB_PATH)))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({ "maxMessages": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "receivedMessages": [
                { "ackId": "a1", "message": { "data": "aGVsbG8=", "messageId": "m1" }, "deliveryAttempt": 1 },
                { "ackId": "a2", "message": { "data": "d29ybGQ=", "messageId": "m2" }, "deliveryAttempt": 1 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{}:acknowledge", SUB_PATH)))
        .and(body_json(json!({ "ackIds": ["a1", "a2"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = wiremock_client(&server).await;

    let batch = client.fetch(2).await.unwrap();
    assert_eq!(batch.len(), 2);
    client.acknowledge(&batch.lease_tokens()).await.unwrap();
}

#[tokio::test]
async fn test_list_subscriptions_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/test-project/subscriptions"))
        .and(query_param("pageToken", "next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subscriptions": [{ "name": "projects/test-project/subscriptions/second" }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/projects/test-project/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subscriptions": [{ "name": "projects/test-project/subscriptions/first" }],
            "nextPageToken": "next"
        })))
        .mount(&server)
        .await;

    let client = wiremock_client(&server).await;
    let project = ProjectId::new("test-project").unwrap();

    let subscriptions = client.list_subscriptions(&project).await.unwrap();

    let ids: Vec<&str> = subscriptions.iter().map(|s| s.subscription_id()).collect();
    assert_eq!(ids, vec!["first", "second"]);
}

#[tokio::test]
async fn test_concurrent_operations_on_shared_client() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}:acknowledge", SUB_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(8)
        .mount(&server)
        .await;

    let client = wiremock_client(&server).await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let token = LeaseToken::new(format!("ack-{}", i)).unwrap();
                client.acknowledge(&[token]).await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}
