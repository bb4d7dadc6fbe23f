use super::*;
use std::sync::Mutex;
use std::time::Instant;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "d75b3a66374942c5b3c019c698abc2067e151558acbd412b";

fn test_account() -> Account {
    Account::new("1101000001", TOKEN)
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2.0,
        rate_limit_max_attempts: 3,
        rate_limit_default_wait_secs: 0,
        rate_limit_max_wait_secs: 5,
    }
}

fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(test_account(), server.uri(), fast_retry())
}

struct RecordingReporter {
    failures: Mutex<Vec<(String, u32)>>,
}

impl RecordingReporter {
    fn new() -> Self {
        Self {
            failures: Mutex::new(Vec::new()),
        }
    }
}

impl FailureReporter for RecordingReporter {
    fn record_failure(&self, endpoint: &str, attempts: u32, _error: &ChatSyncError) {
        self.failures
            .lock()
            .unwrap()
            .push((endpoint.to_string(), attempts));
    }
}

#[tokio::test]
async fn test_success_returns_parsed_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/waInstance1101000001/lastOutgoingMessages/{}",
            TOKEN
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"chatId": "a@c.us"}])))
        .expect(1)
        .mount(&server)
        .await;

    let value = client_for(&server).last_outgoing_messages().await.unwrap();
    assert_eq!(value[0]["chatId"], "a@c.us");
}

#[tokio::test]
async fn test_query_params_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/waInstance1101000001/lastIncomingMessages/{}",
            TOKEN
        )))
        .and(query_param("minutes", "1440"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server).last_incoming_messages(1440).await.unwrap();
}

#[tokio::test]
async fn test_invalid_credentials_fail_fast_without_request() {
    let server = MockServer::start().await;
    // Any request reaching the server is a failure.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let bad = Account::new("not-numeric", TOKEN);
    let client = ApiClient::new(bad, server.uri(), fast_retry());
    let err = client.last_outgoing_messages().await.unwrap_err();
    assert!(matches!(err, ChatSyncError::InvalidCredentials(_)));
}

#[tokio::test]
async fn test_rate_limit_courtesy_wait_then_success() {
    let server = MockServer::start().await;
    let endpoint = format!("/waInstance1101000001/lastOutgoingMessages/{}", TOKEN);
    Mock::given(method("GET"))
        .and(path(endpoint.clone()))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "1"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let started = Instant::now();
    let result = client_for(&server).last_outgoing_messages().await;
    assert!(result.is_ok(), "expected success on attempt 2 of 3");
    // The courtesy wait must honor the server's hint.
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_rate_limit_ceiling_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client_for(&server).last_outgoing_messages().await.unwrap_err();
    assert!(matches!(err, ChatSyncError::RateLimited { retry_after: Some(0) }));
}

#[tokio::test]
async fn test_backoff_retries_transient_errors_then_succeeds() {
    let server = MockServer::start().await;
    let endpoint = format!("/waInstance1101000001/lastOutgoingMessages/{}", TOKEN);
    Mock::given(method("GET"))
        .and(path(endpoint.clone()))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client_for(&server).last_outgoing_messages().await.is_ok());
}

#[tokio::test]
async fn test_retry_budget_exhausted_surfaces_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = client_for(&server).last_outgoing_messages().await.unwrap_err();
    match err {
        ChatSyncError::Request { message, retryable } => {
            assert!(!retryable, "exhausted budget is terminal");
            assert!(message.contains("attempt"));
        }
        other => panic!("expected Request error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unparsable_success_body_is_malformed_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).last_outgoing_messages().await.unwrap_err();
    assert!(matches!(err, ChatSyncError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_unauthorized_maps_to_invalid_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).last_outgoing_messages().await.unwrap_err();
    assert!(matches!(err, ChatSyncError::InvalidCredentials(_)));
}

#[tokio::test]
async fn test_terminal_failure_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let reporter = Arc::new(RecordingReporter::new());
    let client = ApiClient::with_reporter(
        test_account(),
        server.uri(),
        fast_retry(),
        reporter.clone(),
    );
    let _ = client.last_outgoing_messages().await;

    let failures = reporter.failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "lastOutgoingMessages");
    assert_eq!(failures[0].1, 3);
}

#[tokio::test]
async fn test_send_message_posts_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/waInstance1101000001/sendMessage/{}", TOKEN)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"idMessage": "ABC123"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let value = client_for(&server)
        .send_message("79001234567@c.us", "hello")
        .await
        .unwrap();
    assert_eq!(value["idMessage"], "ABC123");
}

#[tokio::test]
async fn test_delete_notification_appends_receipt_to_path() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!(
            "/waInstance1101000001/deleteNotification/{}/42",
            TOKEN
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": true})))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server).delete_notification(42).await.unwrap();
}
