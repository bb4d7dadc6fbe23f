//! Rate-limit-aware HTTP client for the hosted messaging API.
//!
//! Every remote call goes through [`ApiClient::call`], which validates the
//! account's credential shape before touching the network, gives 429 responses
//! a courtesy wait driven by the server's `Retry-After` hint, and retries other
//! failures with exponential backoff up to a fixed budget. Expected failure
//! modes never panic: callers always get a tagged [`ChatSyncError`] so they
//! can degrade to a stale or empty view.

use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::RetryConfig;
use crate::errors::{ChatSyncError, ChatSyncResult};
use crate::types::Account;
use crate::utils::backoff_delay_ms;

#[cfg(test)]
#[path = "tests.rs"]
mod tests;

/// Collaborator receiving terminal API failures for external structured
/// logging. Fire-and-forget: implementations must not block and cannot fail
/// the calling request.
pub trait FailureReporter: Send + Sync {
    fn record_failure(&self, endpoint: &str, attempts: u32, error: &ChatSyncError);
}

/// Default reporter: structured log via `tracing`.
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn record_failure(&self, endpoint: &str, attempts: u32, error: &ChatSyncError) {
        error!(
            "API request '{}' failed after {} attempt(s): {}",
            endpoint, attempts, error
        );
    }
}

/// Build a `reqwest::Client` with standard timeouts (10 s connect, 30 s
/// overall). Falls back to the default client if the builder fails.
fn default_http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| Client::new())
}

pub struct ApiClient {
    account: Account,
    base_url: String,
    client: Client,
    retry: RetryConfig,
    reporter: Arc<dyn FailureReporter>,
}

impl ApiClient {
    pub fn new(account: Account, base_url: impl Into<String>, retry: RetryConfig) -> Self {
        Self::with_reporter(account, base_url, retry, Arc::new(TracingReporter))
    }

    pub fn with_reporter(
        account: Account,
        base_url: impl Into<String>,
        retry: RetryConfig,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        Self {
            account,
            base_url: base_url.into(),
            client: default_http_client(),
            retry,
            reporter,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    fn endpoint_url(&self, endpoint: &str, path_suffix: Option<&str>) -> String {
        let mut url = format!(
            "{}/waInstance{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.account.instance_id,
            endpoint,
            self.account.token
        );
        if let Some(suffix) = path_suffix {
            url.push('/');
            url.push_str(suffix);
        }
        url
    }

    /// Issue one API call with validation, courtesy 429 handling, and
    /// backoff retries. Returns the parsed response body.
    pub async fn call(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
        query: &[(&str, String)],
    ) -> ChatSyncResult<Value> {
        self.call_at(endpoint, None, method, body, query).await
    }

    async fn call_at(
        &self,
        endpoint: &str,
        path_suffix: Option<&str>,
        method: Method,
        body: Option<Value>,
        query: &[(&str, String)],
    ) -> ChatSyncResult<Value> {
        // Fail fast on malformed credentials instead of issuing a doomed request.
        if let Err(e) = self.account.validate() {
            self.reporter.record_failure(endpoint, 0, &e);
            return Err(e);
        }

        let url = self.endpoint_url(endpoint, path_suffix);
        let mut attempts: u32 = 0;
        let mut backoff_failures: u32 = 0;
        let mut rate_limit_hits: u32 = 0;

        loop {
            attempts += 1;
            match self.execute(&url, &method, body.as_ref(), query).await {
                Ok(value) => {
                    debug!("API request '{}' ok (attempt {})", endpoint, attempts);
                    return Ok(value);
                }
                Err(e @ ChatSyncError::InvalidCredentials(_))
                | Err(e @ ChatSyncError::MalformedResponse(_)) => {
                    self.reporter.record_failure(endpoint, attempts, &e);
                    return Err(e);
                }
                Err(ChatSyncError::RateLimited { retry_after }) => {
                    rate_limit_hits += 1;
                    if rate_limit_hits >= self.retry.rate_limit_max_attempts {
                        let err = ChatSyncError::RateLimited { retry_after };
                        self.reporter.record_failure(endpoint, attempts, &err);
                        return Err(err);
                    }
                    // Courtesy wait on the server's hint, distinct from the
                    // exponential-backoff path and its budget.
                    let wait = retry_after
                        .unwrap_or(self.retry.rate_limit_default_wait_secs)
                        .min(self.retry.rate_limit_max_wait_secs);
                    warn!(
                        "API request '{}' rate limited, waiting {}s before retry",
                        endpoint, wait
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                Err(e) => {
                    backoff_failures += 1;
                    if backoff_failures >= self.retry.max_attempts {
                        let err = ChatSyncError::Request {
                            message: format!(
                                "'{}' failed after {} attempt(s): {}",
                                endpoint, attempts, e
                            ),
                            retryable: false,
                        };
                        self.reporter.record_failure(endpoint, attempts, &err);
                        return Err(err);
                    }
                    let delay = backoff_delay_ms(
                        backoff_failures - 1,
                        self.retry.initial_delay_ms,
                        self.retry.backoff_multiplier,
                        self.retry.max_delay_ms,
                    );
                    warn!(
                        "API request '{}' failed (attempt {}): {}, retrying in {}ms",
                        endpoint, attempts, e, delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    /// Single request attempt, classified into the error taxonomy.
    async fn execute(
        &self,
        url: &str,
        method: &Method,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> ChatSyncResult<Value> {
        let mut request = self.client.request(method.clone(), url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await.map_err(|e| ChatSyncError::Request {
            message: format!("transport error: {}", e),
            retryable: true,
        })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(ChatSyncError::RateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ChatSyncError::InvalidCredentials(format!(
                "provider rejected credentials (status {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_else(|_| "unknown error".to_string());
            let preview: String = text.chars().take(200).collect();
            return Err(ChatSyncError::Request {
                message: format!("status {}: {}", status.as_u16(), preview),
                retryable: true,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| ChatSyncError::MalformedResponse(e.to_string()))
    }

    // --- Typed endpoint wrappers ---

    /// Incoming messages across all chats within the last `minutes`.
    pub async fn last_incoming_messages(&self, minutes: u32) -> ChatSyncResult<Value> {
        self.call(
            "lastIncomingMessages",
            Method::GET,
            None,
            &[("minutes", minutes.to_string())],
        )
        .await
    }

    /// Recently sent messages across all chats.
    pub async fn last_outgoing_messages(&self) -> ChatSyncResult<Value> {
        self.call("lastOutgoingMessages", Method::GET, None, &[]).await
    }

    /// Newest `count` history entries for one chat, newest first.
    pub async fn get_chat_history(&self, chat_id: &str, count: u32) -> ChatSyncResult<Value> {
        self.call(
            "getChatHistory",
            Method::POST,
            Some(json!({"chatId": chat_id, "count": count})),
            &[],
        )
        .await
    }

    pub async fn send_message(&self, chat_id: &str, message: &str) -> ChatSyncResult<Value> {
        self.call(
            "sendMessage",
            Method::POST,
            Some(json!({"chatId": chat_id, "message": message})),
            &[],
        )
        .await
    }

    /// Oldest unconsumed webhook notification, or JSON null when the queue is
    /// empty. Consumed notifications must be acknowledged with
    /// [`ApiClient::delete_notification`].
    pub async fn receive_notification(&self) -> ChatSyncResult<Value> {
        self.call("receiveNotification", Method::GET, None, &[]).await
    }

    pub async fn delete_notification(&self, receipt_id: u64) -> ChatSyncResult<Value> {
        self.call_at(
            "deleteNotification",
            Some(&receipt_id.to_string()),
            Method::DELETE,
            None,
            &[],
        )
        .await
    }

    pub async fn get_avatar(&self, chat_id: &str) -> ChatSyncResult<Value> {
        self.call(
            "getAvatar",
            Method::POST,
            Some(json!({"chatId": chat_id})),
            &[],
        )
        .await
    }
}
