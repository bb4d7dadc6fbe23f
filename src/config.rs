//! Engine configuration.
//!
//! All values have defaults matching the hosted dashboard's behavior, so an
//! embedding application can start from `EngineConfig::default()` and override
//! selectively, or deserialize the whole block from its own config file.

use serde::{Deserialize, Serialize};

/// Retry behavior for the API client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempt budget for transport failures and non-2xx responses.
    #[serde(default = "default_max_attempts", rename = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms", rename = "initialDelayMs")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms", rename = "maxDelayMs")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier", rename = "backoffMultiplier")]
    pub backoff_multiplier: f64,
    /// Separate ceiling for 429 courtesy-wait retries.
    #[serde(default = "default_max_attempts", rename = "rateLimitMaxAttempts")]
    pub rate_limit_max_attempts: u32,
    /// Wait applied when a 429 carries no usable Retry-After hint.
    #[serde(default = "default_rate_limit_wait", rename = "rateLimitDefaultWaitSecs")]
    pub rate_limit_default_wait_secs: u64,
    /// Cap on any Retry-After hint the server sends.
    #[serde(default = "default_rate_limit_max_wait", rename = "rateLimitMaxWaitSecs")]
    pub rate_limit_max_wait_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_rate_limit_wait() -> u64 {
    1
}

fn default_rate_limit_max_wait() -> u64 {
    30
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            rate_limit_max_attempts: default_max_attempts(),
            rate_limit_default_wait_secs: default_rate_limit_wait(),
            rate_limit_max_wait_secs: default_rate_limit_max_wait(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_base_url", rename = "baseUrl")]
    pub base_url: String,
    /// TTL for the per-account chat-list cache.
    #[serde(default = "default_chat_list_ttl", rename = "chatListTtlSecs")]
    pub chat_list_ttl_secs: u64,
    /// TTL for the per-chat history cache. The durable shadow has no TTL.
    #[serde(default = "default_history_ttl", rename = "historyTtlSecs")]
    pub history_ttl_secs: u64,
    /// Background notification polling interval.
    #[serde(default = "default_poll_interval", rename = "pollIntervalSecs")]
    pub poll_interval_secs: u64,
    /// Minimum spacing between poll-triggered cache-invalidating refreshes.
    #[serde(default = "default_refresh_throttle", rename = "refreshThrottleMs")]
    pub refresh_throttle_ms: u64,
    /// History page request count; also drives the has-more heuristic.
    #[serde(default = "default_page_size", rename = "pageSize")]
    pub page_size: u32,
    /// Incoming-message window for chat-list assembly.
    #[serde(default = "default_chat_window", rename = "chatWindowMinutes")]
    pub chat_window_minutes: u32,
    /// Upper bound on notifications drained per poll tick.
    #[serde(default = "default_notifications_per_tick", rename = "maxNotificationsPerTick")]
    pub max_notifications_per_tick: u32,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_base_url() -> String {
    "https://api.green-api.com".to_string()
}

fn default_chat_list_ttl() -> u64 {
    30
}

fn default_history_ttl() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    15
}

fn default_refresh_throttle() -> u64 {
    1000
}

fn default_page_size() -> u32 {
    100
}

fn default_chat_window() -> u32 {
    1440
}

fn default_notifications_per_tick() -> u32 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_list_ttl_secs: default_chat_list_ttl(),
            history_ttl_secs: default_history_ttl(),
            poll_interval_secs: default_poll_interval(),
            refresh_throttle_ms: default_refresh_throttle(),
            page_size: default_page_size(),
            chat_window_minutes: default_chat_window(),
            max_notifications_per_tick: default_notifications_per_tick(),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_dashboard_behavior() {
        let config = EngineConfig::default();
        assert_eq!(config.chat_list_ttl_secs, 30);
        assert_eq!(config.history_ttl_secs, 10);
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.refresh_throttle_ms, 1000);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_empty_json_deserializes_with_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.base_url, "https://api.green-api.com");
        assert_eq!(config.retry.initial_delay_ms, 1000);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"pageSize": 50, "retry": {"maxAttempts": 5}}"#).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_delay_ms, 10000);
        assert_eq!(config.chat_list_ttl_secs, 30);
    }
}
