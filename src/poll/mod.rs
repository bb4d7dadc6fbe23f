//! Background notification polling.
//!
//! A fixed-interval task drains the provider's notification queue and triggers
//! a refresh of the chat list plus the currently selected chat's history,
//! never a blind refresh of every chat. Bursty notification delivery is
//! throttled to at most one cache-invalidating refresh per window; a refresh
//! that collides with an in-flight history fetch is skipped and retried on
//! the next tick. The task is fully torn down on `stop`, leaving no dangling
//! timers.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::{ChatSyncError, ChatSyncResult};
use crate::sync::SyncOrchestrator;
use crate::utils::now_ms;


/// Notification-processing state for the active session.
#[derive(Debug, Clone, Default)]
pub struct PollState {
    /// Receipt id of the last notification consumed and acknowledged.
    pub last_receipt: Option<u64>,
    /// Epoch ms of the last refresh attempt, drives the throttle window.
    pub last_refresh_ms: i64,
}

pub struct PollScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    throttle: Duration,
    max_per_tick: u32,
    running: Arc<tokio::sync::Mutex<bool>>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    state: Arc<std::sync::Mutex<PollState>>,
}

impl PollScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, config: &EngineConfig) -> Self {
        Self {
            orchestrator,
            interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            throttle: Duration::from_millis(config.refresh_throttle_ms),
            max_per_tick: config.max_notifications_per_tick.max(1),
            running: Arc::new(tokio::sync::Mutex::new(false)),
            handle: std::sync::Mutex::new(None),
            state: Arc::new(std::sync::Mutex::new(PollState::default())),
        }
    }

    /// Start polling. Requires a selected account whose credential shape is
    /// valid; there is no point scheduling doomed requests.
    pub async fn start(&self) -> ChatSyncResult<()> {
        let api = self
            .orchestrator
            .api()
            .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;
        api.account().validate()?;

        *self.running.lock().await = true;
        let running = self.running.clone();
        let orchestrator = self.orchestrator.clone();
        let state = self.state.clone();
        let interval = self.interval;
        let throttle = self.throttle;
        let max_per_tick = self.max_per_tick;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !*running.lock().await {
                    break;
                }
                Self::run_tick(&orchestrator, &state, throttle, max_per_tick).await;
            }
        });

        if let Ok(mut slot) = self.handle.lock() {
            // Restarting replaces any previous timer task.
            if let Some(old) = slot.replace(handle) {
                warn!("Poll scheduler restarted, aborting previous timer");
                old.abort();
            }
        }
        info!("Poll scheduler started (every {}s)", self.interval.as_secs());
        Ok(())
    }

    /// Stop polling and tear the timer task down.
    pub async fn stop(&self) {
        *self.running.lock().await = false;
        if let Ok(mut slot) = self.handle.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
        info!("Poll scheduler stopped");
    }

    /// Snapshot of the notification-processing state.
    pub fn poll_state(&self) -> PollState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// One poll cycle: drain a bounded number of notifications, acknowledge
    /// each, then refresh at most once per throttle window.
    pub(crate) async fn run_tick(
        orchestrator: &Arc<SyncOrchestrator>,
        state: &Arc<std::sync::Mutex<PollState>>,
        throttle: Duration,
        max_per_tick: u32,
    ) {
        let Some(api) = orchestrator.api() else {
            return;
        };

        let mut saw_notification = false;
        for _ in 0..max_per_tick {
            let notification = match api.receive_notification().await {
                Ok(value) => value,
                Err(e) => {
                    warn!("Notification poll failed: {}", e);
                    break;
                }
            };
            if notification.is_null() {
                break;
            }
            saw_notification = true;

            let receipt = notification.get("receiptId").and_then(Value::as_u64);
            if let Ok(mut poll_state) = state.lock() {
                poll_state.last_receipt = receipt;
            }
            debug!("Notification received (receipt {:?})", receipt);

            // Acknowledge so the provider queue drains; a failed ack just
            // means the notification comes around again next tick.
            if let Some(receipt) = receipt
                && let Err(e) = api.delete_notification(receipt).await
            {
                warn!("Failed to acknowledge notification {}: {}", receipt, e);
            }
        }

        if !saw_notification {
            return;
        }

        let now = now_ms();
        let due = state
            .lock()
            .map(|mut poll_state| {
                if refresh_due(&poll_state, now, throttle) {
                    poll_state.last_refresh_ms = now;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if !due {
            debug!("Poll refresh throttled");
            return;
        }

        match orchestrator.poll_refresh().await {
            Ok(true) => debug!("Poll refresh applied"),
            Ok(false) => debug!("Poll refresh skipped this cycle"),
            Err(e) => warn!("Poll refresh failed: {}", e),
        }
    }
}

/// Whether enough wall-clock time has passed since the last refresh attempt.
fn refresh_due(state: &PollState, now_ms: i64, throttle: Duration) -> bool {
    now_ms - state.last_refresh_ms >= throttle.as_millis() as i64
}
