//! Backward pagination of a single chat's message history.
//!
//! The remote history endpoint takes only a request count, so paging backward
//! grows the requested window and filters the overlap: every page keeps only
//! messages strictly older than the current oldest-loaded timestamp. `has_more`
//! is inferred from the page being full, an approximation rather than a
//! server-confirmed cursor. It can cost one extra request at the true end of
//! history and can under-report when the server filters its own reply; both
//! are accepted rather than inventing a cursor the API does not provide.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::cache::merge_messages;
use crate::errors::{ChatSyncError, ChatSyncResult};
use crate::types::{Direction, Message};

#[cfg(test)]
#[path = "tests.rs"]
mod tests;

/// One fetched page, ascending by timestamp.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// Per-chat pagination state.
#[derive(Debug, Clone, Default)]
pub struct PaginationCursor {
    /// Oldest timestamp loaded so far; `None` until the first page lands.
    pub oldest_ts: Option<i64>,
    pub has_more: bool,
    /// Single-flight flag: set while a fetch for this chat is in the air.
    pub busy: bool,
    /// Messages loaded so far, drives the grown request window.
    pub loaded: usize,
}

pub struct HistoryPager {
    api: Arc<ApiClient>,
    page_size: u32,
    cursors: Mutex<HashMap<String, PaginationCursor>>,
}

impl HistoryPager {
    pub fn new(api: Arc<ApiClient>, page_size: u32) -> Self {
        Self {
            api,
            page_size: page_size.max(1),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of a chat's pagination state.
    pub fn cursor(&self, chat_id: &str) -> PaginationCursor {
        self.cursors
            .lock()
            .map(|cursors| cursors.get(chat_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Drop a chat's pagination state (chat switch, full resync).
    pub fn reset(&self, chat_id: &str) {
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.remove(chat_id);
        }
    }

    /// Fetch the newest page for a chat. Returns `Ok(None)` when another fetch
    /// for the same chat is already in flight (single-flight skip).
    pub async fn load_initial(&self, chat_id: &str) -> ChatSyncResult<Option<HistoryPage>> {
        if !self.begin_flight(chat_id) {
            debug!("History fetch for '{}' skipped: already in flight", chat_id);
            return Ok(None);
        }

        match self.fetch_window(chat_id, self.page_size).await {
            Ok((messages, raw_len)) => {
                let has_more = raw_len >= self.page_size as usize && !messages.is_empty();
                if let Ok(mut cursors) = self.cursors.lock() {
                    cursors.insert(
                        chat_id.to_string(),
                        PaginationCursor {
                            oldest_ts: messages.first().map(|m| m.timestamp),
                            has_more,
                            busy: false,
                            loaded: messages.len(),
                        },
                    );
                }
                Ok(Some(HistoryPage { messages, has_more }))
            }
            Err(e) => {
                self.end_flight(chat_id);
                Err(e)
            }
        }
    }

    /// Fetch the page preceding `before_ts`. Returns `Ok(None)` on the
    /// single-flight skip. Only messages strictly older than `before_ts`
    /// survive, guarding against the server's overlapping windows.
    pub async fn load_more(
        &self,
        chat_id: &str,
        before_ts: i64,
    ) -> ChatSyncResult<Option<HistoryPage>> {
        if !self.begin_flight(chat_id) {
            debug!("load_more for '{}' rejected: fetch already in flight", chat_id);
            return Ok(None);
        }

        let request_count = {
            let loaded = self
                .cursors
                .lock()
                .map(|cursors| cursors.get(chat_id).map_or(0, |c| c.loaded))
                .unwrap_or(0);
            (loaded as u32).saturating_add(self.page_size)
        };

        match self.fetch_window(chat_id, request_count).await {
            Ok((messages, raw_len)) => {
                let page: Vec<Message> = messages
                    .into_iter()
                    .filter(|m| m.timestamp < before_ts)
                    .collect();
                // A full raw window with nothing new would loop forever on the
                // next scroll; an empty page therefore always ends pagination.
                let has_more = raw_len >= request_count as usize && !page.is_empty();
                if let Ok(mut cursors) = self.cursors.lock() {
                    let cursor = cursors.entry(chat_id.to_string()).or_default();
                    if let Some(oldest) = page.first().map(|m| m.timestamp) {
                        cursor.oldest_ts = Some(cursor.oldest_ts.map_or(oldest, |o| o.min(oldest)));
                    }
                    cursor.loaded += page.len();
                    cursor.has_more = has_more;
                    cursor.busy = false;
                }
                Ok(Some(HistoryPage {
                    messages: page,
                    has_more,
                }))
            }
            Err(e) => {
                self.end_flight(chat_id);
                Err(e)
            }
        }
    }

    /// One remote window: normalized, deduplicated, ascending. Returns the raw
    /// item count alongside for the fullness heuristic. Malformed bodies
    /// degrade to an empty window.
    async fn fetch_window(
        &self,
        chat_id: &str,
        count: u32,
    ) -> ChatSyncResult<(Vec<Message>, usize)> {
        let value = match self.api.get_chat_history(chat_id, count).await {
            Ok(value) => value,
            Err(ChatSyncError::MalformedResponse(e)) => {
                warn!("History for '{}' malformed, treating as empty: {}", chat_id, e);
                return Ok((Vec::new(), 0));
            }
            Err(e) => return Err(e),
        };
        let Some(items) = value.as_array() else {
            warn!("History for '{}' is not an array, treating as empty", chat_id);
            return Ok((Vec::new(), 0));
        };

        let raw_len = items.len();
        let messages: Vec<Message> = items
            .iter()
            .filter_map(|raw| Message::from_provider(raw, Direction::Inbound))
            .filter(|m| m.chat_id == chat_id)
            .collect();
        Ok((merge_messages(&[], &messages), raw_len))
    }

    fn begin_flight(&self, chat_id: &str) -> bool {
        let Ok(mut cursors) = self.cursors.lock() else {
            return false;
        };
        let cursor = cursors.entry(chat_id.to_string()).or_default();
        if cursor.busy {
            false
        } else {
            cursor.busy = true;
            true
        }
    }

    fn end_flight(&self, chat_id: &str) {
        if let Ok(mut cursors) = self.cursors.lock()
            && let Some(cursor) = cursors.get_mut(chat_id)
        {
            cursor.busy = false;
        }
    }
}
