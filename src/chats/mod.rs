//! Chat-list assembly: merges the inbound and outbound message streams into
//! one deduplicated, reverse-chronological list of conversations.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::errors::{ChatSyncError, ChatSyncResult};
use crate::types::{ChatSummary, Direction, Message, display_name_from_chat_id};


pub struct ChatAggregator {
    api: Arc<ApiClient>,
}

impl ChatAggregator {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// Build the chat list from inbound messages within `window_minutes` and
    /// all recent outbound messages. A malformed stream degrades to empty;
    /// a hard request failure propagates so the caller can keep prior state.
    pub async fn list_chats(&self, window_minutes: u32) -> ChatSyncResult<Vec<ChatSummary>> {
        let (incoming, outgoing) = tokio::join!(
            self.api.last_incoming_messages(window_minutes),
            self.api.last_outgoing_messages()
        );
        let incoming = stream_or_empty(incoming, "lastIncomingMessages")?;
        let outgoing = stream_or_empty(outgoing, "lastOutgoingMessages")?;

        let chats = aggregate_chats(&incoming, &outgoing);
        debug!("Chat list assembled: {} chats", chats.len());
        Ok(chats)
    }
}

fn stream_or_empty(result: ChatSyncResult<Value>, endpoint: &str) -> ChatSyncResult<Value> {
    match result {
        Ok(value) => Ok(value),
        Err(ChatSyncError::MalformedResponse(e)) => {
            warn!("'{}' returned a malformed body, treating as empty: {}", endpoint, e);
            Ok(Value::Array(Vec::new()))
        }
        Err(e) => Err(e),
    }
}

struct ChatAccumulator {
    chat_id: String,
    latest: Message,
    name: Option<String>,
    avatar: Option<String>,
}

/// Union the two raw streams and group by chat identifier.
///
/// The highest-timestamp message supplies preview and timestamp; name and
/// avatar are only ever upgraded from empty, never downgraded by a later,
/// less-informative message. Output is descending by timestamp with a stable
/// order for ties, so repeated calls on the same input are deterministic.
pub(crate) fn aggregate_chats(incoming: &Value, outgoing: &Value) -> Vec<ChatSummary> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut chats: Vec<ChatAccumulator> = Vec::new();
    let mut dropped = 0usize;

    let streams = [
        (incoming, Direction::Inbound),
        (outgoing, Direction::Outbound),
    ];
    for (stream, direction) in streams {
        let Some(items) = stream.as_array() else {
            continue;
        };
        for raw in items {
            let Some(message) = Message::from_provider(raw, direction) else {
                dropped += 1;
                continue;
            };
            let name = message.sender_name.clone();
            let avatar = raw
                .get("avatar")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            match index.get(&message.chat_id) {
                Some(&i) => {
                    let acc = &mut chats[i];
                    if message.timestamp > acc.latest.timestamp {
                        acc.latest = message;
                    }
                    if acc.name.is_none() {
                        acc.name = name;
                    }
                    if acc.avatar.is_none() {
                        acc.avatar = avatar;
                    }
                }
                None => {
                    index.insert(message.chat_id.clone(), chats.len());
                    chats.push(ChatAccumulator {
                        chat_id: message.chat_id.clone(),
                        latest: message,
                        name,
                        avatar,
                    });
                }
            }
        }
    }

    if dropped > 0 {
        debug!("Chat-list assembly dropped {} message(s) without a chat id", dropped);
    }

    let mut summaries: Vec<ChatSummary> = chats
        .into_iter()
        .map(|acc| ChatSummary {
            name: acc
                .name
                .unwrap_or_else(|| display_name_from_chat_id(&acc.chat_id)),
            preview: acc.latest.preview(),
            timestamp: acc.latest.timestamp,
            avatar_url: acc.avatar,
            chat_id: acc.chat_id,
        })
        .collect();
    // Stable: equal timestamps keep their first-seen relative order.
    summaries.sort_by_key(|c| std::cmp::Reverse(c.timestamp));
    summaries
}
