//! Durable per-chat message cache over an external key-value store.
//!
//! The store itself is a black box behind [`KeyValueStore`]; keys are composite
//! `"{instance}:{chatId}"` strings. Payloads are the crate's own JSON encoding
//! of a message array. Anything unreadable (missing, truncated, or from an
//! older incompatible version) is a cache miss, never an error surfaced to
//! sync paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::ChatSyncResult;
use crate::types::{Account, Message};
use crate::utils::{atomic_write, ensure_dir, safe_filename};

/// Durable key-value storage consumed as a black box.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> ChatSyncResult<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: &[u8]) -> ChatSyncResult<()>;
    async fn delete(&self, key: &str) -> ChatSyncResult<()>;
}

/// File-backed store: one JSON file per key under a directory, written
/// atomically so readers never observe a torn value.
pub struct FsKvStore {
    dir: PathBuf,
}

impl FsKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> ChatSyncResult<Self> {
        let dir = ensure_dir(dir.into())?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_filename(key)))
    }
}

#[async_trait]
impl KeyValueStore for FsKvStore {
    async fn get(&self, key: &str) -> ChatSyncResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Ok(Some(bytes))
    }

    async fn put(&self, key: &str, value: &[u8]) -> ChatSyncResult<()> {
        let path = self.path_for(key);
        let content = String::from_utf8_lossy(value).into_owned();
        atomic_write(&path, &content)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> ChatSyncResult<()> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to delete {}: {}", path.display(), e))?;
        }
        Ok(())
    }
}

/// In-memory store for tests and embedders that manage persistence themselves.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: std::sync::Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> ChatSyncResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("MemoryKvStore lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> ChatSyncResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("MemoryKvStore lock poisoned"))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> ChatSyncResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("MemoryKvStore lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

/// Merge two message sequences into one, deduplicated and ascending.
///
/// The timestamp is the identity key: two messages with the same timestamp
/// collapse into one, with the *incoming* side winning so that a
/// server-confirmed message reconciles a local echo at the same second
/// instead of duplicating it. This is the single merge used by initial-load,
/// load-more, live-send, and poll-refresh paths, so they cannot diverge in
/// ordering semantics.
pub fn merge_messages(existing: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut by_ts: BTreeMap<i64, Message> = BTreeMap::new();
    for msg in existing.iter().chain(incoming.iter()) {
        by_ts.insert(msg.timestamp, msg.clone());
    }
    by_ts.into_values().collect()
}

/// Per-chat durable message cache, scoped by (account, chat).
pub struct DurableMessageCache {
    store: Arc<dyn KeyValueStore>,
}

impl DurableMessageCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn storage_key(account: &Account, chat_id: &str) -> String {
        format!("{}:{}", account.instance_id, chat_id)
    }

    /// Load the cached sequence. Corrupted or unreadable payloads are a miss.
    pub async fn load(&self, account: &Account, chat_id: &str) -> Option<Vec<Message>> {
        let key = Self::storage_key(account, chat_id);
        let bytes = match self.store.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Durable cache read failed for '{}': {}", key, e);
                return None;
            }
        };
        match serde_json::from_slice::<Vec<Message>>(&bytes) {
            Ok(messages) => Some(messages),
            Err(e) => {
                warn!("Durable cache entry '{}' corrupt, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Replace the cached sequence for a chat.
    pub async fn save(
        &self,
        account: &Account,
        chat_id: &str,
        messages: &[Message],
    ) -> ChatSyncResult<()> {
        let key = Self::storage_key(account, chat_id);
        let bytes = serde_json::to_vec(messages)
            .map_err(|e| anyhow::anyhow!("Failed to encode durable cache entry: {}", e))?;
        self.store.put(&key, &bytes).await?;
        debug!("Durable cache '{}' saved ({} messages)", key, messages.len());
        Ok(())
    }

    /// Merge `incoming` over whatever is stored and persist the result.
    /// Returns the merged sequence for the caller's in-memory state.
    pub async fn merge_save(
        &self,
        account: &Account,
        chat_id: &str,
        incoming: &[Message],
    ) -> ChatSyncResult<Vec<Message>> {
        let existing = self.load(account, chat_id).await.unwrap_or_default();
        let merged = merge_messages(&existing, incoming);
        self.save(account, chat_id, &merged).await?;
        Ok(merged)
    }

    pub async fn clear(&self, account: &Account, chat_id: &str) -> ChatSyncResult<()> {
        let key = Self::storage_key(account, chat_id);
        self.store.delete(&key).await
    }
}

#[cfg(test)]
#[path = "durable_tests.rs"]
mod tests;
