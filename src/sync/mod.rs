//! Top-level sync coordination.
//!
//! The orchestrator owns the selected-account/selected-chat session state and
//! both cache tiers, and serializes every cache mutation for a given
//! (account, chat) pair. All operations return tagged results and record a
//! user-visible error flag instead of panicking; a failed refresh never clears
//! previously good state, so the worst case is a stale or empty view.
//!
//! Cancellation is cooperative: every fetch captures the selection generation
//! when it starts and discards its own result on arrival if the generation
//! moved (chat switch, account switch, or full resync). No lock is held across
//! network I/O.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ApiClient, FailureReporter, TracingReporter};
use crate::cache::{DurableMessageCache, KeyValueStore, MemoryCache, merge_messages};
use crate::chats::ChatAggregator;
use crate::config::EngineConfig;
use crate::errors::{ChatSyncError, ChatSyncResult};
use crate::history::HistoryPager;
use crate::types::{Account, ChatSummary, Direction, Message, MessageKind};
use crate::utils::now_secs;


/// Where the session currently is in the fetch-then-render sequence.
/// `sending` overlaps `HistoryLoaded` as a transient flag, not a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    ChatsLoading,
    ChatsLoaded,
    HistoryLoading,
    HistoryLoaded,
}

struct SessionState {
    account: Option<Account>,
    api: Option<Arc<ApiClient>>,
    aggregator: Option<Arc<ChatAggregator>>,
    pager: Option<Arc<HistoryPager>>,
    selected_chat: Option<String>,
    chats: Vec<ChatSummary>,
    messages: Vec<Message>,
    phase: SyncPhase,
    sending: bool,
    last_error: Option<String>,
    pending_input: Option<String>,
    generation: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            account: None,
            api: None,
            aggregator: None,
            pager: None,
            selected_chat: None,
            chats: Vec::new(),
            messages: Vec::new(),
            phase: SyncPhase::Idle,
            sending: false,
            last_error: None,
            pending_input: None,
            generation: 0,
        }
    }
}

pub struct SyncOrchestrator {
    config: EngineConfig,
    reporter: Arc<dyn FailureReporter>,
    durable: DurableMessageCache,
    chat_list_cache: MemoryCache<Vec<ChatSummary>>,
    history_cache: MemoryCache<Vec<Message>>,
    state: Mutex<SessionState>,
}

impl SyncOrchestrator {
    pub fn new(config: EngineConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_reporter(config, store, Arc::new(TracingReporter))
    }

    pub fn with_reporter(
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        let chat_list_cache =
            MemoryCache::new(Duration::from_secs(config.chat_list_ttl_secs));
        let history_cache = MemoryCache::new(Duration::from_secs(config.history_ttl_secs));
        Self {
            durable: DurableMessageCache::new(store),
            chat_list_cache,
            history_cache,
            reporter,
            config,
            state: Mutex::new(SessionState::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history_key(account: &Account, chat_id: &str) -> String {
        format!("{}:{}", account.instance_id, chat_id)
    }

    // --- Operations ---

    /// Select the account the session works against. Resets the selected chat
    /// and rebuilds the API stack; the account-scoped chat-list cache is left
    /// alone and may still be warm.
    pub fn select_account(&self, account: Account) {
        let api = Arc::new(ApiClient::with_reporter(
            account.clone(),
            self.config.base_url.clone(),
            self.config.retry.clone(),
            self.reporter.clone(),
        ));
        let mut state = self.state();
        state.generation += 1;
        state.account = Some(account);
        state.aggregator = Some(Arc::new(ChatAggregator::new(api.clone())));
        state.pager = Some(Arc::new(HistoryPager::new(api.clone(), self.config.page_size)));
        state.api = Some(api);
        state.selected_chat = None;
        state.messages.clear();
        state.chats.clear();
        state.phase = SyncPhase::Idle;
        state.sending = false;
        state.last_error = None;
        info!("Account selected, session reset");
    }

    /// Load the chat list, honoring the 30s memory cache.
    pub async fn load_chats(&self) -> ChatSyncResult<()> {
        let (account, aggregator, generation) = {
            let mut state = self.state();
            let account = state
                .account
                .clone()
                .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;
            let aggregator = state
                .aggregator
                .clone()
                .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;

            if let Some(cached) = self.chat_list_cache.get(&account.instance_id) {
                debug!("Chat list served from memory cache");
                state.chats = cached;
                if state.phase == SyncPhase::Idle || state.phase == SyncPhase::ChatsLoading {
                    state.phase = SyncPhase::ChatsLoaded;
                }
                return Ok(());
            }

            if state.phase == SyncPhase::Idle {
                state.phase = SyncPhase::ChatsLoading;
            }
            (account, aggregator, state.generation)
        };

        match aggregator.list_chats(self.config.chat_window_minutes).await {
            Ok(chats) => {
                let mut state = self.state();
                if state.generation != generation {
                    debug!("Chat list result discarded: selection changed mid-fetch");
                    return Ok(());
                }
                self.chat_list_cache
                    .insert(account.instance_id.clone(), chats.clone());
                state.chats = chats;
                state.last_error = None;
                if state.selected_chat.is_none() {
                    state.phase = SyncPhase::ChatsLoaded;
                }
                Ok(())
            }
            Err(e) => {
                let mut state = self.state();
                if state.generation == generation {
                    state.last_error = Some(e.to_string());
                    if state.phase == SyncPhase::ChatsLoading {
                        state.phase = if state.chats.is_empty() {
                            SyncPhase::Idle
                        } else {
                            SyncPhase::ChatsLoaded
                        };
                    }
                }
                Err(e)
            }
        }
    }

    /// Open a chat. A warm (unexpired) history cache entry is honored; a cold
    /// open surfaces the durable shadow immediately and then merges the
    /// freshly fetched page over it.
    pub async fn select_chat(&self, chat_id: &str) -> ChatSyncResult<()> {
        let (account, pager, generation) = {
            let mut state = self.state();
            let account = state
                .account
                .clone()
                .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;
            let pager = state
                .pager
                .clone()
                .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;

            // Leaving a chat drops its short-lived cache entry; the durable
            // shadow is what survives the visit.
            if let Some(previous) = state.selected_chat.take()
                && previous != chat_id
            {
                self.history_cache
                    .invalidate(&Self::history_key(&account, &previous));
            }

            state.generation += 1;
            state.selected_chat = Some(chat_id.to_string());
            state.messages.clear();

            if let Some(cached) = self
                .history_cache
                .get(&Self::history_key(&account, chat_id))
            {
                debug!("History for '{}' served from memory cache", chat_id);
                state.messages = cached;
                state.phase = SyncPhase::HistoryLoaded;
                return Ok(());
            }

            state.phase = SyncPhase::HistoryLoading;
            pager.reset(chat_id);
            (account, pager, state.generation)
        };

        // Cold open: render the durable shadow while the network round-trip
        // is in the air.
        if let Some(stored) = self.durable.load(&account, chat_id).await {
            let mut state = self.state();
            if state.generation == generation {
                debug!(
                    "History for '{}' pre-rendered from durable cache ({} messages)",
                    chat_id,
                    stored.len()
                );
                state.messages = stored;
            }
        }

        self.fetch_history(&account, &pager, chat_id, generation).await
    }

    /// Fetch the newest history page and apply it if the selection has not
    /// moved since `generation` was captured.
    async fn fetch_history(
        &self,
        account: &Account,
        pager: &Arc<HistoryPager>,
        chat_id: &str,
        generation: u64,
    ) -> ChatSyncResult<()> {
        match pager.load_initial(chat_id).await {
            Ok(Some(page)) => {
                let merged = self
                    .durable
                    .merge_save(account, chat_id, &page.messages)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Durable merge failed for '{}': {}", chat_id, e);
                        page.messages.clone()
                    });
                let mut state = self.state();
                if state.generation != generation
                    || state.selected_chat.as_deref() != Some(chat_id)
                {
                    debug!("History result for '{}' discarded: selection changed", chat_id);
                    return Ok(());
                }
                self.history_cache
                    .insert(Self::history_key(account, chat_id), merged.clone());
                state.messages = merged;
                state.phase = SyncPhase::HistoryLoaded;
                state.last_error = None;
                Ok(())
            }
            Ok(None) => {
                debug!("History fetch for '{}' skipped: already in flight", chat_id);
                Ok(())
            }
            Err(e) => {
                let mut state = self.state();
                if state.generation == generation {
                    state.last_error = Some(e.to_string());
                    state.phase = if state.messages.is_empty() {
                        SyncPhase::ChatsLoaded
                    } else {
                        SyncPhase::HistoryLoaded
                    };
                }
                Err(e)
            }
        }
    }

    /// Send a message to the selected chat. On success a locally synthesized
    /// echo goes through the same merge as every other path, and the
    /// chat-list cache is invalidated so the next list read reflects it. On
    /// failure nothing is appended and the text is preserved for retry.
    pub async fn send(&self, text: &str) -> ChatSyncResult<()> {
        let trimmed = text.trim().to_string();
        if trimmed.is_empty() {
            return Err(ChatSyncError::State("message text is empty".into()));
        }
        let (account, api, chat_id, generation) = {
            let mut state = self.state();
            let account = state
                .account
                .clone()
                .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;
            let api = state
                .api
                .clone()
                .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;
            let chat_id = state
                .selected_chat
                .clone()
                .ok_or_else(|| ChatSyncError::State("no chat selected".into()))?;
            state.sending = true;
            (account, api, chat_id, state.generation)
        };

        match api.send_message(&chat_id, &trimmed).await {
            Ok(response) => {
                let echo = Message {
                    id: response
                        .get("idMessage")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .or_else(|| Some(format!("local-{}", Uuid::new_v4()))),
                    chat_id: chat_id.clone(),
                    direction: Direction::Outbound,
                    timestamp: now_secs(),
                    kind: MessageKind::Text,
                    text: Some(trimmed),
                    attachment: None,
                    sender_name: None,
                };
                if let Err(e) = self.durable.merge_save(&account, &chat_id, &[echo.clone()]).await {
                    warn!("Durable echo merge failed for '{}': {}", chat_id, e);
                }
                let mut state = self.state();
                state.sending = false;
                state.pending_input = None;
                if state.generation == generation
                    && state.selected_chat.as_deref() == Some(chat_id.as_str())
                {
                    let with_echo = merge_messages(&state.messages, &[echo]);
                    state.messages = with_echo;
                    self.history_cache.insert(
                        Self::history_key(&account, &chat_id),
                        state.messages.clone(),
                    );
                }
                self.chat_list_cache.invalidate(&account.instance_id);
                Ok(())
            }
            Err(e) => {
                let mut state = self.state();
                state.sending = false;
                state.pending_input = Some(text.to_string());
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Load the next (older) history page for the selected chat. Returns
    /// `Ok(false)` when there is nothing to do: no more pages, or a fetch for
    /// this chat already in flight.
    pub async fn load_more(&self) -> ChatSyncResult<bool> {
        let (account, pager, chat_id, generation) = {
            let state = self.state();
            let account = state
                .account
                .clone()
                .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;
            let pager = state
                .pager
                .clone()
                .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;
            let chat_id = state
                .selected_chat
                .clone()
                .ok_or_else(|| ChatSyncError::State("no chat selected".into()))?;
            (account, pager, chat_id, state.generation)
        };

        let cursor = pager.cursor(&chat_id);
        let Some(before_ts) = cursor.oldest_ts else {
            return Ok(false);
        };
        if !cursor.has_more {
            return Ok(false);
        }

        match pager.load_more(&chat_id, before_ts).await {
            Ok(Some(page)) => {
                if page.messages.is_empty() {
                    return Ok(false);
                }
                let merged = self
                    .durable
                    .merge_save(&account, &chat_id, &page.messages)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Durable merge failed for '{}': {}", chat_id, e);
                        page.messages.clone()
                    });
                let mut state = self.state();
                if state.generation != generation
                    || state.selected_chat.as_deref() != Some(chat_id.as_str())
                {
                    debug!("load_more result for '{}' discarded: selection changed", chat_id);
                    return Ok(false);
                }
                // Prepend via the shared merge: already-loaded messages keep
                // their order, the older page slots in front.
                let extended = merge_messages(&state.messages, &merged);
                state.messages = extended;
                self.history_cache.insert(
                    Self::history_key(&account, &chat_id),
                    state.messages.clone(),
                );
                state.last_error = None;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                let mut state = self.state();
                if state.generation == generation {
                    state.last_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Manual full resync: drop every cache tier for the current selection and
    /// re-run the cold-start path. Poll results that started before this call
    /// carry an older generation and are discarded on arrival.
    pub async fn full_sync(&self) -> ChatSyncResult<()> {
        let (account, pager, chat_id, generation) = {
            let mut state = self.state();
            let account = state
                .account
                .clone()
                .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;
            state.generation += 1;
            state.last_error = None;
            (
                account,
                state.pager.clone(),
                state.selected_chat.clone(),
                state.generation,
            )
        };

        info!("Full resync requested");
        self.chat_list_cache.invalidate(&account.instance_id);
        self.history_cache.clear();
        if let Some(ref chat_id) = chat_id {
            if let Err(e) = self.durable.clear(&account, chat_id).await {
                warn!("Durable cache clear failed for '{}': {}", chat_id, e);
            }
            if let Some(ref pager) = pager {
                pager.reset(chat_id);
            }
        }

        self.load_chats().await?;
        if let (Some(chat_id), Some(pager)) = (chat_id, pager) {
            self.fetch_history(&account, &pager, &chat_id, generation).await?;
        }
        Ok(())
    }

    /// Poll-triggered refresh of the chat list plus the selected chat's
    /// history. Skipped entirely (returns `Ok(false)`) while a history fetch
    /// for the selected chat is in flight; the scheduler retries next tick.
    pub async fn poll_refresh(&self) -> ChatSyncResult<bool> {
        let (account, pager, chat_id, generation) = {
            let state = self.state();
            let Some(account) = state.account.clone() else {
                return Ok(false);
            };
            (
                account,
                state.pager.clone(),
                state.selected_chat.clone(),
                state.generation,
            )
        };

        if let (Some(pager), Some(chat_id)) = (&pager, &chat_id)
            && pager.cursor(chat_id).busy
        {
            debug!("Poll refresh skipped: history fetch in flight for '{}'", chat_id);
            return Ok(false);
        }

        self.chat_list_cache.invalidate(&account.instance_id);
        self.load_chats().await?;

        if let (Some(pager), Some(chat_id)) = (pager, chat_id) {
            self.history_cache
                .invalidate(&Self::history_key(&account, &chat_id));
            self.fetch_history(&account, &pager, &chat_id, generation).await?;
        }
        Ok(true)
    }

    /// Avatar for a chat, fetched on demand.
    pub async fn avatar_url(&self, chat_id: &str) -> ChatSyncResult<Option<String>> {
        let api = self
            .state()
            .api
            .clone()
            .ok_or_else(|| ChatSyncError::State("no account selected".into()))?;
        let value = api.get_avatar(chat_id).await?;
        Ok(value
            .get("urlAvatar")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }

    // --- Read accessors (plain data, no UI coupling) ---

    pub fn chats(&self) -> Vec<ChatSummary> {
        self.state().chats.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state().messages.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.state().phase
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self.state().phase,
            SyncPhase::ChatsLoading | SyncPhase::HistoryLoading
        )
    }

    pub fn is_sending(&self) -> bool {
        self.state().sending
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    /// Text of the last failed send, preserved for retry.
    pub fn pending_input(&self) -> Option<String> {
        self.state().pending_input.clone()
    }

    pub fn selected_account(&self) -> Option<Account> {
        self.state().account.clone()
    }

    pub fn selected_chat(&self) -> Option<String> {
        self.state().selected_chat.clone()
    }

    /// Whether older history is believed to exist for the selected chat.
    pub fn has_more(&self) -> bool {
        let state = self.state();
        match (&state.pager, &state.selected_chat) {
            (Some(pager), Some(chat_id)) => pager.cursor(chat_id).has_more,
            _ => false,
        }
    }

    pub(crate) fn api(&self) -> Option<Arc<ApiClient>> {
        self.state().api.clone()
    }
}
