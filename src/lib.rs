#![warn(clippy::pedantic)]
// Noisy doc/signature lints — would require annotating every pub function
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference — keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
// Intentional casts in timestamp/size handling around the provider API
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
// Module structure — our modules use the chats::ChatAggregator pattern by design
#![allow(clippy::module_name_repetitions)]

//! Chat message synchronization and caching engine for hosted WhatsApp
//! messaging APIs.
//!
//! The engine reconciles a rate-limited, eventually-consistent remote API
//! against two local caches of different lifetimes, paginates message history
//! backward in time, and keeps the active chat fresh via polling:
//!
//! - [`api::ApiClient`] wraps every remote call with credential validation,
//!   429 courtesy waits, and exponential-backoff retries.
//! - [`chats::ChatAggregator`] merges the inbound and outbound streams into
//!   one reverse-chronological chat list.
//! - [`history::HistoryPager`] pages history backward by timestamp with
//!   single-flight protection per chat.
//! - [`cache`] holds the short-TTL in-process tier and the durable key-value
//!   shadow, sharing one authoritative merge function.
//! - [`sync::SyncOrchestrator`] owns session state and drives the
//!   fetch-then-cache-then-render sequencing, including optimistic send echoes
//!   and full resyncs.
//! - [`poll::PollScheduler`] drains provider notifications on a timer and
//!   triggers throttled refreshes of the active selection.
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatsync::cache::FsKvStore;
//! use chatsync::config::EngineConfig;
//! use chatsync::poll::PollScheduler;
//! use chatsync::sync::SyncOrchestrator;
//! use chatsync::types::Account;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let store = Arc::new(FsKvStore::new("/var/lib/chatsync")?);
//! let engine = Arc::new(SyncOrchestrator::new(config.clone(), store));
//!
//! engine.select_account(Account::new("1101000001", "d75b3a66374942c5b3c019c698abc206"));
//! engine.load_chats().await?;
//! engine.select_chat("79001234567@c.us").await?;
//! engine.send("hello").await?;
//!
//! let poller = PollScheduler::new(engine.clone(), &config);
//! poller.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod chats;
pub mod config;
pub mod errors;
pub mod history;
pub mod poll;
pub mod sync;
pub mod types;
pub(crate) mod utils;

pub use crate::errors::{ChatSyncError, ChatSyncResult};
pub use crate::sync::{SyncOrchestrator, SyncPhase};
pub use crate::types::{Account, ChatSummary, Direction, Message, MessageKind};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
