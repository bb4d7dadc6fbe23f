//! Two cache tiers of different lifetimes: a short-TTL in-process cache and a
//! durable TTL-less shadow behind an external key-value store.

mod durable;
mod memory;

pub use durable::{
    DurableMessageCache, FsKvStore, KeyValueStore, MemoryKvStore, merge_messages,
};
pub use memory::MemoryCache;
