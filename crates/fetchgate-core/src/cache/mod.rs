//! Query cache
//!
//! - `key`: query keys and tag helpers
//! - `ledger`: cached results, tags, invalidation and optimistic patches
//! - `subscription`: reference-counted interest in keys, with delayed eviction

pub mod key;
pub mod ledger;
pub mod subscription;

pub use key::{item_tag, QueryKey};
pub use ledger::{
    CacheEvent, CacheLedger, CacheStatus, Fetcher, UndoToken, WeakCacheLedger,
    DEFAULT_GRACE_PERIOD, DEFAULT_MAX_AGE,
};
pub use subscription::{SubscriptionHandle, SubscriptionManager};
