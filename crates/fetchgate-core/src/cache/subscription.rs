//! Subscription reference counting
//!
//! A key stays cached while at least one [`SubscriptionHandle`] for it is
//! alive. When the last one is released the entry gets a grace period
//! before eviction; subscribing again inside that window keeps it.

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace};

use super::key::QueryKey;
use super::ledger::{CacheEvent, CacheLedger};

/// Hands out subscriptions against a [`CacheLedger`]
#[derive(Clone)]
pub struct SubscriptionManager {
    ledger: CacheLedger,
}

impl SubscriptionManager {
    pub fn new(ledger: CacheLedger) -> Self {
        Self { ledger }
    }

    pub fn subscribe(&self, key: QueryKey) -> SubscriptionHandle {
        // Listen before counting so no update slips between the two
        let events = self.ledger.subscribe_events();
        let (count, epoch) = self.ledger.acquire(&key);
        debug!(%key, subscribers = count, "Subscribed");
        SubscriptionHandle {
            key,
            ledger: self.ledger.clone(),
            events,
            epoch,
            released: false,
        }
    }

    /// Release a subscription; same as dropping the handle
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        handle.unsubscribe();
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.ledger.subscriber_count(key)
    }

    pub fn ledger(&self) -> &CacheLedger {
        &self.ledger
    }
}

/// Live interest in one query key, released on drop
pub struct SubscriptionHandle {
    key: QueryKey,
    ledger: CacheLedger,
    events: broadcast::Receiver<CacheEvent>,
    /// Ledger epoch the subscription was counted in
    epoch: u64,
    released: bool,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Latest cached value for the key
    pub fn current(&self) -> Option<Value> {
        self.ledger.peek(&self.key)
    }

    /// Wait for the next change to this key's data
    ///
    /// Returns `None` once the entry is evicted or the cache is cleared.
    pub async fn next_update(&mut self) -> Option<Value> {
        loop {
            match self.events.recv().await {
                Ok(CacheEvent::Updated(key)) if key == self.key => {
                    return self.ledger.peek(&self.key);
                }
                Ok(CacheEvent::Evicted(key)) if key == self.key => return None,
                Ok(CacheEvent::Cleared) => return None,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    trace!(key = %self.key, skipped, "Subscription lagged");
                    // Whatever we missed, the ledger has the latest value
                    if let Some(value) = self.ledger.peek(&self.key) {
                        return Some(value);
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let remaining = self.ledger.release(&self.key, self.epoch);
        debug!(key = %self.key, subscribers = remaining, "Unsubscribed");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ledger::{CacheStatus, Fetcher, DEFAULT_MAX_AGE};
    use futures_util::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const GRACE: Duration = Duration::from_secs(60);

    fn fetcher(calls: Arc<AtomicUsize>) -> Fetcher {
        Arc::new(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "n": n }))
            }
            .boxed()
        })
    }

    fn key() -> QueryKey {
        QueryKey::new("getPlaylists", &json!({"page": 1}))
    }

    async fn populate(manager: &SubscriptionManager, calls: &Arc<AtomicUsize>) {
        manager
            .ledger()
            .get_or_fetch(key(), ["Playlist"], fetcher(calls.clone()), DEFAULT_MAX_AGE)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_subscribers() {
        let manager = SubscriptionManager::new(CacheLedger::new(GRACE));
        let a = manager.subscribe(key());
        let b = manager.subscribe(key());
        assert_eq!(manager.subscriber_count(&key()), 2);

        manager.unsubscribe(a);
        assert_eq!(manager.subscriber_count(&key()), 1);
        drop(b);
        assert_eq!(manager.subscriber_count(&key()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_after_grace_period() {
        let manager = SubscriptionManager::new(CacheLedger::new(GRACE));
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = manager.subscribe(key());
        populate(&manager, &calls).await;
        assert_eq!(manager.ledger().status(&key()), CacheStatus::Fresh);

        drop(handle);
        assert_eq!(manager.ledger().status(&key()), CacheStatus::Evicting);

        tokio::time::sleep(GRACE - Duration::from_secs(1)).await;
        assert!(manager.ledger().contains(&key()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!manager.ledger().contains(&key()));

        // Next read goes back to the network
        populate(&manager, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_inside_grace_keeps_entry() {
        let manager = SubscriptionManager::new(CacheLedger::new(GRACE));
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = manager.subscribe(key());
        populate(&manager, &calls).await;
        drop(handle);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let _again = manager.subscribe(key());
        assert_eq!(manager.ledger().status(&key()), CacheStatus::Fresh);

        tokio::time::sleep(GRACE * 2).await;
        assert!(manager.ledger().contains(&key()));
        // Stale by age now, but still cached
        assert_eq!(manager.ledger().status(&key()), CacheStatus::Stale);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_update_follows_refetch() {
        let manager = SubscriptionManager::new(CacheLedger::new(GRACE));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handle = manager.subscribe(key());
        populate(&manager, &calls).await;
        assert_eq!(handle.next_update().await, Some(json!({"n": 1})));

        manager.ledger().invalidate(["Playlist"]);
        assert_eq!(handle.next_update().await, Some(json!({"n": 2})));
        assert_eq!(handle.current(), Some(json!({"n": 2})));

        manager.ledger().clear();
        assert_eq!(handle.next_update().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_idempotent() {
        let manager = SubscriptionManager::new(CacheLedger::new(GRACE));
        let _keep = manager.subscribe(key());
        let mut handle = manager.subscribe(key());
        handle.release();
        drop(handle);
        assert_eq!(manager.subscriber_count(&key()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_from_before_clear_keeps_new_count() {
        let manager = SubscriptionManager::new(CacheLedger::new(GRACE));
        let calls = Arc::new(AtomicUsize::new(0));

        let before = manager.subscribe(key());
        populate(&manager, &calls).await;
        manager.ledger().clear();

        let _live = manager.subscribe(key());
        populate(&manager, &calls).await;
        drop(before);

        assert_eq!(manager.subscriber_count(&key()), 1);
        assert_eq!(manager.ledger().status(&key()), CacheStatus::Fresh);

        // Still watched, so refetched rather than dropped
        manager.ledger().invalidate(["Playlist"]);
        assert!(manager.ledger().contains(&key()));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.ledger().peek(&key()), Some(json!({"n": 3})));
    }
}
