//! Named-event fan-out
//!
//! Handlers register for an event name and stay registered until their
//! [`EventSubscription`] is dropped or unsubscribed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tracing::trace;

use super::message::PushEvent;

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, Handler)>>,
}

/// Dispatches push events to the handlers registered for their name
#[derive(Clone, Default)]
pub struct EventHub {
    registry: Arc<Mutex<Registry>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events named `event`
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> EventSubscription {
        let event = event.into();
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(event.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        trace!(%event, id, "Event handler registered");

        EventSubscription {
            registry: Arc::downgrade(&self.registry),
            event,
            id,
            active: true,
        }
    }

    /// Run every handler registered for `event.event`; returns how many ran
    pub fn publish(&self, event: &PushEvent) -> usize {
        // Handlers run outside the lock so they may (un)subscribe
        let handlers: Vec<Handler> = self
            .lock()
            .handlers
            .get(&event.event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        trace!(event = %event.event, handlers = handlers.len(), "Publishing push event");
        for handler in &handlers {
            handler(&event.data);
        }
        handlers.len()
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.lock().handlers.get(event).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registration of one handler, removed on drop
pub struct EventSubscription {
    registry: Weak<Mutex<Registry>>,
    event: String,
    id: u64,
    active: bool,
}

impl EventSubscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn unsubscribe(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = registry.handlers.get_mut(&self.event) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                registry.handlers.remove(&self.event);
            }
        }
        trace!(event = %self.event, id = self.id, "Event handler removed");
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(hub: &EventHub, event: &str) -> (Arc<AtomicUsize>, EventSubscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let sub = {
            let count = count.clone();
            hub.subscribe(event, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, sub)
    }

    #[test]
    fn test_publish_by_name() {
        let hub = EventHub::new();
        let (updated, _a) = counter(&hub, "playlist.updated");
        let (deleted, _b) = counter(&hub, "playlist.deleted");

        let ran = hub.publish(&PushEvent::new("playlist.updated", json!({"id": "p1"})));
        assert_eq!(ran, 1);
        assert_eq!(updated.load(Ordering::SeqCst), 1);
        assert_eq!(deleted.load(Ordering::SeqCst), 0);

        assert_eq!(hub.publish(&PushEvent::new("unknown", Value::Null)), 0);
    }

    #[test]
    fn test_handler_receives_data() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            hub.subscribe("playlist.updated", move |data| {
                seen.lock().unwrap().push(data.clone());
            })
        };

        hub.publish(&PushEvent::new("playlist.updated", json!({"id": "p7"})));
        assert_eq!(*seen.lock().unwrap(), vec![json!({"id": "p7"})]);
    }

    #[test]
    fn test_drop_and_unsubscribe_remove_handlers() {
        let hub = EventHub::new();
        let (count, a) = counter(&hub, "tick");
        let (_, b) = counter(&hub, "tick");
        assert_eq!(hub.handler_count("tick"), 2);

        drop(a);
        assert_eq!(hub.handler_count("tick"), 1);
        b.unsubscribe();
        assert_eq!(hub.handler_count("tick"), 0);

        hub.publish(&PushEvent::new("tick", Value::Null));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_outlives_hub() {
        let hub = EventHub::new();
        let (_, sub) = counter(&hub, "tick");
        drop(hub);
        drop(sub);
    }
}
