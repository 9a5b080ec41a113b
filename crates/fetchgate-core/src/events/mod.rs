//! Server push events
//!
//! Events arrive over a WebSocket as JSON frames and are fanned out by name
//! to registered handlers. The coordinator binds event names to cache
//! invalidations and patches.
//!
//! ```ignore
//! let hub = EventHub::new();
//! let listener = spawn_listener("ws://localhost:3000/events", hub.clone());
//! let _sub = hub.subscribe("playlist.updated", |data| println!("{data}"));
//! ```

mod hub;
mod listener;
mod message;

pub use hub::{EventHub, EventSubscription};
pub use listener::{
    next_delay, spawn_listener, ListenerCommand, ListenerEvent, ListenerHandle,
    INITIAL_RECONNECT_DELAY, MAX_RECONNECT_DELAY,
};
pub use message::PushEvent;
