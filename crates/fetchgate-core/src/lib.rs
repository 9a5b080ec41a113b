//! fetchgate core library
//!
//! An authenticated request coordinator for clients of a JSON HTTP API:
//! bearer tokens with transparent single-flight refresh, a tag-invalidated
//! query cache with reference-counted subscriptions, and server push events
//! wired into cache invalidation.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let api = Coordinator::from_config(&config)?;
//!
//! api.login("/auth/login", json!({"email": email, "password": password})).await?;
//!
//! let playlists = api
//!     .query(QuerySpec::new("getPlaylists", HttpRequest::get("/playlists")).with_tag("Playlist"))
//!     .await?;
//! ```
//!
//! # Modules
//!
//! - `coordinator`: main entry point
//! - `token`: credential storage and session status
//! - `refresh`: single-flight token refresh
//! - `dispatcher`: authenticated requests with refresh-and-retry
//! - `classify`: error classification and display messages
//! - `cache`: query cache, tags and subscriptions
//! - `events`: push events over WebSocket
//! - `transport`: HTTP transport trait and reqwest implementation
//! - `storage`: persistent key-value storage
//! - `validate`: response payload validators
//! - `config`: client configuration

pub mod cache;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod refresh;
pub mod storage;
pub mod token;
pub mod transport;
pub mod validate;

pub use cache::{CacheLedger, CacheStatus, QueryKey, SubscriptionHandle, SubscriptionManager};
pub use config::Config;
pub use coordinator::{Coordinator, MutationSpec, QuerySpec};
pub use dispatcher::Dispatcher;
pub use error::{ErrorKind, FetchError, FetchResult};
pub use events::{EventHub, EventSubscription, PushEvent};
pub use refresh::RefreshGate;
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, StorageError};
pub use token::{Credentials, SessionStatus, TokenStore};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
pub use validate::Validator;
