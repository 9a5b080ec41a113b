//! Token store
//!
//! Holds the current access/refresh credential pair and mirrors it into a
//! [`KeyValueStore`] so a session survives restarts. Reads and writes are
//! serialized by one mutex; the in-memory value is authoritative even when
//! persisting fails.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::storage::KeyValueStore;

/// Storage key for persisted credentials
pub const CREDENTIALS_KEY: &str = "credentials";

/// Access/refresh token pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            issued_at: Utc::now(),
        }
    }
}

// Tokens never end up in logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Authentication state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No credentials
    Anonymous,
    /// Credentials present
    Authenticated,
    /// Credentials were dropped because they could not be refreshed
    Expired,
}

struct Inner {
    current: Mutex<Option<Credentials>>,
    backend: Arc<dyn KeyValueStore>,
    status: watch::Sender<SessionStatus>,
}

/// Shared handle to the session credentials
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<Inner>,
}

impl TokenStore {
    /// Create a store, restoring any credentials persisted in `backend`
    pub fn load(backend: Arc<dyn KeyValueStore>) -> Self {
        let restored = match backend.get(CREDENTIALS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Credentials>(&raw) {
                Ok(credentials) => Some(credentials),
                Err(e) => {
                    warn!("Discarding unreadable stored credentials: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read stored credentials: {}", e);
                None
            }
        };

        let status = if restored.is_some() {
            debug!("Restored credentials from storage");
            SessionStatus::Authenticated
        } else {
            SessionStatus::Anonymous
        };
        let (status_tx, _) = watch::channel(status);

        Self {
            inner: Arc::new(Inner {
                current: Mutex::new(restored),
                backend,
                status: status_tx,
            }),
        }
    }

    /// Current credentials, if logged in
    pub fn get(&self) -> Option<Credentials> {
        self.lock().clone()
    }

    /// Current access token, if logged in
    pub fn access_token(&self) -> Option<String> {
        self.lock().as_ref().map(|c| c.access_token.clone())
    }

    /// Replace the credentials
    pub fn set(&self, credentials: Credentials) {
        let mut current = self.lock();
        match serde_json::to_string(&credentials) {
            Ok(raw) => {
                if let Err(e) = self.inner.backend.set(CREDENTIALS_KEY, &raw) {
                    warn!("Failed to persist credentials: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode credentials: {}", e),
        }
        *current = Some(credentials);
        self.inner.status.send_replace(SessionStatus::Authenticated);
    }

    /// Drop the credentials (logout)
    pub fn clear(&self) {
        self.clear_with(SessionStatus::Anonymous);
        info!("Signed out");
    }

    /// Drop the credentials after an unrecoverable refresh failure
    pub fn expire(&self) {
        self.clear_with(SessionStatus::Expired);
        warn!("Session expired");
    }

    fn clear_with(&self, status: SessionStatus) {
        let mut current = self.lock();
        if let Err(e) = self.inner.backend.remove(CREDENTIALS_KEY) {
            warn!("Failed to remove stored credentials: {}", e);
        }
        *current = None;
        self.inner.status.send_replace(status);
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// Subscribe to session status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Credentials>> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileKeyValueStore, MemoryKeyValueStore};
    use tempfile::TempDir;

    fn memory_store() -> TokenStore {
        TokenStore::load(Arc::new(MemoryKeyValueStore::new()))
    }

    #[test]
    fn test_starts_anonymous() {
        let tokens = memory_store();
        assert!(tokens.get().is_none());
        assert!(tokens.access_token().is_none());
        assert_eq!(tokens.status(), SessionStatus::Anonymous);
    }

    #[test]
    fn test_set_and_clear() {
        let tokens = memory_store();
        let mut status = tokens.subscribe_status();

        tokens.set(Credentials::new("A1", "R1"));
        assert_eq!(tokens.access_token().as_deref(), Some("A1"));
        assert_eq!(tokens.get().unwrap().refresh_token, "R1");
        assert_eq!(*status.borrow_and_update(), SessionStatus::Authenticated);

        tokens.clear();
        assert!(tokens.get().is_none());
        assert_eq!(*status.borrow_and_update(), SessionStatus::Anonymous);
    }

    #[test]
    fn test_expire() {
        let tokens = memory_store();
        tokens.set(Credentials::new("A1", "R1"));
        tokens.expire();

        assert!(tokens.get().is_none());
        assert_eq!(tokens.status(), SessionStatus::Expired);
    }

    #[test]
    fn test_persists_across_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");

        {
            let tokens = TokenStore::load(Arc::new(FileKeyValueStore::new(&path)));
            tokens.set(Credentials::new("A1", "R1"));
        }

        let tokens = TokenStore::load(Arc::new(FileKeyValueStore::new(&path)));
        let restored = tokens.get().unwrap();
        assert_eq!(restored.access_token, "A1");
        assert_eq!(restored.refresh_token, "R1");
        assert_eq!(tokens.status(), SessionStatus::Authenticated);

        tokens.clear();
        let tokens = TokenStore::load(Arc::new(FileKeyValueStore::new(&path)));
        assert!(tokens.get().is_none());
    }

    #[test]
    fn test_unreadable_credentials_ignored() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        backend.set(CREDENTIALS_KEY, "garbage").unwrap();

        let tokens = TokenStore::load(backend);
        assert!(tokens.get().is_none());
        assert_eq!(tokens.status(), SessionStatus::Anonymous);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", Credentials::new("secret-access", "secret-refresh"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_credentials_wire_format() {
        let parsed: Credentials =
            serde_json::from_str(r#"{"accessToken":"A2","refreshToken":"R2"}"#).unwrap();
        assert_eq!(parsed.access_token, "A2");
        assert_eq!(parsed.refresh_token, "R2");
    }
}
