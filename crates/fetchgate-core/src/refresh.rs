//! Single-flight token refresh
//!
//! Any number of requests may see a 401 at once, but only one refresh call
//! goes to the server. The first caller becomes the flight leader and runs the
//! refresh; everyone arriving while it is in flight is queued and handed the
//! leader's result, in the order they arrived.
//!
//! ```text
//! idle --refresh()--> in flight --ok--> tokens replaced, waiters released --> idle
//!                          |
//!                          +--err--> tokens expired, logout hooks run,
//!                                    waiters get Unauthorized --> idle
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{FetchError, FetchResult};
use crate::token::{Credentials, TokenStore};

/// Endpoint name used for errors produced by the gate itself
pub const REFRESH_ENDPOINT: &str = "refreshToken";

type Waiter = oneshot::Sender<FetchResult<Credentials>>;

/// Callback run when a refresh fails and the session ends
pub type LogoutHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<Waiter>,
}

/// Coordinates token refreshes so at most one is in flight
#[derive(Clone)]
pub struct RefreshGate {
    tokens: TokenStore,
    state: Arc<Mutex<RefreshState>>,
    logout_hooks: Arc<Mutex<Vec<LogoutHook>>>,
}

impl RefreshGate {
    pub fn new(tokens: TokenStore) -> Self {
        Self {
            tokens,
            state: Arc::new(Mutex::new(RefreshState::default())),
            logout_hooks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a callback to run when a failed refresh ends the session
    pub fn on_logout(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.logout_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(hook));
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Whether a refresh is currently running
    pub fn is_in_flight(&self) -> bool {
        self.lock_state().in_flight
    }

    /// Number of callers waiting on the current refresh
    pub fn waiter_count(&self) -> usize {
        self.lock_state().waiters.len()
    }

    /// Refresh the credentials, or wait for the refresh already in flight
    ///
    /// `refresh_fn` is only called when this caller leads the flight.
    pub async fn refresh<F, Fut>(&self, refresh_fn: F) -> FetchResult<Credentials>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<Credentials>>,
    {
        loop {
            let waiter = {
                let mut state = self.lock_state();
                if state.in_flight {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    debug!(position = state.waiters.len(), "Waiting on in-flight refresh");
                    Some(rx)
                } else {
                    state.in_flight = true;
                    None
                }
            };

            match waiter {
                Some(rx) => match rx.await {
                    Ok(result) => return result,
                    // Leader was dropped before finishing; contend again
                    Err(_) => debug!("Refresh leader abandoned the flight"),
                },
                None => break,
            }
        }

        let mut flight = Flight {
            gate: self,
            released: false,
        };

        debug!("Refreshing access token");
        let result = match refresh_fn().await {
            Ok(credentials) => {
                self.tokens.set(credentials.clone());
                info!("Access token refreshed");
                Ok(credentials)
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.end_session();
                let mut terminal = FetchError::session_terminated(REFRESH_ENDPOINT)
                    .with_detail(format!("refresh failed: {}", e.detail()));
                if e.display_message().is_none() {
                    terminal = terminal.suppressed();
                }
                Err(terminal)
            }
        };

        flight.release(&result);
        result
    }

    fn end_session(&self) {
        self.tokens.expire();
        let hooks: Vec<LogoutHook> = self
            .logout_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for hook in hooks {
            hook();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Leadership of one refresh; resets the gate even if the leader is dropped
struct Flight<'a> {
    gate: &'a RefreshGate,
    released: bool,
}

impl Flight<'_> {
    fn release(&mut self, result: &FetchResult<Credentials>) {
        let waiters = {
            let mut state = self.gate.lock_state();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        self.released = true;

        if !waiters.is_empty() {
            debug!(count = waiters.len(), "Releasing refresh waiters");
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Dropping the senders wakes waiters so they can contend again
        let mut state = self.gate.lock_state();
        state.in_flight = false;
        state.waiters.clear();
    }
}
