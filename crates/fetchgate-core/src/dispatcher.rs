//! Request dispatcher
//!
//! Runs one logical request:
//!
//! 1. Attach the current access token, if any
//! 2. Send it under the per-request timeout
//! 3. On 401, refresh through the [`RefreshGate`] and retry exactly once
//! 4. Classify anything else that is not a success
//!
//! A request is never retried more than once for authentication, so a
//! server that keeps rejecting fresh tokens surfaces as a terminal
//! Unauthorized instead of a refresh loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::classify::{to_fetch_error, RawOutcome};
use crate::error::{FetchResult, RequestOrigin};
use crate::refresh::{RefreshGate, REFRESH_ENDPOINT};
use crate::token::{Credentials, TokenStore};
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError, AUTHORIZATION};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default path of the refresh endpoint
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Sends requests with credentials and transparent re-authentication
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    gate: RefreshGate,
    refresh_path: String,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, gate: RefreshGate) -> Self {
        Self {
            transport,
            gate,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tokens(&self) -> &TokenStore {
        self.gate.tokens()
    }

    pub fn gate(&self) -> &RefreshGate {
        &self.gate
    }

    /// Run an authenticated request
    pub async fn execute(&self, endpoint: &str, request: HttpRequest) -> FetchResult<Value> {
        let request_id = Uuid::new_v4();
        let sent_with = self.tokens().access_token();
        debug!(%request_id, endpoint, path = %request.path, "dispatching");

        let response = self
            .send(authorize(request.clone(), sent_with.as_deref()))
            .await
            .map_err(|e| to_fetch_error(endpoint, RequestOrigin::Request, RawOutcome::Failed(e)))?;

        if response.status != 401 {
            return finish(endpoint, RequestOrigin::Request, response);
        }

        let Some(credentials) = self.tokens().get() else {
            debug!(%request_id, endpoint, "401 without credentials, nothing to refresh");
            return finish(endpoint, RequestOrigin::Request, response);
        };

        // Another request may already have refreshed while this one was out
        let access_token = if Some(&credentials.access_token) != sent_with.as_ref() {
            debug!(%request_id, endpoint, "token already refreshed, retrying");
            credentials.access_token
        } else {
            debug!(%request_id, endpoint, "401, refreshing token");
            let refresh_token = credentials.refresh_token;
            let refreshed = self
                .gate
                .refresh(|| self.refresh_credentials(refresh_token))
                .await
                .map_err(|e| e.for_endpoint(endpoint))?;
            refreshed.access_token
        };

        let retried = self
            .send(authorize(request, Some(&access_token)))
            .await
            .map_err(|e| to_fetch_error(endpoint, RequestOrigin::Request, RawOutcome::Failed(e)))?;

        if retried.status == 401 {
            warn!(%request_id, endpoint, "rejected again after token refresh");
        }
        finish(endpoint, RequestOrigin::Request, retried)
    }

    /// Run a request without credentials and without the refresh path
    /// (login, registration)
    pub async fn execute_public(&self, endpoint: &str, request: HttpRequest) -> FetchResult<Value> {
        let response = self
            .send(authorize(request, None))
            .await
            .map_err(|e| to_fetch_error(endpoint, RequestOrigin::Request, RawOutcome::Failed(e)))?;
        finish(endpoint, RequestOrigin::Request, response)
    }

    /// Exchange a refresh token for a new credential pair
    pub async fn refresh_credentials(&self, refresh_token: String) -> FetchResult<Credentials> {
        let request = HttpRequest::post(
            self.refresh_path.clone(),
            json!({ "refreshToken": refresh_token }),
        );

        let response = self
            .send(request)
            .await
            .map_err(|e| to_fetch_error(REFRESH_ENDPOINT, RequestOrigin::Refresh, RawOutcome::Failed(e)))?;

        if !response.is_success() {
            return Err(to_fetch_error(
                REFRESH_ENDPOINT,
                RequestOrigin::Refresh,
                RawOutcome::Response(response),
            ));
        }

        serde_json::from_str::<Credentials>(&response.body).map_err(|e| {
            to_fetch_error(
                REFRESH_ENDPOINT,
                RequestOrigin::Refresh,
                RawOutcome::Malformed {
                    response,
                    error: e.to_string(),
                },
            )
        })
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

/// Set or strip the bearer token
fn authorize(request: HttpRequest, access_token: Option<&str>) -> HttpRequest {
    match access_token {
        Some(token) => request.with_header(AUTHORIZATION, format!("Bearer {}", token)),
        None => request.without_header(AUTHORIZATION),
    }
}

/// Decode a success body or classify a failure
fn finish(endpoint: &str, origin: RequestOrigin, response: HttpResponse) -> FetchResult<Value> {
    if !response.is_success() {
        return Err(to_fetch_error(endpoint, origin, RawOutcome::Response(response)));
    }

    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&response.body).map_err(|e| {
        to_fetch_error(
            endpoint,
            origin,
            RawOutcome::Malformed {
                response,
                error: e.to_string(),
            },
        )
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::MemoryKeyValueStore;
    use crate::token::SessionStatus;
    use crate::transport::mock::MockTransport;

    /// Fake API: accepts only `valid_token`, refresh hands out A2/R2 for R1
    pub(crate) fn playlist_api(valid_token: &'static str) -> MockTransport {
        MockTransport::new(move |req| {
            if req.path == DEFAULT_REFRESH_PATH {
                let body = req.body.clone().unwrap_or(Value::Null);
                return Ok(if body["refreshToken"] == "R1" {
                    HttpResponse::json(200, &json!({"accessToken": "A2", "refreshToken": "R2"}))
                } else {
                    HttpResponse::json(401, &json!({"message": "invalid refresh token"}))
                });
            }
            if req.bearer_token() != Some(valid_token) {
                return Ok(HttpResponse::json(401, &json!({"message": "jwt expired"})));
            }
            Ok(HttpResponse::json(
                200,
                &json!({"items": [{"id": "p1", "title": "Road trip"}]}),
            ))
        })
    }

    pub(crate) fn dispatcher_with(transport: Arc<MockTransport>) -> Dispatcher {
        let tokens = TokenStore::load(Arc::new(MemoryKeyValueStore::new()));
        tokens.set(Credentials::new("A1", "R1"));
        Dispatcher::new(transport, RefreshGate::new(tokens))
    }

    #[tokio::test]
    async fn test_refresh_then_retry_scenario() {
        let transport = Arc::new(playlist_api("A2"));
        let dispatcher = dispatcher_with(transport.clone());

        let payload = dispatcher
            .execute("getPlaylists", HttpRequest::get("/playlists"))
            .await
            .unwrap();

        assert_eq!(payload["items"][0]["id"], "p1");
        let credentials = dispatcher.tokens().get().unwrap();
        assert_eq!(credentials.access_token, "A2");
        assert_eq!(credentials.refresh_token, "R2");
        assert!(!dispatcher.gate().is_in_flight());
        assert_eq!(dispatcher.gate().waiter_count(), 0);

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].bearer_token(), Some("A1"));
        assert_eq!(calls[1].path, DEFAULT_REFRESH_PATH);
        assert!(calls[1].bearer_token().is_none());
        assert_eq!(calls[1].body, Some(json!({"refreshToken": "R1"})));
        assert_eq!(calls[2].bearer_token(), Some("A2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_unauthorized_share_one_refresh() {
        let transport =
            Arc::new(playlist_api("A2").with_delay(Duration::from_millis(20)));
        let dispatcher = dispatcher_with(transport.clone());

        let mut handles = Vec::new();
        for _ in 0..6 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .execute("getPlaylists", HttpRequest::get("/playlists"))
                    .await
            }));
        }

        for handle in handles {
            let payload = handle.await.unwrap().unwrap();
            assert_eq!(payload["items"][0]["title"], "Road trip");
        }

        assert_eq!(transport.count(DEFAULT_REFRESH_PATH), 1);
        assert_eq!(transport.count("/playlists"), 12);
    }

    #[tokio::test]
    async fn test_retry_only_once() {
        // Server rejects every access token, even fresh ones
        let transport = Arc::new(playlist_api("never-valid"));
        let dispatcher = dispatcher_with(transport.clone());

        let err = dispatcher
            .execute("getPlaylists", HttpRequest::get("/playlists"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), &ErrorKind::Unauthorized);
        assert!(!err.is_session_terminated());
        assert_eq!(transport.count(DEFAULT_REFRESH_PATH), 1);
        assert_eq!(transport.count("/playlists"), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_terminates_session() {
        let transport = Arc::new(playlist_api("A2"));
        let tokens = TokenStore::load(Arc::new(MemoryKeyValueStore::new()));
        tokens.set(Credentials::new("A1", "R-revoked"));
        let dispatcher = Dispatcher::new(transport.clone(), RefreshGate::new(tokens));

        let err = dispatcher
            .execute("getPlaylists", HttpRequest::get("/playlists"))
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert!(err.is_session_terminated());
        assert_eq!(err.endpoint(), "getPlaylists");
        // The refresh 401 itself stays hidden from users
        assert!(err.display_message().is_none());
        assert!(dispatcher.tokens().get().is_none());
        assert_eq!(dispatcher.tokens().status(), SessionStatus::Expired);
        assert_eq!(transport.count("/playlists"), 1);
    }

    #[tokio::test]
    async fn test_anonymous_request_has_no_token() {
        let transport = Arc::new(playlist_api("A2"));
        let tokens = TokenStore::load(Arc::new(MemoryKeyValueStore::new()));
        let dispatcher = Dispatcher::new(transport.clone(), RefreshGate::new(tokens));

        let err = dispatcher
            .execute(
                "getPlaylists",
                HttpRequest::get("/playlists").with_header(AUTHORIZATION, "Bearer stale"),
            )
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(transport.count(DEFAULT_REFRESH_PATH), 0);
        assert!(transport.calls()[0].header(AUTHORIZATION).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_refresh() {
        let transport =
            Arc::new(playlist_api("A1").with_delay(Duration::from_secs(30)));
        let dispatcher = dispatcher_with(transport.clone()).with_timeout(Duration::from_secs(1));

        let err = dispatcher
            .execute("getPlaylists", HttpRequest::get("/playlists"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), &ErrorKind::Timeout);
        assert_eq!(transport.count(DEFAULT_REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let transport = Arc::new(MockTransport::new(|_| {
            Ok(HttpResponse::json(404, &json!({"message": "no such playlist"})))
        }));
        let dispatcher = dispatcher_with(transport.clone());

        let err = dispatcher
            .execute("getPlaylist", HttpRequest::get("/playlists/missing"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), &ErrorKind::NotFound);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_network_failure() {
        let transport = Arc::new(MockTransport::new(|_| {
            Err(TransportError::Connect("connection refused".into()))
        }));
        let dispatcher = dispatcher_with(transport);

        let err = dispatcher
            .execute("getPlaylists", HttpRequest::get("/playlists"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_body_decoding() {
        let transport = Arc::new(MockTransport::new(|req| {
            Ok(match req.path.as_str() {
                "/empty" => HttpResponse::new(204, ""),
                _ => HttpResponse::new(200, "{not json"),
            })
        }));
        let dispatcher = dispatcher_with(transport);

        let empty = dispatcher
            .execute("deletePlaylist", HttpRequest::delete("/empty"))
            .await
            .unwrap();
        assert_eq!(empty, Value::Null);

        let err = dispatcher
            .execute("getPlaylists", HttpRequest::get("/broken"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_execute_public_skips_credentials() {
        let transport = Arc::new(playlist_api("A1"));
        let dispatcher = dispatcher_with(transport.clone());

        let _ = dispatcher
            .execute_public("login", HttpRequest::post("/auth/login", json!({})))
            .await;

        assert!(transport.calls()[0].bearer_token().is_none());
        assert_eq!(transport.count(DEFAULT_REFRESH_PATH), 0);
    }
}
