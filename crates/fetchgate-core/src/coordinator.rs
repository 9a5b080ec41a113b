//! Coordinator
//!
//! The context object tying the token store, refresh gate, dispatcher,
//! cache ledger and subscriptions together. Everything an application does
//! against the API goes through one of these.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cache::{
    CacheLedger, Fetcher, QueryKey, SubscriptionHandle, SubscriptionManager,
};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{ErrorKind, FetchError, FetchResult};
use crate::events::{EventHub, EventSubscription};
use crate::refresh::RefreshGate;
use crate::storage::{FileKeyValueStore, KeyValueStore};
use crate::token::{Credentials, SessionStatus, TokenStore};
use crate::transport::{HttpRequest, ReqwestTransport, Transport};
use crate::validate::{self, Validator};

/// Endpoint name used for login errors
pub const LOGIN_ENDPOINT: &str = "login";

/// A cached read
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// Logical endpoint name, e.g. `getPlaylists`
    pub endpoint: String,
    /// Arguments identifying the result set
    pub args: Value,
    pub request: HttpRequest,
    /// Tags the result provides
    pub tags: Vec<String>,
    /// Overrides the configured maximum age
    pub max_age: Option<Duration>,
}

impl QuerySpec {
    pub fn new(endpoint: impl Into<String>, request: HttpRequest) -> Self {
        Self {
            endpoint: endpoint.into(),
            args: Value::Null,
            request,
            tags: Vec::new(),
            max_age: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn key(&self) -> QueryKey {
        QueryKey::new(self.endpoint.as_str(), &self.args)
    }

    /// Key shared by every page of a paginated query (`page` argument dropped)
    pub fn page_key(&self) -> QueryKey {
        let mut args = self.args.clone();
        if let Some(object) = args.as_object_mut() {
            object.remove("page");
        }
        QueryKey::new(self.endpoint.as_str(), &args)
    }
}

/// A write
#[derive(Debug, Clone)]
pub struct MutationSpec {
    pub endpoint: String,
    pub request: HttpRequest,
    /// Tags invalidated once the write succeeds
    pub invalidates: Vec<String>,
}

impl MutationSpec {
    pub fn new(endpoint: impl Into<String>, request: HttpRequest) -> Self {
        Self {
            endpoint: endpoint.into(),
            request,
            invalidates: Vec::new(),
        }
    }

    pub fn invalidating(mut self, tag: impl Into<String>) -> Self {
        self.invalidates.push(tag.into());
        self
    }
}

/// Authenticated, cached access to the API
#[derive(Clone)]
pub struct Coordinator {
    dispatcher: Dispatcher,
    ledger: CacheLedger,
    subscriptions: SubscriptionManager,
    max_age: Duration,
}

impl Coordinator {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let tokens = TokenStore::load(store);
        let gate = RefreshGate::new(tokens);
        let ledger = CacheLedger::new(config.grace_period());

        // A session that cannot be refreshed takes its cached data with it
        let weak = ledger.downgrade();
        gate.on_logout(move || {
            if let Some(ledger) = weak.upgrade() {
                ledger.clear();
            }
        });

        let dispatcher = Dispatcher::new(transport, gate)
            .with_refresh_path(config.refresh_path.as_str())
            .with_timeout(config.request_timeout());

        Self {
            dispatcher,
            subscriptions: SubscriptionManager::new(ledger.clone()),
            ledger,
            max_age: config.max_age(),
        }
    }

    /// Coordinator over HTTP with credentials persisted in the data directory
    pub fn from_config(config: &Config) -> Result<Self> {
        config.ensure_data_dir()?;
        let transport = Arc::new(ReqwestTransport::new(config.base_url.as_str())?);
        let store = Arc::new(FileKeyValueStore::new(config.state_path()));
        Ok(Self::new(config, transport, store))
    }

    /// Exchange login details for credentials
    pub async fn login(&self, path: &str, body: Value) -> FetchResult<Credentials> {
        let response = self
            .dispatcher
            .execute_public(LOGIN_ENDPOINT, HttpRequest::post(path, body))
            .await?;

        let credentials: Credentials = serde_json::from_value(response).map_err(|e| {
            FetchError::new(ErrorKind::Parse, LOGIN_ENDPOINT)
                .with_detail(format!("unexpected login response: {}", e))
        })?;

        // Nothing cached for a previous user survives a login
        self.ledger.clear();
        self.tokens().set(credentials.clone());
        info!("Logged in");
        Ok(credentials)
    }

    pub fn logout(&self) {
        self.tokens().clear();
        self.ledger.clear();
    }

    /// Cached read through the dispatcher
    pub async fn query(&self, spec: QuerySpec) -> FetchResult<Value> {
        self.run_query(spec, None).await
    }

    /// Cached read whose payload must pass `validator`
    pub async fn query_validated(
        &self,
        spec: QuerySpec,
        validator: impl Validator + 'static,
    ) -> FetchResult<Value> {
        self.run_query(spec, Some(Arc::new(validator))).await
    }

    /// Subscribe to a query and read it
    ///
    /// The entry stays cached, and is refetched on invalidation, for as long
    /// as the returned handle lives.
    pub async fn watch(&self, spec: QuerySpec) -> FetchResult<(Value, SubscriptionHandle)> {
        let handle = self.subscriptions.subscribe(spec.key());
        let value = self.query(spec).await?;
        Ok((value, handle))
    }

    pub fn subscribe(&self, key: QueryKey) -> SubscriptionHandle {
        self.subscriptions.subscribe(key)
    }

    /// Run a write, invalidating its tags when it succeeds
    pub async fn mutate(&self, spec: MutationSpec) -> FetchResult<Value> {
        let value = self.dispatcher.execute(&spec.endpoint, spec.request).await?;
        self.ledger.invalidate(spec.invalidates);
        Ok(value)
    }

    /// Run a write with its expected effect applied to `key` up front
    ///
    /// The patch is rolled back if the write fails.
    pub async fn mutate_optimistic(
        &self,
        spec: MutationSpec,
        key: &QueryKey,
        patch: impl FnOnce(&mut Value),
    ) -> FetchResult<Value> {
        let undo = self.ledger.patch(key, patch);

        match self.dispatcher.execute(&spec.endpoint, spec.request).await {
            Ok(value) => {
                if let Some(token) = undo {
                    self.ledger.commit(token);
                }
                self.ledger.invalidate(spec.invalidates);
                Ok(value)
            }
            Err(e) => {
                if let Some(token) = undo {
                    debug!(endpoint = %spec.endpoint, "Write failed, rolling back");
                    self.ledger.undo(token);
                }
                Err(e)
            }
        }
    }

    /// Fetch one page and fold it into the entry shared by all pages
    pub async fn fetch_page(
        &self,
        spec: QuerySpec,
        merge: impl FnOnce(&mut Value, Value),
    ) -> FetchResult<Value> {
        let page = self
            .dispatcher
            .execute(&spec.endpoint, spec.request.clone())
            .await?;
        Ok(self.ledger.merge(&spec.page_key(), spec.tags, page, merge))
    }

    /// Invalidate `tags` whenever `event` is pushed
    pub fn bind_event(
        &self,
        hub: &EventHub,
        event: &str,
        tags: Vec<String>,
    ) -> EventSubscription {
        let ledger = self.ledger.clone();
        hub.subscribe(event, move |_| ledger.invalidate(tags.iter().cloned()))
    }

    /// Patch the entry for `key` with each pushed `event`'s payload
    pub fn bind_event_patch(
        &self,
        hub: &EventHub,
        event: &str,
        key: QueryKey,
        patch: impl Fn(&mut Value, &Value) + Send + Sync + 'static,
    ) -> EventSubscription {
        let ledger = self.ledger.clone();
        hub.subscribe(event, move |payload| {
            if let Some(token) = ledger.patch(&key, |data| patch(data, payload)) {
                ledger.commit(token);
            }
        })
    }

    pub fn invalidate(&self, tags: Vec<String>) {
        self.ledger.invalidate(tags);
    }

    /// Session status updates
    pub fn session(&self) -> watch::Receiver<SessionStatus> {
        self.tokens().subscribe_status()
    }

    pub fn status(&self) -> SessionStatus {
        self.tokens().status()
    }

    pub fn tokens(&self) -> &TokenStore {
        self.dispatcher.tokens()
    }

    pub fn ledger(&self) -> &CacheLedger {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    async fn run_query(
        &self,
        spec: QuerySpec,
        validator: Option<Arc<dyn Validator>>,
    ) -> FetchResult<Value> {
        let key = spec.key();
        let max_age = spec.max_age.unwrap_or(self.max_age);
        let fetcher = self.fetcher(spec.endpoint, spec.request, validator);
        self.ledger
            .get_or_fetch(key, spec.tags, fetcher, max_age)
            .await
    }

    fn fetcher(
        &self,
        endpoint: String,
        request: HttpRequest,
        validator: Option<Arc<dyn Validator>>,
    ) -> Fetcher {
        let dispatcher = self.dispatcher.clone();
        Arc::new(move || {
            let dispatcher = dispatcher.clone();
            let endpoint = endpoint.clone();
            let request = request.clone();
            let validator = validator.clone();
            async move {
                let value = dispatcher.execute(&endpoint, request).await?;
                match validator {
                    Some(validator) => validate::check(&endpoint, value, validator.as_ref()),
                    None => Ok(value),
                }
            }
            .boxed()
        })
    }
}
