//! The edge agent.

use std::sync::{Arc, Mutex};

use echo_cache::{
    CacheKey, CachePurpose, CacheStore, CachedEntry, ContainerName, SqliteCacheStore,
};
use echo_net::{HttpNetwork, Network, NetworkConfig, Request, Response};
use echo_outbox::{Outbox, SqliteOutbox};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{self, ClaimError, ClientHost};
use crate::config::AgentConfig;
use crate::control::{acknowledge, AgentMessage, ControlMessage, ReplyPort};
use crate::error::{AgentError, AgentResult};
use crate::events::{AgentEvent, EventKind, EventOutcome, Handler, HandlerTable};
use crate::executor::{is_cacheable, snapshot, FetchExecutor};
use crate::lifecycle::{LifecycleController, LifecycleState};
use crate::notification::{route_click, ClickOutcome, NotificationOptions, NotificationPipeline};
use crate::router::{Route, StrategyRouter};
use crate::sync::{DrainReport, SendOutcome, SyncCoordinator};

/// One deployed version of the agent.
///
/// Owns the routing rules and lifecycle of its version, and borrows the
/// shared stores, client host and network it was constructed with.
pub struct EdgeAgent<N: Network> {
    config: AgentConfig,
    caches: Arc<dyn CacheStore>,
    outbox: Arc<dyn Outbox>,
    clients: Arc<dyn ClientHost>,
    network: Arc<N>,
    router: StrategyRouter,
    executor: FetchExecutor<N>,
    sync: SyncCoordinator<N>,
    notifications: NotificationPipeline,
    lifecycle: Mutex<LifecycleController>,
    handlers: HandlerTable<N>,
}

impl<N: Network> EdgeAgent<N> {
    pub fn new(
        config: AgentConfig,
        caches: Arc<dyn CacheStore>,
        outbox: Arc<dyn Outbox>,
        clients: Arc<dyn ClientHost>,
        network: Arc<N>,
    ) -> AgentResult<Self> {
        config.validate()?;

        let router = StrategyRouter::new(&config.routes);
        let executor = FetchExecutor::new(
            Arc::clone(&caches),
            Arc::clone(&network),
            config.version.as_str(),
            config.shell_url()?,
        );
        let sync = SyncCoordinator::new(
            Arc::clone(&outbox),
            Arc::clone(&network),
            config.messages_url()?,
        );
        let notifications = NotificationPipeline::new(config.notifications.clone());

        Ok(Self {
            config,
            caches,
            outbox,
            clients,
            network,
            router,
            executor,
            sync,
            notifications,
            lifecycle: Mutex::new(LifecycleController::new()),
            handlers: HandlerTable::with_defaults(),
        })
    }

    /// Create an agent backed by the SQLite stores under
    /// `config.storage.data_dir`.
    pub fn open(
        config: AgentConfig,
        clients: Arc<dyn ClientHost>,
        network: Arc<N>,
    ) -> AgentResult<Self> {
        std::fs::create_dir_all(&config.storage.data_dir)?;
        let caches = SqliteCacheStore::open_path(config.storage.cache_path())?;
        let outbox = SqliteOutbox::open_path(config.storage.outbox_path())?;
        Self::new(config, Arc::new(caches), Arc::new(outbox), clients, network)
    }
}

impl EdgeAgent<HttpNetwork> {
    /// Create an agent over HTTP whose network labels responses by the
    /// origin of `config.scope`.
    pub fn open_http(
        config: AgentConfig,
        clients: Arc<dyn ClientHost>,
        network: NetworkConfig,
    ) -> AgentResult<Self> {
        let network = HttpNetwork::for_scope(&config.scope, network)?;
        Self::open(config, clients, Arc::new(network))
    }
}

impl<N: Network> EdgeAgent<N> {
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn router(&self) -> &StrategyRouter {
        &self.router
    }

    pub fn caches(&self) -> &Arc<dyn CacheStore> {
        &self.caches
    }

    pub fn outbox(&self) -> &Arc<dyn Outbox> {
        &self.outbox
    }

    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    pub fn state(&self) -> LifecycleState {
        match self.lifecycle.lock() {
            Ok(lifecycle) => lifecycle.state(),
            Err(poisoned) => poisoned.into_inner().state(),
        }
    }

    pub fn skip_waiting_requested(&self) -> bool {
        match self.lifecycle.lock() {
            Ok(lifecycle) => lifecycle.skip_waiting_requested(),
            Err(poisoned) => poisoned.into_inner().skip_waiting_requested(),
        }
    }

    fn with_lifecycle<T>(
        &self,
        f: impl FnOnce(&mut LifecycleController) -> AgentResult<T>,
    ) -> AgentResult<T> {
        let mut lifecycle = self
            .lifecycle
            .lock()
            .map_err(|_| AgentError::invalid_state("lifecycle lock poisoned"))?;
        f(&mut lifecycle)
    }

    // ==================== Events ====================

    /// Replace the handler for an event kind.
    pub fn register_handler(&mut self, kind: EventKind, handler: Handler<N>) -> Option<Handler<N>> {
        self.handlers.register(kind, handler)
    }

    /// Run the registered handler for an event.
    pub async fn dispatch(&self, event: AgentEvent) -> EventOutcome {
        let kind = event.kind();
        match self.handlers.get(kind) {
            Some(handler) => handler(self, event).await,
            None => {
                debug!(kind = ?kind, "No handler registered");
                EventOutcome::Ignored
            }
        }
    }

    // ==================== Lifecycle ====================

    /// Pre-warm the static container. Returns the number of assets stored.
    pub async fn install(&self) -> AgentResult<usize> {
        self.with_lifecycle(|l| l.begin_install())?;
        info!(version = self.version(), "Installing");

        let count = self.precache().await?;

        self.with_lifecycle(|l| l.finish_install())?;
        info!(version = self.version(), assets = count, "Installed");
        Ok(count)
    }

    /// Fetch every shell asset, then store them all. Nothing is written
    /// unless every fetch succeeded.
    async fn precache(&self) -> AgentResult<usize> {
        let container = self.config.container(CachePurpose::Static);
        let urls = self.config.precache_urls()?;

        let mut fetched = Vec::with_capacity(urls.len());
        for url in urls {
            let request = Request::get(url);
            let response =
                self.network
                    .fetch(&request)
                    .await
                    .map_err(|e| AgentError::InstallFailed {
                        url: request.url.to_string(),
                        reason: e.to_string(),
                    })?;
            if !response.ok() {
                return Err(AgentError::InstallFailed {
                    url: request.url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            fetched.push((request, response));
        }

        // A redeploy of the same version writes into a container that may
        // already be serving.
        let existed = self.caches.has(&container)?;
        self.caches.open(&container)?;

        let mut written = Vec::with_capacity(fetched.len());
        for (request, response) in &fetched {
            let entry = snapshot(request, response);
            let previous = if existed {
                self.caches.match_entry(&container, &entry.key)?
            } else {
                None
            };
            let key = entry.key.clone();

            if let Err(e) = self.caches.put(&container, entry) {
                if existed {
                    self.restore_entries(&container, written);
                } else if let Err(cleanup) = self.caches.delete(&container) {
                    warn!(container = %container, error = %cleanup, "Failed to discard partial install");
                }
                return Err(AgentError::InstallFailed {
                    url: request.url.to_string(),
                    reason: e.to_string(),
                });
            }
            written.push((key, previous));
        }
        Ok(fetched.len())
    }

    /// Undo the writes of a failed install into an existing container.
    fn restore_entries(&self, container: &str, written: Vec<(CacheKey, Option<CachedEntry>)>) {
        for (key, previous) in written.into_iter().rev() {
            let restored = match previous {
                Some(entry) => self.caches.put(container, entry),
                None => self.caches.delete_entry(container, &key).map(|_| ()),
            };
            if let Err(e) = restored {
                warn!(container, key = %key, error = %e, "Failed to roll back install entry");
            }
        }
    }

    /// Delete containers from other versions, take control of open pages,
    /// and tell them to reload if activation was forced.
    pub fn activate(&self) -> AgentResult<()> {
        let forced = self.with_lifecycle(|l| l.begin_activate())?;

        let removed = match self.collect_garbage() {
            Ok(removed) => removed.len(),
            Err(e) => {
                warn!(error = %e, "Failed to remove old containers");
                0
            }
        };
        self.claim_clients();

        self.with_lifecycle(|l| l.finish_activate())?;
        info!(version = self.version(), removed, forced, "Activated");

        if forced {
            let notified = self.broadcast(AgentMessage::UpdateAvailable);
            debug!(notified, "Announced update");
        }
        Ok(())
    }

    /// Delete every container that is not one of this version's. Returns
    /// the deleted names.
    pub fn collect_garbage(&self) -> AgentResult<Vec<String>> {
        let current = ContainerName::current(self.version());
        let mut removed = Vec::new();
        for name in self.caches.keys()? {
            if current.contains(&name) {
                continue;
            }
            if self.caches.delete(&name)? {
                debug!(container = %name, "Deleted old container");
                removed.push(name);
            }
        }
        Ok(removed)
    }

    fn claim_clients(&self) {
        match self.clients.claim(self.version()) {
            Ok(()) => {}
            Err(ClaimError::AlreadyControlled(holder)) => {
                debug!(holder = %holder, "Clients already controlled");
            }
            Err(e) => warn!(error = %e, "Failed to claim clients"),
        }
    }

    /// Activate without waiting for existing pages to close. Before the
    /// install finished this only records the request.
    pub fn skip_waiting(&self) -> AgentResult<()> {
        let state = self.with_lifecycle(|l| {
            l.request_skip_waiting();
            Ok(l.state())
        })?;
        if state == LifecycleState::Installed {
            self.activate()?;
        }
        Ok(())
    }

    // ==================== Fetch ====================

    /// Serve an intercepted request. `None` means the host should perform
    /// the request itself.
    pub async fn handle_fetch(&self, request: Request) -> Option<Response> {
        if self.state() != LifecycleState::Active {
            return None;
        }
        match self.router.classify(&request) {
            Route::Bypass(reason) => {
                debug!(url = %request.url, reason = ?reason, "Bypassing request");
                None
            }
            Route::Handle { strategy, purpose } => {
                Some(self.executor.execute(strategy, &request, purpose).await)
            }
        }
    }

    /// Wait for background revalidations.
    pub async fn settle(&self) {
        self.executor.settle().await;
    }

    // ==================== Sync ====================

    /// Drain the outbox when `tag` is the outbox tag. Other tags return
    /// `None`.
    pub async fn handle_sync(&self, tag: &str) -> AgentResult<Option<DrainReport>> {
        if tag != self.config.sync.outbox_tag {
            debug!(tag, "Ignoring sync tag");
            return Ok(None);
        }
        self.sync.drain().await.map(Some)
    }

    /// Ask open pages to re-synchronize. Returns how many were notified.
    pub fn handle_periodic_sync(&self, tag: &str) -> Option<usize> {
        if tag != self.config.sync.periodic_tag {
            debug!(tag, "Ignoring periodic sync tag");
            return None;
        }
        Some(self.broadcast(AgentMessage::SyncMessages))
    }

    /// Send a message now, or queue it for the next sync.
    pub async fn send_message(&self, payload: JsonValue) -> AgentResult<SendOutcome> {
        self.sync.send_or_queue(payload).await
    }

    // ==================== Push ====================

    pub fn handle_push(&self, payload: Option<&[u8]>) -> NotificationOptions {
        let notification = self.notifications.parse(payload);
        info!(title = %notification.title, tag = %notification.tag, "Showing notification");
        notification
    }

    pub fn handle_notification_click(
        &self,
        action: Option<&str>,
        notification: &NotificationOptions,
    ) -> AgentResult<ClickOutcome> {
        let outcome = route_click(self.clients.as_ref(), &self.config.scope, action, notification)?;
        debug!(action, outcome = ?outcome, "Notification clicked");
        Ok(outcome)
    }

    pub fn handle_notification_close(&self, notification: &NotificationOptions) {
        debug!(tag = %notification.tag, "Notification closed");
    }

    // ==================== Control ====================

    /// Handle a page's control message. A reply port, if given, is always
    /// acknowledged.
    pub async fn handle_message(&self, data: JsonValue, reply: Option<ReplyPort>) {
        match ControlMessage::parse(&data) {
            Some(ControlMessage::SkipWaiting) => {
                if let Err(e) = self.skip_waiting() {
                    warn!(error = %e, "Skip-waiting failed");
                }
            }
            Some(ControlMessage::CacheUrls { urls }) => {
                let urls = urls.unwrap_or_default();
                let stored = self.cache_urls(&urls).await;
                debug!(requested = urls.len(), stored, "Cached URLs");
            }
            Some(ControlMessage::ClearCache) => match self.clear_caches() {
                Ok(count) => info!(count, "Cleared caches"),
                Err(e) => warn!(error = %e, "Failed to clear caches"),
            },
            Some(ControlMessage::UpdateAvailable) => {
                debug!("Ignoring UPDATE_AVAILABLE from page");
            }
            None => debug!(data = %data, "Ignoring unrecognized control message"),
        }
        acknowledge(reply);
    }

    /// Fetch URLs into the dynamic container. Each URL is independent; the
    /// return value counts the ones stored.
    pub async fn cache_urls(&self, urls: &[String]) -> usize {
        let container = self.config.container(CachePurpose::Dynamic);
        let mut stored = 0;
        for raw in urls {
            match self.cache_url(&container, raw).await {
                Ok(true) => stored += 1,
                Ok(false) => debug!(url = %raw, "Response not cacheable"),
                Err(e) => warn!(url = %raw, error = %e, "Failed to cache URL"),
            }
        }
        stored
    }

    async fn cache_url(&self, container: &str, raw: &str) -> AgentResult<bool> {
        let url: Url = self.config.resolve(raw)?;
        let request = Request::get(url);
        let response = self.network.fetch(&request).await?;
        if !is_cacheable(&response) {
            return Ok(false);
        }
        self.caches.put(container, snapshot(&request, &response))?;
        Ok(true)
    }

    /// Delete every container regardless of version.
    pub fn clear_caches(&self) -> AgentResult<usize> {
        let mut count = 0;
        for name in self.caches.keys()? {
            if self.caches.delete(&name)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Post a notice to every open page.
    pub fn broadcast(&self, message: AgentMessage) -> usize {
        clients::broadcast(self.clients.as_ref(), &message)
    }
}
