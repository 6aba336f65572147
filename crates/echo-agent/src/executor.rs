//! Strategy execution.
//!
//! The executor never fails: every error raised while running a strategy is
//! logged and turned into a fallback response. Navigations fall back to the
//! cached application shell; everything else gets the synthetic 503.

use std::sync::{Arc, Mutex};

use echo_cache::{CacheKey, CachePurpose, CacheStore, CachedEntry, ContainerName};
use echo_net::{Network, Request, Response, ResponseType};
use http::StatusCode;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{AgentError, AgentResult};
use crate::router::Strategy;

/// Check whether a response may be stored. Only successful same-origin
/// responses are kept so a cross-origin failure is never replayed as a
/// stale success.
pub fn is_cacheable(response: &Response) -> bool {
    response.ok() && response.response_type == ResponseType::Basic
}

/// Snapshot a response for storage under the request's key.
pub fn snapshot(request: &Request, response: &Response) -> CachedEntry {
    CachedEntry::new(
        CacheKey::new(request.method.as_str(), &request.url),
        response.status.as_u16(),
        response.headers.clone(),
        response.body.to_vec(),
    )
}

/// Rebuild a response from a stored snapshot.
pub fn restore(entry: CachedEntry, url: &Url) -> AgentResult<Response> {
    let status = StatusCode::from_u16(entry.status)
        .map_err(|e| AgentError::NotCached(format!("{}: {}", entry.key, e)))?;
    Ok(Response {
        url: url.clone(),
        status,
        headers: entry.headers,
        body: entry.body.into(),
        response_type: ResponseType::Basic,
        from_cache: true,
    })
}

/// Store a response if it is cacheable. Store failures are logged and
/// otherwise ignored.
fn store_response(caches: &dyn CacheStore, container: &str, request: &Request, response: &Response) {
    if !is_cacheable(response) {
        trace!(url = %request.url, status = %response.status, "Response not cacheable");
        return;
    }
    if let Err(e) = caches.put(container, snapshot(request, response)) {
        warn!(url = %request.url, container, error = %e, "Failed to store response");
    }
}

/// Runs fetch strategies against the cache store and the network.
pub struct FetchExecutor<N: Network> {
    caches: Arc<dyn CacheStore>,
    network: Arc<N>,
    version: String,
    shell_url: Url,
    /// Detached revalidation tasks.
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<N: Network> FetchExecutor<N> {
    pub fn new(
        caches: Arc<dyn CacheStore>,
        network: Arc<N>,
        version: impl Into<String>,
        shell_url: Url,
    ) -> Self {
        Self {
            caches,
            network,
            version: version.into(),
            shell_url,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Current container name for a purpose.
    pub fn container(&self, purpose: CachePurpose) -> String {
        ContainerName::new(self.version.as_str(), purpose).to_string()
    }

    /// Serve a request with the given strategy.
    pub async fn execute(
        &self,
        strategy: Strategy,
        request: &Request,
        purpose: CachePurpose,
    ) -> Response {
        match self.run(strategy, request, purpose).await {
            Ok(response) => response,
            Err(e) => {
                debug!(
                    url = %request.url,
                    strategy = ?strategy,
                    category = e.category(),
                    error = %e,
                    "Strategy failed, serving fallback"
                );
                self.fallback(request)
            }
        }
    }

    async fn run(
        &self,
        strategy: Strategy,
        request: &Request,
        purpose: CachePurpose,
    ) -> AgentResult<Response> {
        let container = self.container(purpose);
        match strategy {
            Strategy::CacheFirst => self.cache_first(request, &container).await,
            Strategy::NetworkFirst => self.network_first(request, &container).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, &container).await
            }
            Strategy::NetworkOnly => Ok(self.network.fetch(request).await?),
            Strategy::CacheOnly => self.cache_only(request, &container),
        }
    }

    async fn cache_first(&self, request: &Request, container: &str) -> AgentResult<Response> {
        if let Some(cached) = self.lookup(container, request) {
            trace!(url = %request.url, container, "Cache hit");
            return Ok(cached);
        }

        let response = self.network.fetch(request).await?;
        store_response(self.caches.as_ref(), container, request, &response);
        Ok(response)
    }

    async fn network_first(&self, request: &Request, container: &str) -> AgentResult<Response> {
        match self.network.fetch(request).await {
            Ok(response) => {
                store_response(self.caches.as_ref(), container, request, &response);
                Ok(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                self.lookup(container, request).ok_or(AgentError::Network(e))
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &Request,
        container: &str,
    ) -> AgentResult<Response> {
        if let Some(cached) = self.lookup(container, request) {
            self.revalidate(request, container);
            return Ok(cached);
        }

        let response = self.network.fetch(request).await?;
        store_response(self.caches.as_ref(), container, request, &response);
        Ok(response)
    }

    fn cache_only(&self, request: &Request, container: &str) -> AgentResult<Response> {
        if let Some(cached) = self.lookup(container, request) {
            return Ok(cached);
        }
        let key = CacheKey::new(request.method.as_str(), &request.url);
        match self.caches.match_any(&key)? {
            Some(entry) => restore(entry, &request.url),
            None => Err(AgentError::NotCached(request.url.to_string())),
        }
    }

    /// Refresh the cached entry in the background. The outcome never
    /// reaches the caller that triggered it.
    fn revalidate(&self, request: &Request, container: &str) {
        let caches = Arc::clone(&self.caches);
        let network = Arc::clone(&self.network);
        let request = request.clone();
        let container = container.to_string();

        let handle = tokio::spawn(async move {
            match network.fetch(&request).await {
                Ok(response) => {
                    store_response(caches.as_ref(), &container, &request, &response);
                    trace!(url = %request.url, status = %response.status, "Revalidated");
                }
                Err(e) => debug!(url = %request.url, error = %e, "Revalidation failed"),
            }
        });

        if let Ok(mut pending) = self.background.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }

    /// Wait for every detached revalidation started so far.
    pub async fn settle(&self) {
        let pending = match self.background.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        for handle in pending {
            if let Err(e) = handle.await {
                debug!(error = %e, "Revalidation task did not complete");
            }
        }
    }

    /// Look up a cached response. Store errors degrade to a miss.
    fn lookup(&self, container: &str, request: &Request) -> Option<Response> {
        let key = CacheKey::new(request.method.as_str(), &request.url);
        let entry = match self.caches.match_entry(container, &key) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(url = %request.url, container, error = %e, "Cache lookup failed");
                return None;
            }
        };
        match restore(entry, &request.url) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Discarding unreadable cache entry");
                None
            }
        }
    }

    /// Response for a request no strategy could serve.
    pub fn fallback(&self, request: &Request) -> Response {
        if request.is_navigation() {
            if let Some(shell) = self.cached_shell() {
                debug!(url = %request.url, "Serving cached shell");
                return Response {
                    url: request.url.clone(),
                    ..shell
                };
            }
        }
        Response::offline(request.url.clone())
    }

    fn cached_shell(&self) -> Option<Response> {
        let key = CacheKey::get(&self.shell_url);
        let container = self.container(CachePurpose::Static);
        match self.caches.match_entry(&container, &key) {
            Ok(Some(entry)) => restore(entry, &self.shell_url).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Shell lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_test::ScriptedNetwork;
    use echo_cache::{CacheError, MemoryCacheStore};

    const SHELL: &str = "https://chat.example.com/";

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn setup() -> (Arc<MemoryCacheStore>, Arc<ScriptedNetwork>, FetchExecutor<ScriptedNetwork>) {
        let caches = Arc::new(MemoryCacheStore::new());
        let network = Arc::new(ScriptedNetwork::new());
        let executor = FetchExecutor::new(
            caches.clone() as Arc<dyn CacheStore>,
            network.clone(),
            "v1",
            url(SHELL),
        );
        (caches, network, executor)
    }

    #[tokio::test]
    async fn test_cache_first_hits_cache_on_second_request() {
        let (_, network, executor) = setup();
        network.respond("https://chat.example.com/manifest.json", "{}");
        let request = Request::get(url("https://chat.example.com/manifest.json"));

        let first = executor
            .execute(Strategy::CacheFirst, &request, CachePurpose::Static)
            .await;
        let second = executor
            .execute(Strategy::CacheFirst, &request, CachePurpose::Static)
            .await;

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.text(), "{}");
        assert_eq!(network.calls_to("https://chat.example.com/manifest.json"), 1);
    }

    #[tokio::test]
    async fn test_cache_first_offline_without_entry_is_503() {
        let (_, network, executor) = setup();
        network.set_online(false);
        let request = Request::get(url("https://chat.example.com/icons/a.png"));

        let response = executor
            .execute(Strategy::CacheFirst, &request, CachePurpose::Static)
            .await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text(), "Offline");
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let (_, network, executor) = setup();
        network.respond("https://chat.example.com/app.js", "v1 bundle");
        let request = Request::get(url("https://chat.example.com/app.js"));

        executor
            .execute(Strategy::NetworkFirst, &request, CachePurpose::Dynamic)
            .await;
        network.set_online(false);
        let response = executor
            .execute(Strategy::NetworkFirst, &request, CachePurpose::Dynamic)
            .await;

        assert!(response.from_cache);
        assert_eq!(response.text(), "v1 bundle");
    }

    #[tokio::test]
    async fn test_network_first_overwrites_entry() {
        let (caches, network, executor) = setup();
        let target = "https://chat.example.com/api/me";
        let request = Request::get(url(target));

        network.respond(target, "old");
        executor
            .execute(Strategy::NetworkFirst, &request, CachePurpose::Api)
            .await;
        network.respond(target, "new");
        executor
            .execute(Strategy::NetworkFirst, &request, CachePurpose::Api)
            .await;

        let entry = caches
            .match_entry("v1-api", &CacheKey::get(&url(target)))
            .unwrap()
            .unwrap();
        assert_eq!(entry.body, b"new");
    }

    #[tokio::test]
    async fn test_error_status_is_returned_but_not_cached() {
        let (caches, network, executor) = setup();
        let target = "https://chat.example.com/missing.js";
        network.respond_status(target, 404, "nope");

        let response = executor
            .execute(Strategy::NetworkFirst, &Request::get(url(target)), CachePurpose::Dynamic)
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(caches.entry_keys("v1-dynamic").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cross_origin_responses_not_cached() {
        let (caches, network, executor) = setup();
        let target = "https://cdn.example.net/lib.js";
        network.respond_with(
            target,
            Response::new(url(target), StatusCode::OK, "lib").with_type(ResponseType::Opaque),
        );

        executor
            .execute(Strategy::NetworkFirst, &Request::get(url(target)), CachePurpose::Dynamic)
            .await;
        assert!(caches.entry_keys("v1-dynamic").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_stale_then_fresh() {
        let (_, network, executor) = setup();
        let target = "https://chat.example.com/avatars/alice.png";
        let request = Request::get(url(target));

        network.respond(target, "old avatar");
        let first = executor
            .execute(Strategy::StaleWhileRevalidate, &request, CachePurpose::Image)
            .await;
        assert_eq!(first.text(), "old avatar");

        network.respond(target, "new avatar");
        let stale = executor
            .execute(Strategy::StaleWhileRevalidate, &request, CachePurpose::Image)
            .await;
        assert!(stale.from_cache);
        assert_eq!(stale.text(), "old avatar");

        executor.settle().await;
        let fresh = executor
            .execute(Strategy::StaleWhileRevalidate, &request, CachePurpose::Image)
            .await;
        assert_eq!(fresh.text(), "new avatar");
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_swallows_background_failure() {
        let (_, network, executor) = setup();
        let target = "https://chat.example.com/avatars/bob.png";
        let request = Request::get(url(target));

        network.respond(target, "bob");
        executor
            .execute(Strategy::StaleWhileRevalidate, &request, CachePurpose::Image)
            .await;

        network.set_online(false);
        let response = executor
            .execute(Strategy::StaleWhileRevalidate, &request, CachePurpose::Image)
            .await;
        executor.settle().await;

        assert!(response.ok());
        assert_eq!(response.text(), "bob");
    }

    #[tokio::test]
    async fn test_cache_only_and_network_only() {
        let (caches, network, executor) = setup();
        let target = "https://chat.example.com/icons/icon-192x192.png";
        let request = Request::get(url(target));

        let miss = executor
            .execute(Strategy::CacheOnly, &request, CachePurpose::Static)
            .await;
        assert_eq!(miss.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(network.calls_to(target), 0);

        network.respond(target, "icon");
        let live = executor
            .execute(Strategy::NetworkOnly, &request, CachePurpose::Static)
            .await;
        assert_eq!(live.text(), "icon");
        assert!(caches.keys().unwrap().is_empty());

        // Cache-only finds entries in any container.
        caches
            .put("v1-image", snapshot(&request, &live))
            .unwrap();
        let hit = executor
            .execute(Strategy::CacheOnly, &request, CachePurpose::Static)
            .await;
        assert_eq!(hit.text(), "icon");
    }

    #[tokio::test]
    async fn test_navigation_falls_back_to_shell() {
        let (caches, network, executor) = setup();
        network.set_online(false);
        let nav = Request::navigate(url("https://chat.example.com/chat/42"));

        let offline = executor
            .execute(Strategy::NetworkFirst, &nav, CachePurpose::Dynamic)
            .await;
        assert_eq!(offline.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(offline.text(), "Offline");

        let shell_request = Request::get(url(SHELL));
        let shell = Response::new(url(SHELL), StatusCode::OK, "<html>shell</html>");
        caches
            .put("v1-static", snapshot(&shell_request, &shell))
            .unwrap();

        let response = executor
            .execute(Strategy::NetworkFirst, &nav, CachePurpose::Dynamic)
            .await;
        assert!(response.ok());
        assert_eq!(response.text(), "<html>shell</html>");
        assert_eq!(response.url, nav.url);
    }

    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn open(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Storage("disk full".into()))
        }
        fn has(&self, _: &str) -> Result<bool, CacheError> {
            Err(CacheError::Storage("disk full".into()))
        }
        fn keys(&self) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Storage("disk full".into()))
        }
        fn delete(&self, _: &str) -> Result<bool, CacheError> {
            Err(CacheError::Storage("disk full".into()))
        }
        fn match_entry(&self, _: &str, _: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
            Err(CacheError::Storage("corrupt".into()))
        }
        fn put(&self, name: &str, _: CachedEntry) -> Result<(), CacheError> {
            Err(CacheError::QuotaExceeded(name.to_string()))
        }
        fn delete_entry(&self, _: &str, _: &CacheKey) -> Result<bool, CacheError> {
            Err(CacheError::Storage("disk full".into()))
        }
        fn entry_keys(&self, _: &str) -> Result<Vec<CacheKey>, CacheError> {
            Err(CacheError::Storage("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_cache_failure_degrades_to_network() {
        let network = Arc::new(ScriptedNetwork::new());
        let executor = FetchExecutor::new(
            Arc::new(BrokenStore) as Arc<dyn CacheStore>,
            network.clone(),
            "v1",
            url(SHELL),
        );
        let target = "https://chat.example.com/manifest.json";
        network.respond(target, "{}");

        for strategy in [
            Strategy::CacheFirst,
            Strategy::NetworkFirst,
            Strategy::StaleWhileRevalidate,
        ] {
            let response = executor
                .execute(strategy, &Request::get(url(target)), CachePurpose::Static)
                .await;
            assert!(response.ok(), "{:?}", strategy);
            assert_eq!(response.text(), "{}");
        }
    }
}
