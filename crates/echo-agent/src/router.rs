//! Request classification.
//!
//! Every intercepted request gets exactly one [`Route`]: either it bypasses
//! the agent entirely, or it is served by a [`Strategy`] against the
//! container for a [`CachePurpose`]. Classification is a pure function of
//! the request and the ordered rule list; the first matching rule wins and
//! the last rule always matches.

use echo_cache::CachePurpose;
use echo_net::{Destination, Request};
use http::Method;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::RouteConfig;

/// How cache and network are consulted for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    /// Never selected by the router; forced-refresh paths only.
    NetworkOnly,
    /// Never selected by the router; forced-offline paths only.
    CacheOnly,
}

/// Why a request is left to the host untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bypass {
    NonGet,
    UnsupportedScheme,
    DevTransport,
}

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Bypass(Bypass),
    Handle {
        strategy: Strategy,
        purpose: CachePurpose,
    },
}

/// Predicate over a request.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Path ends with one of the suffixes (case-insensitive).
    PathSuffix(Vec<String>),
    PathPrefix(Vec<String>),
    PathExact(Vec<String>),
    Destination(Destination),
    /// Host equals one of the names or is a subdomain of it.
    HostSuffix(Vec<String>),
    Navigation,
    Any(Vec<Matcher>),
    Always,
}

impl Matcher {
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            Matcher::PathSuffix(suffixes) => {
                let path = request.url.path().to_ascii_lowercase();
                suffixes.iter().any(|s| path.ends_with(s.as_str()))
            }
            Matcher::PathPrefix(prefixes) => {
                let path = request.url.path();
                prefixes.iter().any(|p| path.starts_with(p.as_str()))
            }
            Matcher::PathExact(paths) => {
                let path = request.url.path();
                paths.iter().any(|p| path == p)
            }
            Matcher::Destination(destination) => request.destination == *destination,
            Matcher::HostSuffix(hosts) => match request.url.host_str() {
                Some(host) => hosts.iter().any(|h| {
                    host == h
                        || host
                            .strip_suffix(h.as_str())
                            .map(|rest| rest.ends_with('.'))
                            .unwrap_or(false)
                }),
                None => false,
            },
            Matcher::Navigation => request.is_navigation(),
            Matcher::Any(matchers) => matchers.iter().any(|m| m.matches(request)),
            Matcher::Always => true,
        }
    }
}

/// One entry of the ordered rule list.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub name: &'static str,
    pub matcher: Matcher,
    pub strategy: Strategy,
    pub purpose: CachePurpose,
}

/// Ordered, data-driven request classifier.
#[derive(Debug, Clone)]
pub struct StrategyRouter {
    rules: Vec<RouteRule>,
    dev_transport: Vec<String>,
}

impl StrategyRouter {
    /// Build the standard rule list from configuration.
    pub fn new(config: &RouteConfig) -> Self {
        let rules = vec![
            RouteRule {
                name: "scripts-and-build-output",
                matcher: Matcher::Any(vec![
                    Matcher::PathSuffix(config.script_extensions.clone()),
                    Matcher::PathPrefix(config.build_prefixes.clone()),
                ]),
                strategy: Strategy::NetworkFirst,
                purpose: CachePurpose::Dynamic,
            },
            RouteRule {
                name: "icons-and-manifest",
                matcher: Matcher::Any(vec![
                    Matcher::PathPrefix(config.icon_prefixes.clone()),
                    Matcher::PathExact(config.manifest_paths.clone()),
                ]),
                strategy: Strategy::CacheFirst,
                purpose: CachePurpose::Static,
            },
            RouteRule {
                name: "images",
                matcher: Matcher::Any(vec![
                    Matcher::Destination(Destination::Image),
                    Matcher::PathSuffix(config.image_extensions.clone()),
                ]),
                strategy: Strategy::StaleWhileRevalidate,
                purpose: CachePurpose::Image,
            },
            RouteRule {
                name: "api",
                matcher: Matcher::Any(vec![
                    Matcher::PathPrefix(config.api_prefixes.clone()),
                    Matcher::HostSuffix(config.backend_hosts.clone()),
                ]),
                strategy: Strategy::NetworkFirst,
                purpose: CachePurpose::Api,
            },
            RouteRule {
                name: "navigation",
                matcher: Matcher::Navigation,
                strategy: Strategy::NetworkFirst,
                purpose: CachePurpose::Dynamic,
            },
            RouteRule {
                name: "default",
                matcher: Matcher::Always,
                strategy: Strategy::NetworkFirst,
                purpose: CachePurpose::Dynamic,
            },
        ];

        Self {
            rules,
            dev_transport: config.dev_transport.clone(),
        }
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Classify a request.
    pub fn classify(&self, request: &Request) -> Route {
        if request.method != Method::GET {
            return Route::Bypass(Bypass::NonGet);
        }

        if !matches!(request.url.scheme(), "http" | "https") {
            return Route::Bypass(Bypass::UnsupportedScheme);
        }

        if self.is_dev_transport(request) {
            return Route::Bypass(Bypass::DevTransport);
        }

        for rule in &self.rules {
            if rule.matcher.matches(request) {
                trace!(url = %request.url, rule = rule.name, strategy = ?rule.strategy, "Classified request");
                return Route::Handle {
                    strategy: rule.strategy,
                    purpose: rule.purpose,
                };
            }
        }

        Route::Handle {
            strategy: Strategy::NetworkFirst,
            purpose: CachePurpose::Dynamic,
        }
    }

    fn is_dev_transport(&self, request: &Request) -> bool {
        let (Some(host), Some(port)) = (request.url.host_str(), request.url.port_or_known_default())
        else {
            return false;
        };
        let authority = format!("{}:{}", host, port);
        self.dev_transport.iter().any(|t| *t == authority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_net::RequestMode;
    use url::Url;

    fn router() -> StrategyRouter {
        StrategyRouter::new(&RouteConfig::default())
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn handle(strategy: Strategy, purpose: CachePurpose) -> Route {
        Route::Handle { strategy, purpose }
    }

    #[test]
    fn test_non_get_bypasses() {
        let request = get("https://chat.example.com/api/messages").with_method(Method::POST);
        assert_eq!(router().classify(&request), Route::Bypass(Bypass::NonGet));
    }

    #[test]
    fn test_non_http_scheme_bypasses() {
        let request = get("chrome-extension://abcdef/content.js");
        assert_eq!(
            router().classify(&request),
            Route::Bypass(Bypass::UnsupportedScheme)
        );
    }

    #[test]
    fn test_dev_transport_bypasses() {
        let request = get("http://localhost:24678/__vite_ping");
        assert_eq!(router().classify(&request), Route::Bypass(Bypass::DevTransport));

        // Same host, different port is ordinary traffic.
        let request = get("http://localhost:3000/app.js");
        assert_eq!(
            router().classify(&request),
            handle(Strategy::NetworkFirst, CachePurpose::Dynamic)
        );
    }

    #[test]
    fn test_scripts_and_build_output() {
        let r = router();
        for url in [
            "https://chat.example.com/main.JS",
            "https://chat.example.com/theme.css",
            "https://chat.example.com/static/media/font.woff2",
        ] {
            assert_eq!(
                r.classify(&get(url)),
                handle(Strategy::NetworkFirst, CachePurpose::Dynamic),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_icons_and_manifest_are_cache_first() {
        let r = router();
        assert_eq!(
            r.classify(&get("https://chat.example.com/icons/icon-192x192.png")),
            handle(Strategy::CacheFirst, CachePurpose::Static)
        );
        assert_eq!(
            r.classify(&get("https://chat.example.com/manifest.json")),
            handle(Strategy::CacheFirst, CachePurpose::Static)
        );
    }

    #[test]
    fn test_images() {
        let r = router();
        assert_eq!(
            r.classify(&get("https://cdn.example.com/avatars/alice.webp")),
            handle(Strategy::StaleWhileRevalidate, CachePurpose::Image)
        );

        let by_destination =
            get("https://cdn.example.com/avatar?u=alice").with_destination(Destination::Image);
        assert_eq!(
            r.classify(&by_destination),
            handle(Strategy::StaleWhileRevalidate, CachePurpose::Image)
        );
    }

    #[test]
    fn test_api_prefix_and_backend_hosts() {
        let r = router();
        assert_eq!(
            r.classify(&get("https://chat.example.com/api/chats")),
            handle(Strategy::NetworkFirst, CachePurpose::Api)
        );
        assert_eq!(
            r.classify(&get("https://echochat-default-rtdb.firebaseio.com/chats.json")),
            handle(Strategy::NetworkFirst, CachePurpose::Api)
        );
        // Suffix match respects label boundaries.
        assert_eq!(
            r.classify(&get("https://notfirebaseio.com/chats")),
            handle(Strategy::NetworkFirst, CachePurpose::Dynamic)
        );
    }

    #[test]
    fn test_navigation_and_default() {
        let r = router();
        let nav = Request::navigate(Url::parse("https://chat.example.com/chat/42").unwrap());
        assert_eq!(
            r.classify(&nav),
            handle(Strategy::NetworkFirst, CachePurpose::Dynamic)
        );

        let other = get("https://chat.example.com/robots.txt").with_mode(RequestMode::NoCors);
        assert_eq!(
            r.classify(&other),
            handle(Strategy::NetworkFirst, CachePurpose::Dynamic)
        );
    }

    #[test]
    fn test_rule_order_first_match_wins() {
        let r = router();
        // Script under an icon prefix: rule 2 precedes rule 3.
        assert_eq!(
            r.classify(&get("https://chat.example.com/icons/loader.js")),
            handle(Strategy::NetworkFirst, CachePurpose::Dynamic)
        );
        // Image under the API prefix: rule 4 precedes rule 5.
        assert_eq!(
            r.classify(&get("https://chat.example.com/api/avatar.png")),
            handle(Strategy::StaleWhileRevalidate, CachePurpose::Image)
        );
        let names: Vec<_> = r.rules().iter().map(|rule| rule.name).collect();
        assert_eq!(names.last(), Some(&"default"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let r = router();
        let request = get("https://chat.example.com/api/users/1");
        assert_eq!(r.classify(&request), r.classify(&request));
    }
}
