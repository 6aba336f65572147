//! reqwest-backed [`Network`] implementation.

use std::time::Duration;

use hashbrown::HashMap;
use reqwest::Client;
use tracing::{debug, trace};
use url::{Origin, Url};

use crate::{NetError, Network, Request, Response, ResponseType};

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("EchoChatEdge/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Network access over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Origin,
}

impl HttpNetwork {
    /// Create a network for the application served at `scope`. Responses
    /// from the scope's origin are `Basic`, everything else is `Cors`.
    pub fn for_scope(scope: &Url, config: NetworkConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            origin: scope.origin(),
        })
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    fn response_type(&self, url: &Url) -> ResponseType {
        if url.origin() == self.origin {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }
}

fn map_reqwest_error(error: reqwest::Error) -> NetError {
    if error.is_timeout() {
        NetError::Timeout
    } else if error.is_connect() {
        NetError::Offline
    } else {
        NetError::RequestFailed(error.to_string())
    }
}

impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching from network");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        let url = response.url().clone();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(map_reqwest_error)?;

        trace!(url = %url, status = %status, body_len = body.len(), "Response received");

        Ok(Response {
            response_type: self.response_type(&url),
            url,
            status,
            headers,
            body,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_same_origin_is_basic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html></html>"),
            )
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let network = HttpNetwork::for_scope(&base, NetworkConfig::default()).unwrap();

        let response = network
            .fetch(&Request::get(base.join("/index.html").unwrap()))
            .await
            .unwrap();

        assert!(response.ok());
        assert_eq!(response.response_type, ResponseType::Basic);
        assert_eq!(response.text(), "<html></html>");
        assert_eq!(response.header_value("content-type"), Some("text/html"));
    }

    #[tokio::test]
    async fn test_cross_origin_is_cors_with_default_config() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let scope = Url::parse("https://chat.example.com/").unwrap();
        let network = HttpNetwork::for_scope(&scope, NetworkConfig::default()).unwrap();

        let target = Url::parse(&server.uri()).unwrap().join("/api/users").unwrap();
        let response = network.fetch(&Request::get(target)).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Cors);
    }

    #[test]
    fn test_origin_ignores_path_and_port_defaults() {
        let scope = Url::parse("https://chat.example.com/app/").unwrap();
        let network = HttpNetwork::for_scope(&scope, NetworkConfig::default()).unwrap();

        let same = Url::parse("https://chat.example.com:443/avatars/a.png").unwrap();
        let other = Url::parse("https://cdn.example.com/avatars/a.png").unwrap();
        assert_eq!(network.response_type(&same), ResponseType::Basic);
        assert_eq!(network.response_type(&other), ResponseType::Cors);
    }

    #[tokio::test]
    async fn test_post_json_and_error_status() {
        let server = MockServer::start().await;
        let payload = serde_json::json!({ "chatId": "c1", "text": "hello" });
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(body_json(&payload))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let network = HttpNetwork::for_scope(&base, NetworkConfig::default()).unwrap();
        let target = base.join("/messages").unwrap();
        let request = Request::post_json(target, &payload).unwrap();
        assert_eq!(request.method, Method::POST);

        let response = network.fetch(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_error() {
        let scope = Url::parse("http://127.0.0.1:9/").unwrap();
        let network = HttpNetwork::for_scope(
            &scope,
            NetworkConfig {
                timeout: Duration::from_secs(2),
                ..Default::default()
            },
        )
        .unwrap();

        // Port 9 (discard) on loopback is not expected to accept connections.
        let result = network
            .fetch(&Request::get(Url::parse("http://127.0.0.1:9/").unwrap()))
            .await;
        assert!(result.is_err());
    }
}
