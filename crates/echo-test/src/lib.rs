//! # Echo Test
//!
//! Test doubles for hosts and tests that drive the edge agent without a
//! real network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use echo_net::{NetError, Network, Request, Response};
use hashbrown::HashMap;
use http::{Method, StatusCode};
use serde_json::Value as JsonValue;
use url::Url;

/// A request as seen by [`ScriptedNetwork`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub body: Option<JsonValue>,
}

/// Network that answers from a table of canned responses.
///
/// Unknown URLs answer 404. While offline every call fails with
/// [`NetError::Offline`] but is still recorded.
#[derive(Debug)]
pub struct ScriptedNetwork {
    responses: Mutex<HashMap<String, Response>>,
    failing: Mutex<HashMap<String, NetError>>,
    online: AtomicBool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for ScriptedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn normalize(url: &str) -> String {
        match Url::parse(url) {
            Ok(mut parsed) => {
                parsed.set_fragment(None);
                parsed.into()
            }
            Err(_) => url.to_string(),
        }
    }

    /// Answer `url` with a 200 carrying `body`.
    pub fn respond(&self, url: &str, body: impl Into<String>) {
        self.respond_status(url, 200, body);
    }

    /// Answer `url` with the given status.
    pub fn respond_status(&self, url: &str, status: u16, body: impl Into<String>) {
        let Ok(parsed) = Url::parse(url) else {
            return;
        };
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.respond_with(url, Response::new(parsed, status, body.into()));
    }

    /// Answer `url` with a prepared response.
    pub fn respond_with(&self, url: &str, response: Response) {
        let key = Self::normalize(url);
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(&key);
        }
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(key, response);
        }
    }

    /// Make calls to `url` fail with a transport error.
    pub fn fail(&self, url: &str, error: NetError) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(Self::normalize(url), error);
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        let key = Self::normalize(url);
        self.calls().iter().filter(|c| c.url == key).count()
    }

    /// JSON bodies posted to `url`, in call order.
    pub fn posted_to(&self, url: &str) -> Vec<JsonValue> {
        let key = Self::normalize(url);
        self.calls()
            .into_iter()
            .filter(|c| c.method == Method::POST && c.url == key)
            .filter_map(|c| c.body)
            .collect()
    }
}

impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = Self::normalize(request.url.as_str());
        let body = request
            .body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok());

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                method: request.method.clone(),
                url: key.clone(),
                body,
            });
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }

        if let Some(error) = self.failing.lock().ok().and_then(|f| f.get(&key).cloned()) {
            return Err(error);
        }

        let scripted = self
            .responses
            .lock()
            .ok()
            .and_then(|r| r.get(&key).cloned());

        Ok(match scripted {
            Some(response) => Response {
                url: request.url.clone(),
                from_cache: false,
                ..response
            },
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND, "Not Found"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_url() -> Url {
        Url::parse("https://chat.example.com/api/chats").unwrap()
    }

    #[tokio::test]
    async fn test_scripted_and_unknown_urls() {
        let network = ScriptedNetwork::new();
        network.respond("https://chat.example.com/api/chats#top", "[]");

        let hit = network.fetch(&Request::get(chat_url())).await.unwrap();
        assert_eq!(hit.status, StatusCode::OK);
        assert_eq!(hit.text(), "[]");

        let miss = Request::get(Url::parse("https://chat.example.com/nope").unwrap());
        assert_eq!(network.fetch(&miss).await.unwrap().status, StatusCode::NOT_FOUND);
        assert_eq!(network.calls_to(chat_url().as_str()), 1);
    }

    #[tokio::test]
    async fn test_offline_calls_are_recorded() {
        let network = ScriptedNetwork::new();
        network.respond(chat_url().as_str(), "[]");
        network.set_online(false);

        let err = network.fetch(&Request::get(chat_url())).await.unwrap_err();
        assert!(matches!(err, NetError::Offline));
        assert_eq!(network.calls().len(), 1);
    }
}
