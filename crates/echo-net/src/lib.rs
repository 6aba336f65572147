//! # Echo Net
//!
//! Request/response model and network access for the EchoChat edge agent.
//!
//! ## Design Goals
//!
//! 1. **Host-neutral requests**: a request carries what the agent needs to
//!    route it (method, URL, destination, mode) and nothing browser-specific
//! 2. **Owned responses**: responses are fully buffered so they can be
//!    snapshotted into a cache container and cloned back out
//! 3. **Swappable transport**: everything above this crate talks to the
//!    [`Network`] trait; [`HttpNetwork`] is the reqwest-backed implementation

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod client;

pub use client::{HttpNetwork, NetworkConfig};

/// Errors that can occur while talking to the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network unreachable")]
    Offline,

    #[error("Body error: {0}")]
    Body(String),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What the requesting page intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    #[default]
    Empty,
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
}

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level navigation.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// Response tainting, as seen by the requesting page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response readable through CORS.
    Cors,
    /// Cross-origin response whose status and body are hidden.
    Opaque,
    /// Network error placeholder.
    Error,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub destination: Destination,
    pub mode: RequestMode,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HashMap::new(),
            body: None,
            destination: Destination::Empty,
            mode: RequestMode::Cors,
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a POST request with a JSON body.
    pub fn post_json<T: Serialize + ?Sized>(url: Url, body: &T) -> Result<Self, NetError> {
        let body = serde_json::to_vec(body).map_err(|e| NetError::Body(e.to_string()))?;
        let mut request = Self::get(url);
        request.method = Method::POST;
        request
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        request.body = Some(Bytes::from(body));
        Ok(request)
    }

    /// Set the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the destination.
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the mode.
    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub response_type: ResponseType,
    /// Served from a cache container rather than the network.
    pub from_cache: bool,
}

impl Response {
    /// Create a basic response with the given status and body.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HashMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            from_cache: false,
        }
    }

    /// The synthetic plain-text response served when neither the network
    /// nor any cache container can answer.
    pub fn offline(url: Url) -> Self {
        Self::new(url, StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"Offline"))
            .with_header("content-type", "text/plain")
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Canonical reason phrase for the status.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::Body(e.to_string()))
    }
}

/// Transport used by the agent for every outbound call.
pub trait Network: Send + Sync + 'static {
    /// Perform the request. An HTTP error status is a successful fetch;
    /// only transport failures are errors.
    fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, NetError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_request_builder() {
        let request = Request::get(url("https://example.com/app.js"))
            .with_destination(Destination::Script)
            .header("Accept", "*/*");

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.destination, Destination::Script);
        assert_eq!(request.headers.get("accept").map(String::as_str), Some("*/*"));
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_navigation_request() {
        let request = Request::navigate(url("https://example.com/chat"));
        assert!(request.is_navigation());
        assert_eq!(request.destination, Destination::Document);
    }

    #[test]
    fn test_post_json_sets_body() {
        let payload = serde_json::json!({ "chatId": "c1", "text": "hi" });
        let request = Request::post_json(url("https://example.com/messages"), &payload).unwrap();

        assert_eq!(request.method, Method::POST);
        let body: serde_json::Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, payload);
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_offline_response() {
        let response = Response::offline(url("https://example.com/"));
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text(), "Offline");
        assert_eq!(response.header_value("Content-Type"), Some("text/plain"));
        assert!(!response.ok());
    }
}
