//! Push notifications.
//!
//! Parsing never fails: a structured payload is read field by field, plain
//! text becomes the body, and anything else yields the configured defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};
use url::Url;

use crate::clients::{Client, ClientHost};
use crate::config::NotificationConfig;
use crate::error::AgentResult;

pub const ACTION_OPEN: &str = "open";
pub const ACTION_DISMISS: &str = "dismiss";

/// Button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A displayable notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
    pub data: JsonValue,
    pub actions: Vec<NotificationAction>,
}

impl NotificationOptions {
    /// `data.url`, when the payload carried one.
    pub fn target_url(&self) -> Option<&str> {
        self.data.get("url").and_then(JsonValue::as_str)
    }
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Dismissed,
    /// An existing window was focused.
    Focused(String),
    /// A new window was opened.
    Opened(String),
}

/// Turns push payloads into notifications.
#[derive(Debug, Clone)]
pub struct NotificationPipeline {
    defaults: NotificationConfig,
}

impl NotificationPipeline {
    pub fn new(defaults: NotificationConfig) -> Self {
        Self { defaults }
    }

    /// Build a notification from an optional raw payload.
    pub fn parse(&self, payload: Option<&[u8]>) -> NotificationOptions {
        let Some(bytes) = payload else {
            return self.build(&Map::new(), None);
        };

        match serde_json::from_slice::<JsonValue>(bytes) {
            Ok(JsonValue::Object(object)) => self.build(&object, None),
            Ok(JsonValue::String(text)) => self.build(&Map::new(), non_empty(&text)),
            Ok(JsonValue::Null) => self.build(&Map::new(), None),
            Ok(other) => {
                debug!(payload = %other, "Push payload is not an object, using defaults");
                self.build(&Map::new(), None)
            }
            Err(_) => {
                let text = std::str::from_utf8(bytes).ok();
                self.build(&Map::new(), text.and_then(non_empty))
            }
        }
    }

    fn build(&self, object: &Map<String, JsonValue>, text_body: Option<&str>) -> NotificationOptions {
        let nested = object.get("notification").and_then(JsonValue::as_object);
        let field = |name: &str| -> Option<String> {
            nested
                .and_then(|n| n.get(name))
                .or_else(|| object.get(name))
                .and_then(JsonValue::as_str)
                .and_then(non_empty)
                .map(str::to_string)
        };

        NotificationOptions {
            title: field("title").unwrap_or_else(|| self.defaults.default_title.clone()),
            body: field("body")
                .or_else(|| text_body.map(str::to_string))
                .unwrap_or_else(|| self.defaults.default_body.clone()),
            icon: field("icon").unwrap_or_else(|| self.defaults.icon.clone()),
            badge: field("badge").unwrap_or_else(|| self.defaults.badge.clone()),
            tag: field("tag").unwrap_or_else(|| self.defaults.tag.clone()),
            require_interaction: object
                .get("requireInteraction")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            data: object
                .get("data")
                .filter(|d| d.is_object())
                .cloned()
                .unwrap_or_else(|| JsonValue::Object(Map::new())),
            actions: vec![
                NotificationAction {
                    action: ACTION_OPEN.to_string(),
                    title: "Open".to_string(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
        }
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Whether a window shows the application root.
fn shows_root(client: &Client, root: &Url) -> bool {
    client.url.origin() == root.origin() && client.url.path() == root.path()
}

/// Handle a click on a notification.
///
/// "dismiss" and unknown actions do nothing further. "open" and the body
/// click focus a window already showing the root, or open a new one at the
/// notification's `data.url` (falling back to the root).
pub fn route_click(
    clients: &dyn ClientHost,
    root: &Url,
    action: Option<&str>,
    notification: &NotificationOptions,
) -> AgentResult<ClickOutcome> {
    match action {
        None | Some("") | Some(ACTION_OPEN) => {}
        Some(ACTION_DISMISS) => return Ok(ClickOutcome::Dismissed),
        Some(other) => {
            debug!(action = other, "Unknown notification action");
            return Ok(ClickOutcome::Dismissed);
        }
    }

    if let Some(client) = clients.match_all()?.into_iter().find(|c| shows_root(c, root)) {
        let focused = clients.focus(&client.id)?;
        return Ok(ClickOutcome::Focused(focused.id));
    }

    let target = match notification.target_url() {
        Some(url) => root.join(url).unwrap_or_else(|e| {
            warn!(url, error = %e, "Invalid notification URL, opening root");
            root.clone()
        }),
        None => root.clone(),
    };
    let opened = clients.open_window(&target)?;
    Ok(ClickOutcome::Opened(opened.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Clients;
    use serde_json::json;

    fn pipeline() -> NotificationPipeline {
        NotificationPipeline::new(NotificationConfig::default())
    }

    fn root() -> Url {
        Url::parse("https://chat.example.com/").unwrap()
    }

    #[test]
    fn test_nested_notification_payload() {
        let payload = br#"{"notification":{"title":"Alice","body":"Hi!"}}"#;
        let n = pipeline().parse(Some(&payload[..]));

        assert_eq!(n.title, "Alice");
        assert_eq!(n.body, "Hi!");
        assert_eq!(n.tag, "echochat-message");
        assert_eq!(n.actions.len(), 2);
        assert_eq!(n.actions[0].action, "open");
        assert_eq!(n.actions[1].action, "dismiss");
    }

    #[test]
    fn test_top_level_fields_and_data() {
        let payload = json!({
            "title": "Bob",
            "body": "Are you there?",
            "tag": "chat-7",
            "requireInteraction": true,
            "data": { "url": "/chat/7" }
        })
        .to_string();
        let n = pipeline().parse(Some(payload.as_bytes()));

        assert_eq!(n.title, "Bob");
        assert_eq!(n.tag, "chat-7");
        assert!(n.require_interaction);
        assert_eq!(n.target_url(), Some("/chat/7"));
    }

    #[test]
    fn test_nested_fields_take_precedence() {
        let payload = json!({ "title": "outer", "notification": { "title": "inner" } }).to_string();
        let n = pipeline().parse(Some(payload.as_bytes()));
        assert_eq!(n.title, "inner");
        assert_eq!(n.body, "You have a new message");
    }

    #[test]
    fn test_absent_and_null_payloads_use_defaults() {
        for payload in [None, Some(&b"null"[..]), Some(&b""[..]), Some(&b"[1,2]"[..])] {
            let n = pipeline().parse(payload);
            assert_eq!(n.title, "EchoChat");
            assert_eq!(n.body, "You have a new message");
            assert_eq!(n.actions.len(), 2);
        }
    }

    #[test]
    fn test_empty_fields_fall_back_to_defaults() {
        let payload = json!({ "title": "", "body": "  ", "tag": "chat-3" }).to_string();
        let n = pipeline().parse(Some(payload.as_bytes()));

        assert_eq!(n.title, "EchoChat");
        assert_eq!(n.body, "You have a new message");
        assert_eq!(n.tag, "chat-3");
    }

    #[test]
    fn test_plain_text_payload_is_body() {
        let n = pipeline().parse(Some(&b"New message from Carol"[..]));
        assert_eq!(n.title, "EchoChat");
        assert_eq!(n.body, "New message from Carol");

        let n = pipeline().parse(Some(&br#""quoted text""#[..]));
        assert_eq!(n.body, "quoted text");
    }

    #[test]
    fn test_invalid_utf8_uses_defaults() {
        let n = pipeline().parse(Some(&[0xff_u8, 0xfe, 0xfd][..]));
        assert_eq!(n.body, "You have a new message");
    }

    #[test]
    fn test_dismiss_and_unknown_actions() {
        let (clients, _rx) = Clients::new();
        let n = pipeline().parse(None);

        assert_eq!(
            route_click(&clients, &root(), Some("dismiss"), &n).unwrap(),
            ClickOutcome::Dismissed
        );
        assert_eq!(
            route_click(&clients, &root(), Some("archive"), &n).unwrap(),
            ClickOutcome::Dismissed
        );
        assert!(clients.match_all().unwrap().is_empty());
    }

    #[test]
    fn test_open_focuses_existing_root_window() {
        let (clients, _rx) = Clients::new();
        clients.add(Url::parse("https://chat.example.com/settings").unwrap()).unwrap();
        let home = clients.add(root()).unwrap();

        let outcome = route_click(&clients, &root(), Some("open"), &pipeline().parse(None)).unwrap();
        assert_eq!(outcome, ClickOutcome::Focused(home.id.clone()));
        assert!(clients.get(&home.id).unwrap().focused);
    }

    #[test]
    fn test_default_click_opens_data_url() {
        let (clients, _rx) = Clients::new();
        let payload = json!({ "data": { "url": "/chat/9" } }).to_string();
        let n = pipeline().parse(Some(payload.as_bytes()));

        let ClickOutcome::Opened(id) = route_click(&clients, &root(), None, &n).unwrap() else {
            panic!("expected a new window");
        };
        assert_eq!(
            clients.get(&id).unwrap().url.as_str(),
            "https://chat.example.com/chat/9"
        );
    }

    #[test]
    fn test_open_without_data_opens_root() {
        let (clients, _rx) = Clients::new();
        let ClickOutcome::Opened(id) =
            route_click(&clients, &root(), Some("open"), &pipeline().parse(None)).unwrap()
        else {
            panic!("expected a new window");
        };
        assert_eq!(clients.get(&id).unwrap().url, root());
    }
}
