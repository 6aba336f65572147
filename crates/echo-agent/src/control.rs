//! Control channel wire format.
//!
//! Pages send `{ type, urls? }` messages to the agent; the agent broadcasts
//! `{ type }` notices back. A message that arrives with a reply port is
//! acknowledged with `{ success: true }` whatever it asked for.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tracing::debug;

/// Page → agent commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a newly installed version without waiting for pages to close.
    SkipWaiting,
    /// Add URLs to the dynamic container.
    CacheUrls {
        #[serde(default)]
        urls: Option<Vec<String>>,
    },
    /// Delete every container regardless of version.
    ClearCache,
    /// Agent → page only; accepted and ignored when a page echoes it.
    UpdateAvailable,
}

impl ControlMessage {
    /// Decode a message. Unknown or malformed messages return `None`.
    pub fn parse(data: &JsonValue) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }
}

/// Agent → page notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    /// A forced activation happened; pages should reload.
    UpdateAvailable,
    /// Periodic maintenance: pages should re-synchronize message history.
    SyncMessages,
}

/// Acknowledgement sent on a reply port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub success: bool,
}

impl ControlReply {
    pub fn ack() -> Self {
        Self { success: true }
    }
}

/// Sending half of a reply channel.
pub type ReplyPort = oneshot::Sender<ControlReply>;

/// Create a reply channel for a control message.
pub fn reply_channel() -> (ReplyPort, oneshot::Receiver<ControlReply>) {
    oneshot::channel()
}

/// Acknowledge a message if the sender asked for a reply.
pub fn acknowledge(reply: Option<ReplyPort>) {
    if let Some(port) = reply {
        if port.send(ControlReply::ack()).is_err() {
            debug!("Reply port closed before acknowledgement");
        }
    }
}
