//! # Echo Outbox
//!
//! Durable, transactional queue of outbound chat messages created while the
//! backend was unreachable.
//!
//! A record exists if and only if its delivery has not been acknowledged.
//! Records are never updated in place: a drain either deletes a record or
//! leaves it for the next attempt.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryOutbox;
pub use sqlite::SqliteOutbox;

/// Outbox errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutboxError {
    #[error("Record already queued: {0}")]
    Duplicate(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Outbox lock poisoned")]
    Poisoned,
}

/// A queued message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecord {
    pub id: String,
    /// Application-level message body, posted verbatim to the backend.
    pub payload: JsonValue,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl OutboxRecord {
    /// Wrap a payload for queueing. The payload's own `id` is reused when it
    /// carries a string one, so retries of the same message collapse.
    pub fn new(payload: JsonValue) -> Self {
        let id = payload
            .get("id")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| echo_common::unique_id("msg"));

        Self {
            id,
            payload,
            created_at: echo_common::now_millis(),
        }
    }

    /// The chat this message belongs to, when the payload names one.
    pub fn chat_id(&self) -> Option<&str> {
        self.payload
            .get("chatId")
            .or_else(|| self.payload.get("chat_id"))
            .and_then(JsonValue::as_str)
    }
}

/// A persistent store of [`OutboxRecord`]s keyed by id.
pub trait Outbox: Send + Sync {
    /// Append a record. Fails with [`OutboxError::Duplicate`] if the id is
    /// already queued.
    fn add(&self, record: &OutboxRecord) -> Result<(), OutboxError>;

    /// Every queued record, in insertion order.
    fn list(&self) -> Result<Vec<OutboxRecord>, OutboxError>;

    /// Remove a record after confirmed delivery.
    fn delete(&self, id: &str) -> Result<bool, OutboxError>;

    fn len(&self) -> Result<usize, OutboxError> {
        Ok(self.list()?.len())
    }

    fn is_empty(&self) -> Result<bool, OutboxError> {
        Ok(self.len()? == 0)
    }
}
