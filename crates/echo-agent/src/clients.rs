//! Open application windows.
//!
//! The agent does not own its clients; it queries them on demand through
//! [`ClientHost`]. [`Clients`] is an in-memory registry that reports
//! everything the agent does to its windows on an event channel.

use std::sync::RwLock;

use hashbrown::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::control::AgentMessage;
use crate::error::{AgentError, AgentResult};

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub focused: bool,
    /// Version of the agent controlling this window, if any.
    pub controller: Option<String>,
}

/// Why taking control of open windows was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// Another agent instance holds control; an expected race.
    #[error("Clients already controlled by {0}")]
    AlreadyControlled(String),

    #[error("Claim rejected: {0}")]
    Rejected(String),
}

/// Activity reported by [`Clients`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message {
        client_id: String,
        message: AgentMessage,
    },
    Focused {
        client_id: String,
    },
    Opened {
        client_id: String,
        url: Url,
    },
    Claimed {
        controller: String,
        count: usize,
    },
}

/// Access to the host's open windows.
pub trait ClientHost: Send + Sync {
    /// Every open window.
    fn match_all(&self) -> AgentResult<Vec<Client>>;

    /// Focus a window.
    fn focus(&self, id: &str) -> AgentResult<Client>;

    /// Open a new window at `url`.
    fn open_window(&self, url: &Url) -> AgentResult<Client>;

    /// Deliver a notice to one window.
    fn post_message(&self, id: &str, message: &AgentMessage) -> AgentResult<()>;

    /// Take control of every open window.
    fn claim(&self, controller: &str) -> Result<(), ClaimError>;
}

/// Post a notice to every open window. Returns how many received it.
pub fn broadcast(host: &dyn ClientHost, message: &AgentMessage) -> usize {
    let clients = match host.match_all() {
        Ok(clients) => clients,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate clients for broadcast");
            return 0;
        }
    };

    clients
        .iter()
        .filter(|client| match host.post_message(&client.id, message) {
            Ok(()) => true,
            Err(e) => {
                warn!(client = %client.id, error = %e, "Failed to post message");
                false
            }
        })
        .count()
}

/// In-memory client registry.
#[derive(Debug)]
pub struct Clients {
    clients: RwLock<HashMap<String, Client>>,
    /// Controller holding exclusive control, if pinned by the host.
    held_by: RwLock<Option<String>>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
}

impl Clients {
    /// Create a new registry and the receiver for its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                clients: RwLock::new(HashMap::new()),
                held_by: RwLock::new(None),
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }

    /// Register a window the host opened on its own.
    pub fn add(&self, url: Url) -> AgentResult<Client> {
        let client = Client {
            id: echo_common::unique_id("client"),
            url,
            focused: false,
            controller: None,
        };
        let mut clients = self
            .clients
            .write()
            .map_err(|_| AgentError::client("client registry poisoned"))?;
        clients.insert(client.id.clone(), client.clone());
        Ok(client)
    }

    /// Remove a closed window.
    pub fn remove(&self, id: &str) -> AgentResult<Option<Client>> {
        let mut clients = self
            .clients
            .write()
            .map_err(|_| AgentError::client("client registry poisoned"))?;
        Ok(clients.remove(id))
    }

    pub fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().ok()?.get(id).cloned()
    }

    /// Pin control to `controller`; claims by anyone else are refused.
    pub fn hold_control(&self, controller: impl Into<String>) {
        if let Ok(mut held) = self.held_by.write() {
            *held = Some(controller.into());
        }
    }

    pub fn release_control(&self) {
        if let Ok(mut held) = self.held_by.write() {
            *held = None;
        }
    }
}

impl ClientHost for Clients {
    fn match_all(&self) -> AgentResult<Vec<Client>> {
        let clients = self
            .clients
            .read()
            .map_err(|_| AgentError::client("client registry poisoned"))?;
        let mut all: Vec<Client> = clients.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn focus(&self, id: &str) -> AgentResult<Client> {
        let mut clients = self
            .clients
            .write()
            .map_err(|_| AgentError::client("client registry poisoned"))?;

        if !clients.contains_key(id) {
            return Err(AgentError::client(format!("no such client: {}", id)));
        }
        for client in clients.values_mut() {
            client.focused = client.id == id;
        }
        let focused = clients
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::client(format!("no such client: {}", id)))?;
        drop(clients);

        self.emit(ClientEvent::Focused {
            client_id: id.to_string(),
        });
        Ok(focused)
    }

    fn open_window(&self, url: &Url) -> AgentResult<Client> {
        let client = self.add(url.clone())?;
        let client = self.focus(&client.id)?;
        self.emit(ClientEvent::Opened {
            client_id: client.id.clone(),
            url: url.clone(),
        });
        Ok(client)
    }

    fn post_message(&self, id: &str, message: &AgentMessage) -> AgentResult<()> {
        if self.get(id).is_none() {
            return Err(AgentError::client(format!("no such client: {}", id)));
        }
        debug!(client = id, message = ?message, "Posting message to client");
        self.emit(ClientEvent::Message {
            client_id: id.to_string(),
            message: message.clone(),
        });
        Ok(())
    }

    fn claim(&self, controller: &str) -> Result<(), ClaimError> {
        let held = self
            .held_by
            .read()
            .map_err(|_| ClaimError::Rejected("client registry poisoned".to_string()))?
            .clone();
        if let Some(holder) = held {
            if holder != controller {
                return Err(ClaimError::AlreadyControlled(holder));
            }
        }

        let mut clients = self
            .clients
            .write()
            .map_err(|_| ClaimError::Rejected("client registry poisoned".to_string()))?;
        for client in clients.values_mut() {
            client.controller = Some(controller.to_string());
        }
        let count = clients.len();
        drop(clients);

        self.emit(ClientEvent::Claimed {
            controller: controller.to_string(),
            count,
        });
        Ok(())
    }
}
