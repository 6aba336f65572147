//! Host events and the handler table.
//!
//! A host runtime turns whatever it observes (an install, an intercepted
//! request, a push) into an [`AgentEvent`] and hands it to
//! [`EdgeAgent::dispatch`](crate::EdgeAgent::dispatch). Each [`EventKind`]
//! has exactly one handler; registering a new one replaces the old.

use std::fmt;

use echo_net::{Network, Request, Response};
use futures::future::BoxFuture;
use hashbrown::HashMap;
use serde_json::Value as JsonValue;

use crate::agent::EdgeAgent;
use crate::control::ReplyPort;
use crate::error::AgentError;
use crate::notification::{ClickOutcome, NotificationOptions};
use crate::sync::DrainReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    Sync,
    PeriodicSync,
    Message,
    NotificationClick,
    NotificationClose,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Install,
        EventKind::Activate,
        EventKind::Fetch,
        EventKind::Push,
        EventKind::Sync,
        EventKind::PeriodicSync,
        EventKind::Message,
        EventKind::NotificationClick,
        EventKind::NotificationClose,
    ];
}

/// An event delivered by the host.
#[derive(Debug)]
pub enum AgentEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(Option<Vec<u8>>),
    Sync {
        tag: String,
    },
    PeriodicSync {
        tag: String,
    },
    Message {
        data: JsonValue,
        reply: Option<ReplyPort>,
    },
    NotificationClick {
        action: Option<String>,
        notification: NotificationOptions,
    },
    NotificationClose {
        notification: NotificationOptions,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::Install => EventKind::Install,
            AgentEvent::Activate => EventKind::Activate,
            AgentEvent::Fetch(_) => EventKind::Fetch,
            AgentEvent::Push(_) => EventKind::Push,
            AgentEvent::Sync { .. } => EventKind::Sync,
            AgentEvent::PeriodicSync { .. } => EventKind::PeriodicSync,
            AgentEvent::Message { .. } => EventKind::Message,
            AgentEvent::NotificationClick { .. } => EventKind::NotificationClick,
            AgentEvent::NotificationClose { .. } => EventKind::NotificationClose,
        }
    }
}

/// What handling an event produced.
#[derive(Debug)]
pub enum EventOutcome {
    Done,
    Respond(Response),
    /// The host should perform the request itself.
    Passthrough,
    Show(NotificationOptions),
    Drained(DrainReport),
    /// Number of windows that received a notice.
    Broadcast(usize),
    Click(ClickOutcome),
    /// The event was not meant for this agent (e.g. an unknown sync tag).
    Ignored,
    Failed(AgentError),
}

impl EventOutcome {
    fn from_result<T>(result: Result<T, AgentError>, map: impl FnOnce(T) -> Self) -> Self {
        match result {
            Ok(value) => map(value),
            Err(e) => EventOutcome::Failed(e),
        }
    }
}

/// Event handler.
pub type Handler<N> = for<'a> fn(&'a EdgeAgent<N>, AgentEvent) -> BoxFuture<'a, EventOutcome>;

/// One handler per event kind.
pub struct HandlerTable<N: Network> {
    handlers: HashMap<EventKind, Handler<N>>,
}

impl<N: Network> fmt::Debug for HandlerTable<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort_by_key(|k| format!("{:?}", k));
        f.debug_struct("HandlerTable").field("kinds", &kinds).finish()
    }
}

impl<N: Network> Default for HandlerTable<N> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<N: Network> HandlerTable<N> {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Table with the agent's built-in handler for every kind.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table.register(EventKind::Install, on_install::<N>);
        table.register(EventKind::Activate, on_activate::<N>);
        table.register(EventKind::Fetch, on_fetch::<N>);
        table.register(EventKind::Push, on_push::<N>);
        table.register(EventKind::Sync, on_sync::<N>);
        table.register(EventKind::PeriodicSync, on_periodic_sync::<N>);
        table.register(EventKind::Message, on_message::<N>);
        table.register(EventKind::NotificationClick, on_notification_click::<N>);
        table.register(EventKind::NotificationClose, on_notification_close::<N>);
        table
    }

    /// Install a handler, returning the one it replaced.
    pub fn register(&mut self, kind: EventKind, handler: Handler<N>) -> Option<Handler<N>> {
        self.handlers.insert(kind, handler)
    }

    pub fn get(&self, kind: EventKind) -> Option<Handler<N>> {
        self.handlers.get(&kind).copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn on_install<N: Network>(agent: &EdgeAgent<N>, _event: AgentEvent) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move { EventOutcome::from_result(agent.install().await, |_| EventOutcome::Done) })
}

fn on_activate<N: Network>(agent: &EdgeAgent<N>, _event: AgentEvent) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move { EventOutcome::from_result(agent.activate(), |_| EventOutcome::Done) })
}

fn on_fetch<N: Network>(agent: &EdgeAgent<N>, event: AgentEvent) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move {
        let AgentEvent::Fetch(request) = event else {
            return EventOutcome::Ignored;
        };
        match agent.handle_fetch(request).await {
            Some(response) => EventOutcome::Respond(response),
            None => EventOutcome::Passthrough,
        }
    })
}

fn on_push<N: Network>(agent: &EdgeAgent<N>, event: AgentEvent) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move {
        let AgentEvent::Push(payload) = event else {
            return EventOutcome::Ignored;
        };
        EventOutcome::Show(agent.handle_push(payload.as_deref()))
    })
}

fn on_sync<N: Network>(agent: &EdgeAgent<N>, event: AgentEvent) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move {
        let AgentEvent::Sync { tag } = event else {
            return EventOutcome::Ignored;
        };
        match agent.handle_sync(&tag).await {
            Ok(Some(report)) => EventOutcome::Drained(report),
            Ok(None) => EventOutcome::Ignored,
            Err(e) => EventOutcome::Failed(e),
        }
    })
}

fn on_periodic_sync<N: Network>(
    agent: &EdgeAgent<N>,
    event: AgentEvent,
) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move {
        let AgentEvent::PeriodicSync { tag } = event else {
            return EventOutcome::Ignored;
        };
        match agent.handle_periodic_sync(&tag) {
            Some(count) => EventOutcome::Broadcast(count),
            None => EventOutcome::Ignored,
        }
    })
}

fn on_message<N: Network>(agent: &EdgeAgent<N>, event: AgentEvent) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move {
        let AgentEvent::Message { data, reply } = event else {
            return EventOutcome::Ignored;
        };
        agent.handle_message(data, reply).await;
        EventOutcome::Done
    })
}

fn on_notification_click<N: Network>(
    agent: &EdgeAgent<N>,
    event: AgentEvent,
) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move {
        let AgentEvent::NotificationClick {
            action,
            notification,
        } = event
        else {
            return EventOutcome::Ignored;
        };
        EventOutcome::from_result(
            agent.handle_notification_click(action.as_deref(), &notification),
            EventOutcome::Click,
        )
    })
}

fn on_notification_close<N: Network>(
    agent: &EdgeAgent<N>,
    event: AgentEvent,
) -> BoxFuture<'_, EventOutcome> {
    Box::pin(async move {
        let AgentEvent::NotificationClose { notification } = event else {
            return EventOutcome::Ignored;
        };
        agent.handle_notification_close(&notification);
        EventOutcome::Done
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_test::ScriptedNetwork;

    fn noop(_agent: &EdgeAgent<ScriptedNetwork>, _event: AgentEvent) -> BoxFuture<'_, EventOutcome> {
        Box::pin(async { EventOutcome::Ignored })
    }

    #[test]
    fn test_defaults_cover_every_kind() {
        let table = HandlerTable::<ScriptedNetwork>::with_defaults();
        assert_eq!(table.len(), EventKind::ALL.len());
        for kind in EventKind::ALL {
            assert!(table.get(kind).is_some(), "{:?}", kind);
        }
    }

    #[test]
    fn test_register_replaces_previous() {
        let mut table = HandlerTable::<ScriptedNetwork>::with_defaults();
        assert!(table.register(EventKind::Push, noop).is_some());
        assert_eq!(table.len(), EventKind::ALL.len());

        let mut empty = HandlerTable::<ScriptedNetwork>::empty();
        assert!(empty.is_empty());
        assert!(empty.register(EventKind::Push, noop).is_none());
        assert!(empty.get(EventKind::Sync).is_none());
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(AgentEvent::Push(None).kind(), EventKind::Push);
        assert_eq!(
            AgentEvent::PeriodicSync {
                tag: "sync-messages".to_string()
            }
            .kind(),
            EventKind::PeriodicSync
        );
    }
}
