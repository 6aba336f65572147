//! # Echo Agent
//!
//! Network-interception edge agent for the EchoChat client. It sits between
//! the application's pages and the network, answers requests from versioned
//! cache containers when it makes sense, queues outbound messages while
//! offline, and turns push payloads into notifications.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Host runtime                      │
//! │      install / activate / fetch / push / sync / message │
//! └──────────────────────────┬──────────────────────────────┘
//!                            │ AgentEvent
//! ┌──────────────────────────▼──────────────────────────────┐
//! │  Registration ── waiting / active EdgeAgent versions    │
//! │                                                         │
//! │  EdgeAgent                                              │
//! │   ├── HandlerTable      (EventKind → handler)           │
//! │   ├── LifecycleController                               │
//! │   ├── StrategyRouter ──► FetchExecutor ──► CacheStore    │
//! │   ├── SyncCoordinator ──────────────────► Outbox         │
//! │   ├── NotificationPipeline                              │
//! │   └── ClientHost        (open pages)                    │
//! └──────────────────────────┬──────────────────────────────┘
//!                            │ Network
//!                       backend / CDN
//! ```
//!
//! The agent never fails a page's request: strategy errors become a cached
//! fallback or a plain-text `503 Offline`.

pub mod agent;
pub mod clients;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod notification;
pub mod router;
pub mod sync;

pub use agent::EdgeAgent;
pub use clients::{broadcast, ClaimError, Client, ClientEvent, ClientHost, Clients};
pub use config::{AgentConfig, NotificationConfig, RouteConfig, StorageConfig, SyncConfig};
pub use control::{
    acknowledge, reply_channel, AgentMessage, ControlMessage, ControlReply, ReplyPort,
};
pub use error::{AgentError, AgentResult};
pub use events::{AgentEvent, EventKind, EventOutcome, Handler, HandlerTable};
pub use executor::{is_cacheable, FetchExecutor};
pub use lifecycle::{LifecycleController, LifecycleState, Registration, UpdateOutcome};
pub use notification::{
    route_click, ClickOutcome, NotificationAction, NotificationOptions, NotificationPipeline,
};
pub use router::{Bypass, Matcher, Route, RouteRule, Strategy, StrategyRouter};
pub use sync::{DrainReport, SendOutcome, SyncCoordinator};

pub use echo_cache::{CachePurpose, CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use echo_net::{HttpNetwork, Network, NetworkConfig, Request, Response};
pub use echo_outbox::{MemoryOutbox, Outbox, SqliteOutbox};
