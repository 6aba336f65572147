//! Version lifecycle.
//!
//! An agent version moves `Installing → Installed → Activating → Active`.
//! There is no error state: a failed install stays in `Installing` and is
//! discarded by the [`Registration`], so the previously active version keeps
//! serving.

use std::sync::Arc;

use echo_net::{Network, Request, Response};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::agent::EdgeAgent;
use crate::control::{acknowledge, ReplyPort};
use crate::error::{AgentError, AgentResult};

/// Lifecycle state of one agent version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Installing,
    Installed,
    Activating,
    Active,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine for one agent version.
#[derive(Debug)]
pub struct LifecycleController {
    state: LifecycleState,
    skip_waiting: bool,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Installing,
            skip_waiting: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Start (or repeat) an install. Repeating an install that already
    /// completed is allowed; the pre-warm step is idempotent.
    pub fn begin_install(&mut self) -> AgentResult<()> {
        match self.state {
            LifecycleState::Installing | LifecycleState::Installed => {
                self.state = LifecycleState::Installing;
                Ok(())
            }
            other => Err(AgentError::invalid_state(format!(
                "cannot install while {}",
                other
            ))),
        }
    }

    pub fn finish_install(&mut self) -> AgentResult<()> {
        self.require(LifecycleState::Installing, "finish install")?;
        self.state = LifecycleState::Installed;
        Ok(())
    }

    /// Start activation. Returns whether the activation was forced by a
    /// skip-waiting request.
    pub fn begin_activate(&mut self) -> AgentResult<bool> {
        self.require(LifecycleState::Installed, "activate")?;
        self.state = LifecycleState::Activating;
        Ok(self.skip_waiting)
    }

    pub fn finish_activate(&mut self) -> AgentResult<()> {
        self.require(LifecycleState::Activating, "finish activation")?;
        self.state = LifecycleState::Active;
        Ok(())
    }

    /// Ask for activation without waiting for existing pages to close.
    pub fn request_skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    fn require(&self, state: LifecycleState, action: &str) -> AgentResult<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(AgentError::invalid_state(format!(
                "cannot {} while {}",
                action, self.state
            )))
        }
    }
}

/// What [`Registration::update`] did with a freshly installed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Activated,
    Waiting,
}

/// Tracks which agent version serves requests and which one waits.
pub struct Registration<N: Network> {
    waiting: Option<Arc<EdgeAgent<N>>>,
    active: Option<Arc<EdgeAgent<N>>>,
}

impl<N: Network> Default for Registration<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Network> Registration<N> {
    pub fn new() -> Self {
        Self {
            waiting: None,
            active: None,
        }
    }

    pub fn active(&self) -> Option<Arc<EdgeAgent<N>>> {
        self.active.clone()
    }

    pub fn waiting(&self) -> Option<Arc<EdgeAgent<N>>> {
        self.waiting.clone()
    }

    /// Install a new version.
    ///
    /// A failed install drops the new version and leaves the active one in
    /// control. A successful one activates at once when nothing is active
    /// or skip-waiting was requested, and waits otherwise.
    pub async fn update(&mut self, agent: EdgeAgent<N>) -> AgentResult<UpdateOutcome> {
        let agent = Arc::new(agent);

        if let Err(e) = agent.install().await {
            warn!(
                version = agent.version(),
                active = self.active.as_ref().map(|a| a.version()),
                error = %e,
                "Install failed, keeping current version"
            );
            return Err(e);
        }

        if self.active.is_none() || agent.skip_waiting_requested() {
            self.promote(agent)?;
            Ok(UpdateOutcome::Activated)
        } else {
            info!(version = agent.version(), "New version installed, waiting");
            self.waiting = Some(agent);
            Ok(UpdateOutcome::Waiting)
        }
    }

    /// Activate the waiting version once the old version's pages closed.
    /// Returns `false` when nothing was waiting.
    pub fn activate_waiting(&mut self) -> AgentResult<bool> {
        match self.waiting.take() {
            Some(agent) => {
                self.promote(agent)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deliver a control message to the waiting version, promoting it if the
    /// message activated it.
    pub async fn message_waiting(
        &mut self,
        data: JsonValue,
        reply: Option<ReplyPort>,
    ) -> AgentResult<bool> {
        let Some(agent) = self.waiting.clone() else {
            acknowledge(reply);
            return Ok(false);
        };

        agent.handle_message(data, reply).await;

        if agent.state() == LifecycleState::Active {
            self.waiting = None;
            self.promote(agent)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Serve a fetch with the active version. `None` means the host handles
    /// the request itself.
    pub async fn handle_fetch(&self, request: Request) -> Option<Response> {
        match &self.active {
            Some(agent) => agent.handle_fetch(request).await,
            None => None,
        }
    }

    fn promote(&mut self, agent: Arc<EdgeAgent<N>>) -> AgentResult<()> {
        if agent.state() != LifecycleState::Active {
            agent.activate()?;
        }
        let previous = self.active.replace(Arc::clone(&agent));
        debug!(
            version = agent.version(),
            previous = previous.as_ref().map(|a| a.version()),
            "Promoted agent version"
        );
        Ok(())
    }
}
