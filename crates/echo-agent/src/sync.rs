//! Outbox delivery.
//!
//! Drains run sequentially in outbox order so one chat's messages reach the
//! backend in the order they were written. A failed delivery leaves the
//! record in place for the next sync signal; there is no retry inside a
//! drain and no attempt limit.

use std::sync::Arc;

use echo_net::{Network, Request};
use echo_outbox::{Outbox, OutboxError, OutboxRecord};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AgentError, AgentResult};

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub retained: usize,
}

/// Result of a caller-side send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Delivery failed; the payload was queued under this record id.
    Queued(String),
}

/// Delivers outbox records to the backend message endpoint.
pub struct SyncCoordinator<N: Network> {
    outbox: Arc<dyn Outbox>,
    network: Arc<N>,
    endpoint: Url,
}

impl<N: Network> SyncCoordinator<N> {
    pub fn new(outbox: Arc<dyn Outbox>, network: Arc<N>, endpoint: Url) -> Self {
        Self {
            outbox,
            network,
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST one payload. Any non-2xx status is a delivery failure.
    async fn deliver(&self, payload: &JsonValue) -> AgentResult<()> {
        let request = Request::post_json(self.endpoint.clone(), payload)?;
        let response = self.network.fetch(&request).await?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(AgentError::Delivery(response.status.as_u16()))
        }
    }

    /// Attempt delivery of every queued record once.
    pub async fn drain(&self) -> AgentResult<DrainReport> {
        let records = self.outbox.list()?;
        let mut report = DrainReport::default();

        for record in records {
            match self.deliver(&record.payload).await {
                Ok(()) => match self.outbox.delete(&record.id) {
                    Ok(_) => report.delivered += 1,
                    Err(e) => {
                        // Delivered but still queued; the next drain resends it.
                        warn!(id = %record.id, error = %e, "Failed to remove delivered record");
                        report.retained += 1;
                    }
                },
                Err(e) => {
                    debug!(
                        id = %record.id,
                        chat = record.chat_id(),
                        error = %e,
                        "Delivery failed, record retained"
                    );
                    report.retained += 1;
                }
            }
        }

        info!(
            delivered = report.delivered,
            retained = report.retained,
            "Outbox drained"
        );
        Ok(report)
    }

    /// Append a payload to the outbox. Returns the record id.
    pub fn queue(&self, payload: JsonValue) -> AgentResult<String> {
        let record = OutboxRecord::new(payload);
        self.outbox.add(&record)?;
        debug!(id = %record.id, "Queued message");
        Ok(record.id)
    }

    /// Try to deliver now; queue the payload if that fails.
    pub async fn send_or_queue(&self, payload: JsonValue) -> AgentResult<SendOutcome> {
        match self.deliver(&payload).await {
            Ok(()) => Ok(SendOutcome::Delivered),
            Err(e) => {
                debug!(error = %e, "Send failed, queueing for background sync");
                match self.queue(payload) {
                    Ok(id) => Ok(SendOutcome::Queued(id)),
                    Err(AgentError::Outbox(OutboxError::Duplicate(id))) => {
                        Ok(SendOutcome::Queued(id))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}
