//! Outlets to subsystems the connection layer does not own.
//!
//! Plan progress, insights, routing decisions and toasts live in stores owned
//! by the consumer. The router reaches them only through [`Dispatcher`].
//! Gamification events go out over a [`GamificationBus`] so celebration UI can
//! subscribe without the router knowing who listens.

use crate::error::Result;
use crate::types::*;
use tokio::sync::broadcast;

/// Setter contract for externally owned stores.
///
/// Every method defaults to a no-op. Returning an error only affects the frame
/// being handled: it is logged and the next frame proceeds.
pub trait Dispatcher: Send + Sync {
    /// Forward a plan-build progress event. `update.event_id` is always set.
    fn push_plan_update(&self, _update: &PlanUpdate) -> Result<()> {
        Ok(())
    }

    /// Forward an execution-trace step.
    fn push_agent_runtime(&self, _step: &AgentRuntimeStep) -> Result<()> {
        Ok(())
    }

    fn push_insight(&self, _insight: &Insight) -> Result<()> {
        Ok(())
    }

    fn push_missing_information(&self, _info: &MissingInformation) -> Result<()> {
        Ok(())
    }

    /// Record which agent the backend routed to, and why.
    fn record_routing_decision(&self, _decision: &AgentStart) -> Result<()> {
        Ok(())
    }

    fn toast(&self, _toast: Toast) -> Result<()> {
        Ok(())
    }
}

/// Dispatcher that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDispatcher;

impl Dispatcher for NoopDispatcher {}

/// Default buffered events per subscriber.
const BUS_CAPACITY: usize = 64;

/// Publish/subscribe channel for gamification updates.
#[derive(Debug, Clone)]
pub struct GamificationBus {
    tx: broadcast::Sender<GamificationUpdate>,
}

impl GamificationBus {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GamificationUpdate> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, update: GamificationUpdate) -> usize {
        self.tx.send(update).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for GamificationBus {
    fn default() -> Self {
        Self::new()
    }
}
