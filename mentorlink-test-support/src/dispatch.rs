//! Dispatcher that records every call.

use mentorlink::{
    AgentRuntimeStep, AgentStart, Dispatcher, Error, Insight, MissingInformation, PlanUpdate, Result, Toast,
};
use parking_lot::Mutex;

#[derive(Default)]
pub struct RecordingDispatcher {
    pub plans: Mutex<Vec<PlanUpdate>>,
    pub runtime: Mutex<Vec<AgentRuntimeStep>>,
    pub insights: Mutex<Vec<Insight>>,
    pub missing: Mutex<Vec<MissingInformation>>,
    pub routing: Mutex<Vec<AgentStart>>,
    pub toasts: Mutex<Vec<Toast>>,
    failing: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records nothing; every store rejects with a handler error.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    fn record<T: Clone>(&self, sink: &Mutex<Vec<T>>, item: &T) -> Result<()> {
        if self.failing {
            return Err(Error::handler("store unavailable"));
        }
        sink.lock().push(item.clone());
        Ok(())
    }
}

impl Dispatcher for RecordingDispatcher {
    fn push_plan_update(&self, update: &PlanUpdate) -> Result<()> {
        self.record(&self.plans, update)
    }

    fn push_agent_runtime(&self, step: &AgentRuntimeStep) -> Result<()> {
        self.record(&self.runtime, step)
    }

    fn push_insight(&self, insight: &Insight) -> Result<()> {
        self.record(&self.insights, insight)
    }

    fn push_missing_information(&self, info: &MissingInformation) -> Result<()> {
        self.record(&self.missing, info)
    }

    fn record_routing_decision(&self, decision: &AgentStart) -> Result<()> {
        self.record(&self.routing, decision)
    }

    fn toast(&self, toast: Toast) -> Result<()> {
        self.record(&self.toasts, &toast)
    }
}
