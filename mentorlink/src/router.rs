//! Inbound envelope dispatch.
//!
//! [`EventRouter::handle_frame`] is the single entry point for inbound text.
//! Each frame is parsed and routed on its own: a malformed frame, an unknown
//! type or a failing handler is logged and never reaches the next frame.

use crate::cache::MessageCache;
use crate::channel::ChannelIdentity;
use crate::dispatch::{Dispatcher, GamificationBus};
use crate::envelope::{parse_frame, Frame, InboundEnvelope};
use crate::error::Result;
use crate::reconcile::{OptimisticReconciler, PendingPolicy, Reconciled};
use crate::stream::StreamAssembler;
use crate::typing::TypingIndicator;
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Connection-level signal extracted from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Nothing for the controller to do.
    None,
    /// The server acknowledged the channel.
    Established,
    /// Liveness reply.
    Pong,
}

/// Routes inbound envelopes to the cache, stream state and external stores.
pub struct EventRouter {
    cache: Arc<dyn MessageCache>,
    dispatcher: Arc<dyn Dispatcher>,
    bus: GamificationBus,
    stream: StreamAssembler,
    reconciler: OptimisticReconciler,
    typing: TypingIndicator,
    active_agent: Option<String>,
    last_stream_error: Option<String>,
}

impl EventRouter {
    pub fn new(
        cache: Arc<dyn MessageCache>,
        dispatcher: Arc<dyn Dispatcher>,
        bus: GamificationBus,
        pending_policy: PendingPolicy,
        typing_window: Duration,
    ) -> Self {
        Self {
            cache,
            dispatcher,
            bus,
            stream: StreamAssembler::new(),
            reconciler: OptimisticReconciler::new(pending_policy),
            typing: TypingIndicator::new(typing_window),
            active_agent: None,
            last_stream_error: None,
        }
    }

    /// Parse and route one raw frame.
    pub fn handle_frame(&mut self, channel: &ChannelIdentity, raw: &str, now: Instant) -> Signal {
        let frame = match parse_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(channel = %channel, error = %e, "dropping malformed frame");
                return Signal::None;
            }
        };

        match frame {
            Frame::Unknown(kind) => {
                debug!(channel = %channel, kind = %kind, "ignoring unknown envelope type");
                Signal::None
            }
            Frame::Known(envelope) => {
                let kind = envelope.kind();
                match self.route(channel, envelope, now) {
                    Ok(signal) => signal,
                    Err(e) => {
                        warn!(channel = %channel, kind, error = %e, "envelope handler failed");
                        Signal::None
                    }
                }
            }
        }
    }

    /// Apply one parsed envelope.
    pub fn route(&mut self, channel: &ChannelIdentity, envelope: InboundEnvelope, now: Instant) -> Result<Signal> {
        match envelope {
            InboundEnvelope::Pong { .. } => return Ok(Signal::Pong),
            InboundEnvelope::ConnectionEstablished { .. } => return Ok(Signal::Established),

            InboundEnvelope::ChatMessage(env) | InboundEnvelope::AiResponseBroadcast(env) => {
                let sender = env.message.sender;
                let outcome = self.reconciler.apply_server_record(
                    self.cache.as_ref(),
                    channel,
                    env.message,
                    env.temp_id.as_deref(),
                );
                trace!(channel = %channel, ?outcome, "full message");
                self.typing.clear();
                if sender != Sender::User {
                    self.active_agent = None;
                }
            }

            InboundEnvelope::StreamStart { message_id } => {
                self.stream.start(&message_id);
                self.last_stream_error = None;
            }

            InboundEnvelope::StreamChunk { message_id, content } => {
                self.stream.push_chunk(&message_id, &content);
            }

            InboundEnvelope::StreamComplete { message_id, message } => {
                let completion = self.stream.complete(&message_id, message);
                let outcome = self.reconciler.apply_server_record(
                    self.cache.as_ref(),
                    channel,
                    completion.record,
                    None,
                );
                if outcome == Reconciled::Duplicate {
                    debug!(channel = %channel, message_id = %message_id, "stream completion already cached");
                }
                self.typing.clear();
                if completion.ended_current {
                    self.active_agent = None;
                }
            }

            InboundEnvelope::StreamError { message_id, error } => {
                let in_flight = self.stream.is_streaming();
                let discarded = self.stream.fail(message_id.as_deref());
                if discarded || !in_flight {
                    let reason = error.unwrap_or_else(|| "Response generation failed".to_string());
                    warn!(channel = %channel, ?message_id, reason = %reason, "stream aborted");
                    self.last_stream_error = Some(reason);
                    self.active_agent = None;
                    self.typing.clear();
                }
            }

            InboundEnvelope::AgentStart(decision) => {
                info!(
                    channel = %channel,
                    agent = %decision.agent,
                    reason = %decision.reason,
                    confidence = ?decision.confidence,
                    "routing decision"
                );
                self.active_agent = Some(decision.agent.clone());
                self.dispatcher.record_routing_decision(&decision)?;
            }

            InboundEnvelope::TypingStatus { is_typing, .. } => {
                self.typing.signal(is_typing, now);
            }

            InboundEnvelope::PlanUpdate(mut update) => {
                if update.event_id.is_none() {
                    update.event_id = Some(Uuid::new_v4().to_string());
                }
                self.dispatcher.push_plan_update(&update)?;
            }

            InboundEnvelope::AgentRuntime(step) => {
                self.dispatcher.push_agent_runtime(&step)?;
            }

            InboundEnvelope::InsightGenerated(insight) => {
                let pushed = self.dispatcher.push_insight(&insight);
                let toasted = self.dispatcher.toast(Toast::new(
                    ToastKind::Info,
                    "New insight",
                    headline(&insight.title, &insight.content),
                ));
                pushed.and(toasted)?;
            }

            InboundEnvelope::MissingInformation(info) => {
                let pushed = self.dispatcher.push_missing_information(&info);
                let toasted = self.dispatcher.toast(Toast::new(
                    ToastKind::Warning,
                    "More information needed",
                    info.message.clone(),
                ));
                pushed.and(toasted)?;
            }

            InboundEnvelope::GamificationUpdate(update) => {
                let toast = celebration_toast(&update);
                let delivered = self.bus.publish(update);
                trace!(channel = %channel, delivered, "gamification update published");
                if let Some(toast) = toast {
                    self.dispatcher.toast(toast)?;
                }
            }
        }

        Ok(Signal::None)
    }

    /// Show a user send immediately under a temporary id.
    pub fn insert_optimistic(&mut self, channel: &ChannelIdentity, content: &str, now: Instant) -> MessageRecord {
        self.reconciler.insert_optimistic(self.cache.as_ref(), channel, content, now)
    }

    /// Advance time-based state: typing lapse and the pending-message policy.
    pub fn poll(&mut self, now: Instant) {
        self.typing.expire(now);
        let failed = self.reconciler.expire(self.cache.as_ref(), now);
        if !failed.is_empty() {
            warn!(count = failed.len(), ?failed, "unconfirmed messages marked failed");
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.typing.next_deadline(), self.reconciler.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// The transport closed; anything mid-flight on it is abandoned.
    pub fn on_transport_lost(&mut self) {
        self.stream.reset();
        self.typing.clear();
        self.active_agent = None;
    }

    /// Full reset for a channel switch. Cached records are untouched, and
    /// sends still awaiting confirmation stay subject to the pending policy.
    pub fn reset(&mut self) {
        self.on_transport_lost();
        self.reconciler.reset();
        self.last_stream_error = None;
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_streaming()
    }

    pub fn streaming_text(&self) -> Option<&str> {
        self.stream.text()
    }

    pub fn is_peer_typing(&self, now: Instant) -> bool {
        self.typing.is_active(now)
    }

    pub fn active_agent(&self) -> Option<&str> {
        self.active_agent.as_deref()
    }

    pub fn last_stream_error(&self) -> Option<&str> {
        self.last_stream_error.as_deref()
    }

    pub fn pending_count(&self) -> usize {
        self.reconciler.pending().len()
    }

    pub fn bus(&self) -> &GamificationBus {
        &self.bus
    }
}

fn headline(title: &str, content: &str) -> String {
    if title.is_empty() {
        content.to_string()
    } else {
        title.to_string()
    }
}

fn celebration_toast(update: &GamificationUpdate) -> Option<Toast> {
    let default_title = match update.kind {
        GamificationKind::LevelUp => "Level up!",
        GamificationKind::BadgeEarned => "Badge earned!",
        GamificationKind::StreakMilestone => "Streak milestone!",
        _ => return None,
    };
    let title = update.title.clone().unwrap_or_else(|| default_title.to_string());
    let body = update.message.clone().unwrap_or_default();
    Some(Toast::new(ToastKind::Celebration, title, body))
}
