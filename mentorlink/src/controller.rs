//! Per-channel connection state machine.
//!
//! [`ConnectionController`] owns exactly one live transport, one heartbeat
//! monitor and one reconnect scheduler for the currently desired channel.
//! It never blocks or sleeps. The owner feeds it consumer requests,
//! [`TransportNotice`]s and the current time, and arms a timer for
//! [`ConnectionController::next_deadline`].
//!
//! ```text
//! Idle -> Connecting -> Open -> Connecting (retry)
//!                           \-> Error (fatal close, missing credential)
//! any  -> Idle -> Connecting  (channel change)
//! ```

use crate::cache::MessageCache;
use crate::channel::ChannelIdentity;
use crate::config::LinkConfig;
use crate::credentials::TokenProvider;
use crate::dispatch::{Dispatcher, GamificationBus};
use crate::envelope::OutboundEnvelope;
use crate::error::{Error, Result};
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::reconnect::{ReconnectDecision, ReconnectScheduler, CLOSE_ABNORMAL};
use crate::router::{EventRouter, Signal};
use crate::transport::{Transport, TransportEvent, TransportHandle, TransportId, TransportNotice};
use crate::types::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Close code for a close the client initiated on purpose.
pub const CLOSE_NORMAL: u16 = 1000;

pub struct ConnectionController {
    config: LinkConfig,
    credentials: Arc<dyn TokenProvider>,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<TransportNotice>,

    desired: Option<ChannelIdentity>,
    next_id: u64,
    live: Option<TransportHandle>,
    /// Deadline for the live transport to become open.
    connect_deadline: Option<Instant>,

    status: ConnectionStatus,
    error: Option<ConnectionFault>,
    reconnect: Option<ReconnectIndicator>,

    heartbeat: HeartbeatMonitor,
    scheduler: ReconnectScheduler,
    router: EventRouter,
}

impl ConnectionController {
    pub fn new(
        config: LinkConfig,
        credentials: Arc<dyn TokenProvider>,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedSender<TransportNotice>,
        cache: Arc<dyn MessageCache>,
        dispatcher: Arc<dyn Dispatcher>,
        bus: GamificationBus,
    ) -> Self {
        let router = EventRouter::new(cache, dispatcher, bus, config.pending_policy, config.typing_window);
        Self {
            heartbeat: HeartbeatMonitor::new(config.chat_heartbeat),
            scheduler: ReconnectScheduler::new(config.reconnect.clone()),
            router,
            config,
            credentials,
            transport,
            events,
            desired: None,
            next_id: 0,
            live: None,
            connect_deadline: None,
            status: ConnectionStatus::Idle,
            error: None,
            reconnect: None,
        }
    }

    // ------------------------------------------------------------------
    // Consumer requests
    // ------------------------------------------------------------------

    /// Point the controller at `channel`, or at nothing.
    ///
    /// A different channel tears the current one down completely before the
    /// new one starts connecting. Selecting the current channel again does
    /// nothing; use [`reconnect_now`](Self::reconnect_now) to force a retry.
    pub fn select_channel(&mut self, channel: Option<ChannelIdentity>, now: Instant) {
        if channel == self.desired {
            return;
        }

        if let Some(old) = &self.desired {
            info!(channel = %old, "leaving channel");
        }
        self.teardown("channel change");
        self.desired = channel;

        if let Some(channel) = &self.desired {
            self.heartbeat.set_config(self.config.heartbeat_for(channel.kind()));
            self.begin_connect(now);
        }
    }

    /// Drop the current transport and open a fresh one with `attempt = 0`.
    pub fn reconnect_now(&mut self, now: Instant) {
        if self.desired.is_none() {
            return;
        }
        info!(channel = ?self.desired.as_ref().map(ToString::to_string), "manual reconnect");
        self.heartbeat.stop();
        self.scheduler.reset();
        self.close_live("manual reconnect");
        self.router.on_transport_lost();
        self.error = None;
        self.reconnect = None;
        self.begin_connect(now);
    }

    /// Show `content` immediately and hand it to the transport.
    ///
    /// Fails with [`Error::NotConnected`] unless the channel is open. A
    /// provisional record that could not be queued stays visible as pending.
    pub fn send(&mut self, content: &str, now: Instant) -> Result<MessageRecord> {
        let (Some(channel), Some(handle)) = (self.desired.clone(), self.live.as_ref()) else {
            return Err(Error::NotConnected);
        };
        if self.status != ConnectionStatus::Open {
            return Err(Error::NotConnected);
        }
        let handle = handle.clone();

        let record = self.router.insert_optimistic(&channel, content, now);
        let frame = OutboundEnvelope::StreamingMessage {
            content: content.to_string(),
            temp_id: record.id.clone(),
        }
        .to_frame()?;
        handle.send(frame)?;

        debug!(channel = %channel, temp_id = %record.id, "message queued");
        Ok(record)
    }

    /// Tell the peer whether the user is typing. Silently does nothing unless open.
    pub fn set_typing_status(&mut self, is_typing: bool) {
        if self.status != ConnectionStatus::Open {
            return;
        }
        self.send_envelope(&OutboundEnvelope::TypingStatus { is_typing });
    }

    /// Close the transport for good. The desired channel is kept so a later
    /// [`reconnect_now`](Self::reconnect_now) can resume it.
    pub fn shutdown(&mut self) {
        self.heartbeat.stop();
        self.connect_deadline = None;
        self.scheduler.reset();
        self.close_live("client shutdown");
        self.router.on_transport_lost();
        self.reconnect = None;
        if self.desired.is_some() {
            self.status = ConnectionStatus::Closed;
        }
    }

    // ------------------------------------------------------------------
    // Transport and timer inputs
    // ------------------------------------------------------------------

    /// Apply one transport event. Events from superseded transports are dropped.
    pub fn on_transport_event(&mut self, notice: TransportNotice, now: Instant) {
        let TransportNotice { id, event } = notice;
        if self.live_id() != Some(id) {
            debug!(transport = %id, ?event, "dropping event from stale transport");
            return;
        }
        let Some(channel) = self.desired.clone() else {
            return;
        };

        match event {
            TransportEvent::Opened => {
                debug!(channel = %channel, transport = %id, "transport opened");
                if !self.config.await_server_ack {
                    self.mark_open(now);
                }
            }
            TransportEvent::Frame(text) => match self.router.handle_frame(&channel, &text, now) {
                Signal::Established => {
                    if self.status == ConnectionStatus::Connecting {
                        self.mark_open(now);
                    }
                }
                Signal::Pong => self.heartbeat.on_pong(now),
                Signal::None => {}
            },
            TransportEvent::Error(message) => {
                warn!(channel = %channel, transport = %id, error = %message, "transport error");
            }
            TransportEvent::Closed { code, reason } => {
                self.live = None;
                self.on_unplanned_close(code, &reason, now);
            }
        }
    }

    /// Run every timer that is due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        match self.heartbeat.poll(now) {
            HeartbeatAction::SendPing => self.send_envelope(&OutboundEnvelope::Ping),
            HeartbeatAction::Expired => {
                warn!(
                    channel = ?self.desired.as_ref().map(ToString::to_string),
                    "no pong within probe timeout; forcing close"
                );
                self.close_live("heartbeat timeout");
                self.on_unplanned_close(Some(CLOSE_ABNORMAL), "heartbeat timeout", now);
            }
            HeartbeatAction::Idle => {}
        }

        if self.connect_deadline.is_some_and(|at| at <= now) {
            warn!(
                channel = ?self.desired.as_ref().map(ToString::to_string),
                transport = ?self.live_id(),
                "not open within connect timeout; forcing close"
            );
            self.close_live("connect timeout");
            self.on_unplanned_close(Some(CLOSE_ABNORMAL), "connect timeout", now);
        }

        if let Some(target) = self.scheduler.poll(now, self.desired.as_ref()) {
            info!(channel = %target, attempt = self.scheduler.attempt(), "retrying connection");
            self.begin_connect(now);
        }

        self.router.poll(now);
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.connect_deadline,
            self.heartbeat.next_deadline(),
            self.scheduler.next_deadline(),
            self.router.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn error(&self) -> Option<&ConnectionFault> {
        self.error.as_ref()
    }

    pub fn channel(&self) -> Option<&ChannelIdentity> {
        self.desired.as_ref()
    }

    /// Id of the transport whose events are currently accepted.
    pub fn live_id(&self) -> Option<TransportId> {
        self.live.as_ref().map(TransportHandle::id)
    }

    pub fn attempt(&self) -> u32 {
        self.scheduler.attempt()
    }

    pub fn reconnect_indicator(&self) -> Option<ReconnectIndicator> {
        self.reconnect
    }

    pub fn is_probing(&self) -> bool {
        self.heartbeat.is_running()
    }

    pub fn is_streaming(&self) -> bool {
        self.router.is_streaming()
    }

    pub fn streaming_text(&self) -> Option<&str> {
        self.router.streaming_text()
    }

    pub fn is_peer_typing(&self, now: Instant) -> bool {
        self.router.is_peer_typing(now)
    }

    pub fn active_agent(&self) -> Option<&str> {
        self.router.active_agent()
    }

    pub fn bus(&self) -> &GamificationBus {
        self.router.bus()
    }

    pub fn snapshot(&self, now: Instant) -> ConnectionSnapshot {
        ConnectionSnapshot {
            channel: self.desired.clone(),
            status: self.status,
            error: self.error.clone(),
            reconnect: self.reconnect,
            reconnect_attempt: self.scheduler.attempt(),
            is_streaming: self.router.is_streaming(),
            streaming_text: self.router.streaming_text().map(String::from),
            is_peer_typing: self.router.is_peer_typing(now),
            active_agent: self.router.active_agent().map(String::from),
            last_stream_error: self.router.last_stream_error().map(String::from),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn begin_connect(&mut self, now: Instant) {
        let Some(channel) = self.desired.clone() else {
            return;
        };

        let Some(token) = self.credentials.token() else {
            error!(channel = %channel, "no credential; not connecting");
            self.fail(FaultKind::MissingCredential, Error::MissingCredential.to_string());
            return;
        };

        let url = match channel.url(&self.config.host, self.config.use_tls, &token) {
            Ok(url) => url,
            Err(e) => {
                error!(channel = %channel, error = %e, "cannot build transport url");
                self.fail(FaultKind::InvalidUrl, e.to_string());
                return;
            }
        };

        self.next_id += 1;
        let id = TransportId(self.next_id);
        info!(channel = %channel, transport = %id, "connecting");
        self.live = Some(self.transport.open(id, url, self.config.outbound_queue, self.events.clone()));
        self.status = ConnectionStatus::Connecting;
        self.connect_deadline = Some(now + self.config.connect_timeout);
    }

    fn mark_open(&mut self, now: Instant) {
        if let Some(channel) = &self.desired {
            info!(channel = %channel, attempts = self.scheduler.attempt(), "channel open");
        }
        self.status = ConnectionStatus::Open;
        self.connect_deadline = None;
        self.error = None;
        self.reconnect = None;
        self.scheduler.on_open();
        self.heartbeat.start(now);
    }

    fn on_unplanned_close(&mut self, code: Option<u16>, reason: &str, now: Instant) {
        self.heartbeat.stop();
        self.connect_deadline = None;
        self.router.on_transport_lost();

        let Some(target) = self.desired.clone() else {
            self.status = ConnectionStatus::Idle;
            return;
        };

        match self.scheduler.on_close(code, target.clone(), now) {
            ReconnectDecision::Fatal { code } => {
                error!(channel = %target, code, reason, "access revoked; not reconnecting");
                self.status = ConnectionStatus::Error;
                self.reconnect = None;
                self.error = Some(ConnectionFault::new(
                    FaultKind::AccessRevoked { code },
                    Error::AccessRevoked {
                        code,
                        reason: reason.to_string(),
                    }
                    .to_string(),
                ));
            }
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    channel = %target,
                    ?code,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "connection lost; reconnect scheduled"
                );
                self.status = ConnectionStatus::Connecting;
                self.reconnect = Some(ReconnectIndicator { attempt, delay });
                self.error = Some(ConnectionFault::new(FaultKind::Transient, "Reconnecting..."));
            }
        }
    }

    fn fail(&mut self, kind: FaultKind, message: String) {
        self.heartbeat.stop();
        self.connect_deadline = None;
        self.scheduler.reset();
        self.live = None;
        self.status = ConnectionStatus::Error;
        self.reconnect = None;
        self.error = Some(ConnectionFault::new(kind, message));
    }

    fn teardown(&mut self, reason: &str) {
        self.heartbeat.stop();
        self.connect_deadline = None;
        self.scheduler.reset();
        self.close_live(reason);
        self.router.reset();
        self.status = ConnectionStatus::Idle;
        self.error = None;
        self.reconnect = None;
    }

    fn close_live(&mut self, reason: &str) {
        if let Some(handle) = self.live.take() {
            debug!(transport = %handle.id(), reason, "closing transport");
            handle.close(CLOSE_NORMAL, reason);
        }
    }

    fn send_envelope(&self, envelope: &OutboundEnvelope) {
        let Some(handle) = &self.live else {
            return;
        };
        let sent = envelope.to_frame().and_then(|frame| handle.send(frame));
        if let Err(e) = sent {
            debug!(transport = %handle.id(), error = %e, "outbound frame dropped");
        }
    }
}
