//! Application-level liveness probing.
//!
//! The socket can be black-holed without any close being observed, so the
//! monitor sends `ping` envelopes on a fixed interval and declares the
//! transport dead when no `pong` arrives within the probe timeout.
//!
//! The monitor is sans-IO: the owner calls [`HeartbeatMonitor::poll`] with
//! the current time and acts on the returned [`HeartbeatAction`].

use std::time::Duration;
use tokio::time::Instant;

/// Probe timing for one channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings while the channel is open.
    pub probe_interval: Duration,
    /// How long a ping may go unanswered.
    pub probe_timeout: Duration,
}

impl HeartbeatConfig {
    /// Timing for conversation channels.
    pub fn chat() -> Self {
        Self {
            probe_interval: Duration::from_secs(20),
            probe_timeout: Duration::from_secs(10),
        }
    }

    /// Timing for the notification channel.
    pub fn notifications() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
        }
    }

    /// Longest silence tolerated before a forced close.
    pub fn max_silence(&self) -> Duration {
        self.probe_interval + self.probe_timeout
    }
}

/// What the owner must do after polling the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing due.
    Idle,
    /// Send a `ping` envelope now.
    SendPing,
    /// The probe went unanswered; force-close the transport.
    Expired,
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    running: bool,
    next_probe_at: Option<Instant>,
    probe_deadline: Option<Instant>,
    last_liveness_at: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            running: false,
            next_probe_at: None,
            probe_deadline: None,
            last_liveness_at: None,
        }
    }

    pub fn config(&self) -> HeartbeatConfig {
        self.config
    }

    /// Replace the timing; takes effect on the next [`start`](Self::start).
    pub fn set_config(&mut self, config: HeartbeatConfig) {
        self.config = config;
    }

    /// Begin probing. The open itself counts as liveness.
    pub fn start(&mut self, now: Instant) {
        self.running = true;
        self.last_liveness_at = Some(now);
        self.next_probe_at = Some(now + self.config.probe_interval);
        self.probe_deadline = None;
    }

    /// Stop probing and clear every timer.
    pub fn stop(&mut self) {
        self.running = false;
        self.next_probe_at = None;
        self.probe_deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether a ping is awaiting its pong.
    pub fn pending_probe(&self) -> bool {
        self.probe_deadline.is_some()
    }

    pub fn last_liveness_at(&self) -> Option<Instant> {
        self.last_liveness_at
    }

    /// Record a `pong`.
    pub fn on_pong(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        self.last_liveness_at = Some(now);
        self.probe_deadline = None;
    }

    /// Advance the monitor to `now`.
    ///
    /// An expired probe takes priority over a due ping. On expiry the monitor
    /// stops itself.
    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if !self.running {
            return HeartbeatAction::Idle;
        }

        if matches!(self.probe_deadline, Some(deadline) if deadline <= now) {
            self.stop();
            return HeartbeatAction::Expired;
        }

        match self.next_probe_at {
            Some(at) if at <= now => {
                self.next_probe_at = Some(now + self.config.probe_interval);
                // An unanswered probe keeps its original deadline.
                if self.probe_deadline.is_none() {
                    self.probe_deadline = Some(now + self.config.probe_timeout);
                }
                HeartbeatAction::SendPing
            }
            _ => HeartbeatAction::Idle,
        }
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.running {
            return None;
        }
        match (self.next_probe_at, self.probe_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
