//! Reconnection scheduling with capped exponential backoff.

use crate::channel::ChannelIdentity;
use std::time::Duration;
use tokio::time::Instant;

/// Close code for an abnormal closure (no close frame seen).
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code the server uses when the token is rejected.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Close code the server uses when access to the channel is forbidden.
pub const CLOSE_FORBIDDEN: u16 = 4003;

/// Socket reconnection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for the delay. Attempts themselves are never capped.
    pub max_delay: Duration,
    /// Close codes that end automatic reconnection.
    pub fatal_close_codes: Vec<u16>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            fatal_close_codes: vec![CLOSE_UNAUTHORIZED, CLOSE_FORBIDDEN],
        }
    }
}

impl ReconnectConfig {
    /// `min(max_delay, base_delay * 2^(attempt - 1))`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn is_fatal(&self, code: u16) -> bool {
        self.fatal_close_codes.contains(&code)
    }
}

/// Outcome of an unplanned close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Access was revoked; no retry is scheduled.
    Fatal { code: u16 },
    /// A retry was scheduled.
    Retry { attempt: u32, delay: Duration },
}

#[derive(Debug, Clone)]
struct PendingRetry {
    target: ChannelIdentity,
    fire_at: Instant,
}

/// Decides if and when a closed transport is re-established.
#[derive(Debug)]
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    attempt: u32,
    pending: Option<PendingRetry>,
}

impl ReconnectScheduler {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            pending: None,
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Handle an unplanned close of a transport that targeted `target`.
    pub fn on_close(&mut self, code: Option<u16>, target: ChannelIdentity, now: Instant) -> ReconnectDecision {
        if let Some(code) = code.filter(|c| self.config.is_fatal(*c)) {
            self.reset();
            return ReconnectDecision::Fatal { code };
        }

        self.attempt = self.attempt.saturating_add(1);
        let delay = self.config.delay(self.attempt);
        self.pending = Some(PendingRetry {
            target,
            fire_at: now + delay,
        });

        ReconnectDecision::Retry {
            attempt: self.attempt,
            delay,
        }
    }

    /// A transport reached `Open`.
    pub fn on_open(&mut self) {
        self.reset();
    }

    /// Drop any pending retry without touching the attempt counter.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Drop any pending retry and start counting from zero.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.pending = None;
    }

    /// Fire a due retry.
    ///
    /// Returns the channel to reconnect to, or `None` if nothing is due. A due
    /// retry whose target no longer matches `desired` is discarded.
    pub fn poll(&mut self, now: Instant, desired: Option<&ChannelIdentity>) -> Option<ChannelIdentity> {
        if !matches!(&self.pending, Some(p) if p.fire_at <= now) {
            return None;
        }

        let pending = self.pending.take()?;
        if desired == Some(&pending.target) {
            Some(pending.target)
        } else {
            tracing::debug!(target_channel = %pending.target, "discarding retry for abandoned channel");
            None
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.fire_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let cfg = ReconnectConfig::default();
        assert_eq!(cfg.delay(1), ms(1000));
        assert_eq!(cfg.delay(2), ms(2000));
        assert_eq!(cfg.delay(3), ms(4000));
        assert_eq!(cfg.delay(5), ms(16000));
        assert_eq!(cfg.delay(6), ms(30000));
        assert_eq!(cfg.delay(40), ms(30000));
        assert_eq!(cfg.delay(u32::MAX), ms(30000));
    }

    #[test]
    fn test_delay_is_monotonic() {
        let cfg = ReconnectConfig::default();
        let mut last = Duration::ZERO;
        for attempt in 0..200 {
            let d = cfg.delay(attempt);
            assert!(d >= last, "delay decreased at attempt {}", attempt);
            assert!(d <= ms(30000));
            last = d;
        }
    }

    #[test]
    fn test_fatal_close_resets_and_schedules_nothing() {
        let t0 = Instant::now();
        let chan = ChannelIdentity::conversation("a");
        let mut sched = ReconnectScheduler::new(ReconnectConfig::default());

        sched.on_close(Some(1006), chan.clone(), t0);
        assert_eq!(sched.attempt(), 1);

        let decision = sched.on_close(Some(4003), chan, t0);
        assert_eq!(decision, ReconnectDecision::Fatal { code: 4003 });
        assert_eq!(sched.attempt(), 0);
        assert!(!sched.is_pending());
        assert_eq!(sched.next_deadline(), None);
    }

    #[test]
    fn test_retry_fires_for_current_target() {
        let t0 = Instant::now();
        let chan = ChannelIdentity::conversation("a");
        let mut sched = ReconnectScheduler::new(ReconnectConfig::default());

        let decision = sched.on_close(Some(1006), chan.clone(), t0);
        assert_eq!(decision, ReconnectDecision::Retry { attempt: 1, delay: ms(1000) });
        assert_eq!(sched.poll(t0 + ms(999), Some(&chan)), None);
        assert_eq!(sched.poll(t0 + ms(1000), Some(&chan)), Some(chan.clone()));
        assert!(!sched.is_pending());

        let decision = sched.on_close(None, chan, t0);
        assert_eq!(decision, ReconnectDecision::Retry { attempt: 2, delay: ms(2000) });
    }

    #[test]
    fn test_stale_target_is_discarded() {
        let t0 = Instant::now();
        let old = ChannelIdentity::conversation("old");
        let new = ChannelIdentity::conversation("new");
        let mut sched = ReconnectScheduler::new(ReconnectConfig::default());

        sched.on_close(Some(1006), old, t0);
        assert_eq!(sched.poll(t0 + ms(5000), Some(&new)), None);
        assert!(!sched.is_pending());
    }

    #[test]
    fn test_open_resets_attempts() {
        let t0 = Instant::now();
        let chan = ChannelIdentity::notifications();
        let mut sched = ReconnectScheduler::new(ReconnectConfig::default());
        for _ in 0..4 {
            sched.on_close(Some(1006), chan.clone(), t0);
        }
        assert_eq!(sched.attempt(), 4);
        sched.on_open();
        assert_eq!(sched.attempt(), 0);
    }

    #[test]
    fn test_custom_fatal_codes() {
        let cfg = ReconnectConfig {
            fatal_close_codes: vec![4401],
            ..ReconnectConfig::default()
        };
        assert!(cfg.is_fatal(4401));
        assert!(!cfg.is_fatal(4003));
    }
}
