//! Debounced peer typing indicator.

use std::time::Duration;
use tokio::time::Instant;

/// Default silence window after which a typing signal lapses.
pub const DEFAULT_TYPING_WINDOW: Duration = Duration::from_secs(4);

/// Shows "peer is typing" until the window lapses without a renewal.
#[derive(Debug)]
pub struct TypingIndicator {
    window: Duration,
    until: Option<Instant>,
}

impl TypingIndicator {
    pub fn new(window: Duration) -> Self {
        Self { window, until: None }
    }

    /// A typing signal arrived. `false` clears immediately.
    pub fn signal(&mut self, is_typing: bool, now: Instant) {
        self.until = is_typing.then(|| now + self.window);
    }

    pub fn clear(&mut self) {
        self.until = None;
    }

    pub fn is_active(&self, now: Instant) -> bool {
        matches!(self.until, Some(until) if now < until)
    }

    /// Drop a lapsed signal. Returns `true` if the indicator just turned off.
    pub fn expire(&mut self, now: Instant) -> bool {
        if matches!(self.until, Some(until) if now >= until) {
            self.until = None;
            true
        } else {
            false
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.until
    }
}

impl Default for TypingIndicator {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_WINDOW)
    }
}
