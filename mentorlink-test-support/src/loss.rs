//! Heartbeat reply loss simulation.
//!
//! The scripted server consults a [`LossGenerator`] for each `ping` it sees
//! to decide whether to answer with a `pong`.

use std::collections::HashSet;

/// Decision for whether to drop a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropDecision {
    Drop,
    Pass,
}

/// Pattern for reply loss
#[derive(Debug, Clone)]
pub enum LossPattern {
    /// Drop every reply from probe `start` on (a black-holed socket).
    From { start: u64 },
    /// Drop specific probes
    Specific { probes: HashSet<u64> },
}

/// Decides which heartbeat probes go unanswered.
///
/// # Example
///
/// ```
/// use mentorlink_test_support::loss::{DropDecision, LossGenerator};
///
/// let mut gen = LossGenerator::from_probe(2);
/// assert_eq!(gen.should_drop(0), DropDecision::Pass);
/// assert_eq!(gen.should_drop(2), DropDecision::Drop);
/// ```
pub struct LossGenerator {
    pattern: LossPattern,
    probe_count: usize,
    dropped: usize,
}

impl LossGenerator {
    pub fn new(pattern: LossPattern) -> Self {
        Self {
            pattern,
            probe_count: 0,
            dropped: 0,
        }
    }

    pub fn from_probe(start: u64) -> Self {
        Self::new(LossPattern::From { start })
    }

    pub fn specific(probes: impl IntoIterator<Item = u64>) -> Self {
        Self::new(LossPattern::Specific {
            probes: probes.into_iter().collect(),
        })
    }

    /// Decide whether to drop the reply to probe number `probe` (from 0).
    pub fn should_drop(&mut self, probe: u64) -> DropDecision {
        self.probe_count += 1;
        let drop = match &self.pattern {
            LossPattern::From { start } => probe >= *start,
            LossPattern::Specific { probes } => probes.contains(&probe),
        };
        if drop {
            self.dropped += 1;
            DropDecision::Drop
        } else {
            DropDecision::Pass
        }
    }

    pub fn stats(&self) -> LossStats {
        LossStats {
            total_probes: self.probe_count,
            dropped: self.dropped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LossStats {
    pub total_probes: usize,
    pub dropped: usize,
}
