//! Optimistic sends reconciled against server-confirmed records.
//!
//! A message the user sends is shown at once under a temporary id. When the
//! server echoes it back with the same `temp_id`, the provisional record is
//! overwritten in its cache slot, so the history never holds two copies.

use crate::cache::{MessageCache, MessagePages};
use crate::channel::ChannelIdentity;
use crate::types::{MessageRecord, Provenance};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// What happens to provisional records the server never confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    /// Leave them visible and pending indefinitely.
    #[default]
    KeepVisible,
    /// Mark them `failed` after the given time. They stay visible.
    MarkFailedAfter(Duration),
}

/// A provisional record awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub temp_id: String,
    /// Channel whose cache holds the provisional record.
    pub channel: ChannelIdentity,
    pub content: String,
    pub created_at: Instant,
}

/// How a server record was merged into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Overwrote the provisional record with the matching temp id.
    Replaced,
    /// Appended to the newest page.
    Appended,
    /// Already present; nothing written.
    Duplicate,
}

#[derive(Debug, Default)]
pub struct OptimisticReconciler {
    policy: PendingPolicy,
    pending: Vec<PendingMessage>,
}

impl OptimisticReconciler {
    pub fn new(policy: PendingPolicy) -> Self {
        Self {
            policy,
            pending: Vec::new(),
        }
    }

    /// A locally unique temporary id.
    pub fn next_temp_id() -> String {
        format!("temp-{}", Uuid::new_v4())
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    /// Show `content` immediately under a fresh temp id.
    pub fn insert_optimistic(
        &mut self,
        cache: &dyn MessageCache,
        channel: &ChannelIdentity,
        content: &str,
        now: Instant,
    ) -> MessageRecord {
        let temp_id = Self::next_temp_id();
        let record = MessageRecord::provisional(&temp_id, channel.id(), content);

        cache.patch(channel, &mut |slot| match slot {
            Some(pages) => {
                if !pages.contains(&record.id) {
                    pages.push_newest(record.clone());
                }
            }
            None => *slot = Some(MessagePages::single(record.clone())),
        });

        self.pending.push(PendingMessage {
            temp_id,
            channel: channel.clone(),
            content: content.to_string(),
            created_at: now,
        });

        record
    }

    /// Merge an authoritative record from the server.
    pub fn apply_server_record(
        &mut self,
        cache: &dyn MessageCache,
        channel: &ChannelIdentity,
        mut record: MessageRecord,
        temp_id: Option<&str>,
    ) -> Reconciled {
        record.provenance = Provenance::Confirmed;
        if let Some(temp_id) = temp_id {
            self.pending.retain(|p| p.temp_id != temp_id);
        }

        let mut outcome = Reconciled::Duplicate;
        cache.patch(channel, &mut |slot| {
            let pages = slot.get_or_insert_with(MessagePages::default);

            if let Some(temp_id) = temp_id.filter(|t| pages.contains(t)) {
                // The confirmed copy may already be present (e.g. delivered as a
                // stream completion first); keep exactly one record.
                if temp_id != record.id && pages.contains(&record.id) {
                    pages.remove(temp_id);
                    outcome = Reconciled::Duplicate;
                } else {
                    pages.replace(temp_id, record.clone());
                    outcome = Reconciled::Replaced;
                }
                return;
            }

            if pages.contains(&record.id) {
                outcome = Reconciled::Duplicate;
            } else {
                pages.push_newest(record.clone());
                outcome = Reconciled::Appended;
            }
        });

        outcome
    }

    /// Apply the pending policy. Returns the temp ids marked failed.
    ///
    /// Each record is marked in the cache of the channel it was sent on, which
    /// need not be the channel currently selected.
    pub fn expire(&mut self, cache: &dyn MessageCache, now: Instant) -> Vec<String> {
        let PendingPolicy::MarkFailedAfter(after) = self.policy else {
            return Vec::new();
        };

        let (expired, kept): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| now.saturating_duration_since(p.created_at) >= after);
        self.pending = kept;

        let mut by_channel: Vec<(ChannelIdentity, Vec<String>)> = Vec::new();
        for p in &expired {
            match by_channel.iter_mut().find(|(c, _)| *c == p.channel) {
                Some((_, ids)) => ids.push(p.temp_id.clone()),
                None => by_channel.push((p.channel.clone(), vec![p.temp_id.clone()])),
            }
        }
        for (channel, ids) in &by_channel {
            cache.patch(channel, &mut |slot| {
                if let Some(pages) = slot {
                    for id in ids {
                        pages.mark(id, Provenance::Failed);
                    }
                }
            });
        }

        expired.into_iter().map(|p| p.temp_id).collect()
    }

    /// Earliest instant at which [`expire`](Self::expire) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.policy {
            PendingPolicy::KeepVisible => None,
            PendingPolicy::MarkFailedAfter(after) => {
                self.pending.iter().map(|p| p.created_at + after).min()
            }
        }
    }

    /// Called on channel switch. Cached records are left as they are.
    ///
    /// Under `MarkFailedAfter` the entries are kept so records left behind on
    /// the old channel still turn `failed`; otherwise nothing will act on them.
    pub fn reset(&mut self) {
        if self.policy == PendingPolicy::KeepVisible {
            self.pending.clear();
        }
    }
}
