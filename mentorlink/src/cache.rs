//! Message cache interface.
//!
//! The cache itself belongs to the consumer; this layer only patches it.
//! Pages are ordered newest first, and each page holds its records in
//! chronological order, so the "most recent page" is `pages[0]` and new
//! records are appended to its end.

use crate::channel::ChannelIdentity;
use crate::types::{MessageRecord, Provenance};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Paged message history for one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePages {
    pub pages: Vec<Vec<MessageRecord>>,
}

impl MessagePages {
    /// History holding exactly one record on a single page.
    pub fn single(record: MessageRecord) -> Self {
        Self {
            pages: vec![vec![record]],
        }
    }

    /// Total number of records across pages.
    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&MessageRecord> {
        self.find(id).map(|(p, i)| &self.pages[p][i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut MessageRecord> {
        let (p, i) = self.find(id)?;
        Some(&mut self.pages[p][i])
    }

    /// Append to the newest page, creating it if there are no pages.
    pub fn push_newest(&mut self, record: MessageRecord) {
        match self.pages.first_mut() {
            Some(page) => page.push(record),
            None => self.pages.push(vec![record]),
        }
    }

    /// Overwrite the record with id `id` in place. Returns `false` if absent.
    pub fn replace(&mut self, id: &str, record: MessageRecord) -> bool {
        match self.get_mut(id) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        }
    }

    /// Remove the record with id `id`.
    pub fn remove(&mut self, id: &str) -> Option<MessageRecord> {
        let (p, i) = self.find(id)?;
        Some(self.pages[p].remove(i))
    }

    /// Set the provenance of the record with id `id`.
    pub fn mark(&mut self, id: &str, provenance: Provenance) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.provenance = provenance;
                true
            }
            None => false,
        }
    }

    /// Iterate all records, newest page first.
    pub fn iter(&self) -> impl Iterator<Item = &MessageRecord> {
        self.pages.iter().flatten()
    }

    fn find(&self, id: &str) -> Option<(usize, usize)> {
        self.pages.iter().enumerate().find_map(|(p, page)| {
            page.iter().position(|r| r.id == id).map(|i| (p, i))
        })
    }
}

/// Externally owned message store keyed by channel identity.
///
/// `patch` must apply the closure atomically with respect to other patches
/// of the same channel.
pub trait MessageCache: Send + Sync {
    /// Mutate the history of `channel`. `None` means nothing is cached yet;
    /// leaving `Some` in the slot stores it.
    fn patch(&self, channel: &ChannelIdentity, f: &mut dyn FnMut(&mut Option<MessagePages>));

    /// Current history of `channel`.
    fn snapshot(&self, channel: &ChannelIdentity) -> Option<MessagePages>;
}

/// In-process cache, for tests and simple consumers.
#[derive(Debug, Default)]
pub struct InMemoryMessageCache {
    channels: RwLock<HashMap<ChannelIdentity, MessagePages>>,
}

impl InMemoryMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a channel's history.
    pub fn insert(&self, channel: ChannelIdentity, pages: MessagePages) {
        self.channels.write().insert(channel, pages);
    }
}

impl MessageCache for InMemoryMessageCache {
    fn patch(&self, channel: &ChannelIdentity, f: &mut dyn FnMut(&mut Option<MessagePages>)) {
        let mut channels = self.channels.write();
        let mut slot = channels.remove(channel);
        f(&mut slot);
        if let Some(pages) = slot {
            channels.insert(channel.clone(), pages);
        }
    }

    fn snapshot(&self, channel: &ChannelIdentity) -> Option<MessagePages> {
        self.channels.read().get(channel).cloned()
    }
}
