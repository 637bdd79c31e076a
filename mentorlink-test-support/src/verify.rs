//! Message cache verification.

use mentorlink::{ChannelIdentity, MessageCache, MessagePages, Provenance};
use std::collections::HashSet;

/// Checks one channel's cached history for the invariants the connection
/// layer promises: one record per logical message, expected content order.
pub struct CacheVerifier {
    channel: ChannelIdentity,
    expected: Vec<String>,
}

impl CacheVerifier {
    pub fn new(channel: ChannelIdentity) -> Self {
        Self {
            channel,
            expected: Vec::new(),
        }
    }

    /// Expect a message with `content`, in the order messages were exchanged.
    pub fn expect(mut self, content: &str) -> Self {
        self.expected.push(content.to_string());
        self
    }

    /// Verify the cache's current state.
    pub fn verify(&self, cache: &dyn MessageCache) -> VerifyResult {
        let Some(pages) = cache.snapshot(&self.channel) else {
            return if self.expected.is_empty() {
                VerifyResult::Ok
            } else {
                VerifyResult::Missing {
                    content: self.expected[0].clone(),
                }
            };
        };

        let mut seen = HashSet::new();
        for record in pages.iter() {
            if !seen.insert(record.id.clone()) {
                return VerifyResult::Duplicate { id: record.id.clone() };
            }
        }

        // Pages are newest first; records within a page are chronological.
        let actual: Vec<String> = chronological(&pages).into_iter().map(|r| r.content.clone()).collect();
        for content in &self.expected {
            if !actual.contains(content) {
                return VerifyResult::Missing {
                    content: content.clone(),
                };
            }
        }
        let relevant: Vec<&String> = actual.iter().filter(|c| self.expected.contains(*c)).collect();
        let expected: Vec<&String> = self.expected.iter().collect();
        if relevant != expected {
            return VerifyResult::OutOfOrder {
                actual: relevant.into_iter().cloned().collect(),
            };
        }

        VerifyResult::Ok
    }

    pub fn stats(&self, cache: &dyn MessageCache) -> CacheStats {
        let Some(pages) = cache.snapshot(&self.channel) else {
            return CacheStats::default();
        };
        let mut stats = CacheStats {
            pages: pages.pages.len(),
            ..CacheStats::default()
        };
        for record in pages.iter() {
            stats.records += 1;
            match record.provenance {
                Provenance::Pending => stats.pending += 1,
                Provenance::Confirmed => stats.confirmed += 1,
                Provenance::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

fn chronological(pages: &MessagePages) -> Vec<&mentorlink::MessageRecord> {
    pages.pages.iter().rev().flatten().collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Ok,
    Duplicate { id: String },
    Missing { content: String },
    OutOfOrder { actual: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub pages: usize,
    pub records: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub failed: usize,
}
