//! Incremental reassembly of one server-generated message.

use crate::types::MessageRecord;

/// Result of a `stream_complete` signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Final full record, to be written to the cache once.
    pub record: MessageRecord,
    /// Whether the completion ended the stream currently being assembled.
    pub ended_current: bool,
}

/// Accumulates chunk text for the stream currently in flight.
///
/// `content == None` means no stream is in flight.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    stream_id: Option<String>,
    content: Option<String>,
    /// Last stream that completed or was abandoned; its late chunks are dropped.
    finished: Option<String>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking `stream_id`, abandoning any previous generation.
    pub fn start(&mut self, stream_id: &str) {
        if let Some(previous) = self.stream_id.as_deref().filter(|id| *id != stream_id) {
            tracing::debug!(previous, stream_id, "new stream supersedes unfinished one");
        }
        if self.finished.as_deref() == Some(stream_id) {
            self.finished = None;
        }
        self.stream_id = Some(stream_id.to_string());
        self.content = Some(String::new());
    }

    /// Append a chunk. Returns `false` if the chunk belongs to another stream.
    ///
    /// A chunk arriving while nothing is tracked adopts its stream id, unless
    /// that stream already finished.
    pub fn push_chunk(&mut self, stream_id: &str, chunk: &str) -> bool {
        match self.stream_id.as_deref() {
            Some(current) if current != stream_id => {
                tracing::debug!(current, stream_id, "ignoring chunk from stale stream");
                false
            }
            None if self.finished.as_deref() == Some(stream_id) => {
                tracing::debug!(stream_id, "ignoring chunk after stream ended");
                false
            }
            Some(_) => {
                self.content.get_or_insert_with(String::new).push_str(chunk);
                true
            }
            None => {
                self.stream_id = Some(stream_id.to_string());
                self.content.get_or_insert_with(String::new).push_str(chunk);
                true
            }
        }
    }

    /// Finish a stream and hand back its authoritative record.
    ///
    /// Assembly state is cleared only if `stream_id` is the tracked stream
    /// (or nothing is tracked).
    pub fn complete(&mut self, stream_id: &str, record: MessageRecord) -> Completion {
        let ended_current = self.is_current(stream_id);
        if ended_current {
            self.reset();
            self.finished = Some(stream_id.to_string());
        }
        Completion { record, ended_current }
    }

    /// Abort a stream. `None` aborts whatever is in flight.
    ///
    /// Returns `true` if accumulated content was discarded.
    pub fn fail(&mut self, stream_id: Option<&str>) -> bool {
        let matches = stream_id.map_or(true, |id| self.is_current(id));
        if matches && self.is_streaming() {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Drop all assembly state. The abandoned stream counts as finished.
    pub fn reset(&mut self) {
        if let Some(id) = self.stream_id.take() {
            self.finished = Some(id);
        }
        self.content = None;
    }

    pub fn is_streaming(&self) -> bool {
        self.content.is_some()
    }

    /// Text assembled so far.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    fn is_current(&self, stream_id: &str) -> bool {
        self.stream_id.as_deref().map_or(true, |id| id == stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Provenance, Sender};

    fn record(id: &str, content: &str) -> MessageRecord {
        MessageRecord {
            id: id.into(),
            conversation_id: None,
            sender: Sender::Assistant,
            content: content.into(),
            created_at: 1,
            provenance: Provenance::Confirmed,
            extra: Default::default(),
        }
    }

    #[test]
    fn test_hi_there() {
        let mut s = StreamAssembler::new();
        s.start("m1");
        assert!(s.push_chunk("m1", "Hi"));
        assert!(s.push_chunk("m1", " there"));
        assert_eq!(s.text(), Some("Hi there"));
        assert!(s.is_streaming());
    }

    #[test]
    fn test_start_begins_empty() {
        let mut s = StreamAssembler::new();
        assert!(!s.is_streaming());
        s.start("m1");
        assert_eq!(s.text(), Some(""));
        assert_eq!(s.stream_id(), Some("m1"));
    }

    #[test]
    fn test_cross_talk_ignored() {
        let mut s = StreamAssembler::new();
        s.start("m2");
        assert!(!s.push_chunk("m1", "stale"));
        assert!(s.push_chunk("m2", "fresh"));
        assert_eq!(s.text(), Some("fresh"));
    }

    #[test]
    fn test_chunk_without_start_adopts_id() {
        let mut s = StreamAssembler::new();
        assert!(s.push_chunk("m9", "a"));
        assert!(!s.push_chunk("m8", "b"));
        assert_eq!(s.stream_id(), Some("m9"));
        assert_eq!(s.text(), Some("a"));
    }

    #[test]
    fn test_restart_discards_previous_generation() {
        let mut s = StreamAssembler::new();
        s.start("m1");
        s.push_chunk("m1", "old");
        s.start("m2");
        assert_eq!(s.text(), Some(""));
        assert!(!s.push_chunk("m1", "straggler"));
    }

    #[test]
    fn test_complete_current() {
        let mut s = StreamAssembler::new();
        s.start("m1");
        s.push_chunk("m1", "Hi");
        let done = s.complete("m1", record("m1", "Hi"));
        assert!(done.ended_current);
        assert_eq!(done.record.content, "Hi");
        assert!(!s.is_streaming());
        assert_eq!(s.stream_id(), None);
    }

    #[test]
    fn test_late_chunk_after_complete_ignored() {
        let mut s = StreamAssembler::new();
        s.start("m1");
        s.push_chunk("m1", "Hi");
        s.complete("m1", record("m1", "Hi"));

        assert!(!s.push_chunk("m1", "late"));
        assert!(!s.is_streaming());
        assert_eq!(s.text(), None);

        // A new generation is still adopted.
        assert!(s.push_chunk("m2", "next"));
        assert_eq!(s.stream_id(), Some("m2"));
    }

    #[test]
    fn test_late_chunk_after_fail_ignored() {
        let mut s = StreamAssembler::new();
        s.start("m1");
        s.push_chunk("m1", "partial");
        assert!(s.fail(None));
        assert!(!s.push_chunk("m1", "more"));
        assert!(!s.is_streaming());
    }

    #[test]
    fn test_complete_stale_keeps_current() {
        let mut s = StreamAssembler::new();
        s.start("m2");
        s.push_chunk("m2", "going");
        let done = s.complete("m1", record("m1", "old answer"));
        assert!(!done.ended_current);
        assert_eq!(s.text(), Some("going"));
    }

    #[test]
    fn test_fail_discards() {
        let mut s = StreamAssembler::new();
        s.start("m1");
        s.push_chunk("m1", "partial");
        assert!(!s.fail(Some("other")));
        assert!(s.fail(Some("m1")));
        assert_eq!(s.text(), None);
        assert!(!s.fail(None));
    }
}
