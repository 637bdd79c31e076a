//! Chaos utilities for inbound frame streams: random chunking, duplicate
//! delivery and junk frames.

use rand::Rng;

/// What to do with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChaosEvent {
    /// Deliver the frame twice.
    Duplicate,
    /// Deliver a malformed frame first.
    Garbage,
    /// Deliver a frame with an unknown `type` first.
    UnknownType,
    /// Pass through unchanged.
    None,
}

/// Chaos monkey for inbound frames.
///
/// # Example
///
/// ```
/// use mentorlink_test_support::chaos::ChaosMonkey;
///
/// let mut monkey = ChaosMonkey::new().with_duplicate_probability(0.1);
/// let chunks = monkey.split_chunks("Hello there", 4);
/// assert_eq!(chunks.concat(), "Hello there");
/// ```
pub struct ChaosMonkey {
    duplicate_probability: f64,
    garbage_probability: f64,
    unknown_probability: f64,
    rng: rand::rngs::ThreadRng,
    events_triggered: usize,
}

impl Default for ChaosMonkey {
    fn default() -> Self {
        Self::new()
    }
}

impl ChaosMonkey {
    pub fn new() -> Self {
        Self {
            duplicate_probability: 0.0,
            garbage_probability: 0.0,
            unknown_probability: 0.0,
            rng: rand::thread_rng(),
            events_triggered: 0,
        }
    }

    /// Junk and unknown frames, but no duplicates.
    pub fn noisy() -> Self {
        Self::new()
            .with_garbage_probability(0.1)
            .with_unknown_probability(0.1)
    }

    pub fn with_duplicate_probability(mut self, prob: f64) -> Self {
        self.duplicate_probability = prob.clamp(0.0, 1.0);
        self
    }

    pub fn with_garbage_probability(mut self, prob: f64) -> Self {
        self.garbage_probability = prob.clamp(0.0, 1.0);
        self
    }

    pub fn with_unknown_probability(mut self, prob: f64) -> Self {
        self.unknown_probability = prob.clamp(0.0, 1.0);
        self
    }

    /// Split `text` into random non-empty pieces of at most `max_len` chars.
    pub fn split_chunks(&mut self, text: &str, max_len: usize) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let max_len = max_len.max(1);
        let mut chunks = Vec::new();
        let mut pos = 0;
        while pos < chars.len() {
            let len = self.rng.gen_range(1..=max_len).min(chars.len() - pos);
            chunks.push(chars[pos..pos + len].iter().collect());
            pos += len;
        }
        chunks
    }

    /// Decide what chaos event to apply (if any)
    pub fn decide(&mut self) -> ChaosEvent {
        let roll = self.rng.gen::<f64>();
        let mut threshold = 0.0;

        threshold += self.duplicate_probability;
        if roll < threshold {
            self.events_triggered += 1;
            return ChaosEvent::Duplicate;
        }

        threshold += self.garbage_probability;
        if roll < threshold {
            self.events_triggered += 1;
            return ChaosEvent::Garbage;
        }

        threshold += self.unknown_probability;
        if roll < threshold {
            self.events_triggered += 1;
            return ChaosEvent::UnknownType;
        }

        ChaosEvent::None
    }

    /// Run every frame through [`decide`](Self::decide) and return the frames
    /// to deliver, in order.
    pub fn perturb(&mut self, frames: Vec<String>) -> Vec<String> {
        let mut out = Vec::with_capacity(frames.len());
        for frame in frames {
            match self.decide() {
                ChaosEvent::Duplicate => {
                    out.push(frame.clone());
                    out.push(frame);
                }
                ChaosEvent::Garbage => {
                    let cut = self.rng.gen_range(0..=frame.len() / 2);
                    out.push(frame.get(..cut).unwrap_or("{").to_string());
                    out.push(frame);
                }
                ChaosEvent::UnknownType => {
                    out.push(r#"{"type":"telemetry_blip","value":1}"#.to_string());
                    out.push(frame);
                }
                ChaosEvent::None => out.push(frame),
            }
        }
        out
    }

    /// Get number of chaos events triggered
    pub fn events_triggered(&self) -> usize {
        self.events_triggered
    }
}

/// Frames for one complete streamed reply, chunked as given.
pub fn stream_frames(message_id: &str, chunks: &[String]) -> Vec<String> {
    let full: String = chunks.concat();
    let mut frames = vec![serde_json::json!({"type": "stream_start", "message_id": message_id}).to_string()];
    for chunk in chunks {
        frames.push(
            serde_json::json!({"type": "stream_chunk", "message_id": message_id, "content": chunk}).to_string(),
        );
    }
    frames.push(
        serde_json::json!({
            "type": "stream_complete",
            "message_id": message_id,
            "message": {"id": message_id, "sender": "assistant", "content": full},
        })
        .to_string(),
    );
    frames
}
