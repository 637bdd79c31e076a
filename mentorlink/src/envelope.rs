//! Wire envelopes exchanged over the socket.
//!
//! Every frame is one JSON object discriminated by its `type` field.

use crate::error::{Error, Result};
use crate::types::*;
use serde::{Deserialize, Serialize};

/// A full message record delivered by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message: MessageRecord,
    /// Echo of the client's temporary id when the server confirms a send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

/// Inbound frame from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<serde_json::Value>,
    },
    ConnectionEstablished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ChatMessage(MessageEnvelope),
    AiResponseBroadcast(MessageEnvelope),
    StreamStart {
        message_id: String,
    },
    StreamChunk {
        message_id: String,
        content: String,
    },
    StreamComplete {
        message_id: String,
        message: MessageRecord,
    },
    StreamError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AgentStart(AgentStart),
    TypingStatus {
        is_typing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    PlanUpdate(PlanUpdate),
    AgentRuntime(AgentRuntimeStep),
    InsightGenerated(Insight),
    MissingInformation(MissingInformation),
    GamificationUpdate(GamificationUpdate),
}

/// Every inbound `type` this layer understands.
pub const INBOUND_TYPES: &[&str] = &[
    "pong",
    "connection_established",
    "chat_message",
    "ai_response_broadcast",
    "stream_start",
    "stream_chunk",
    "stream_complete",
    "stream_error",
    "agent_start",
    "typing_status",
    "plan_update",
    "agent_runtime",
    "insight_generated",
    "missing_information",
    "gamification_update",
];

impl InboundEnvelope {
    /// Wire name of this envelope's type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pong { .. } => "pong",
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::ChatMessage(_) => "chat_message",
            Self::AiResponseBroadcast(_) => "ai_response_broadcast",
            Self::StreamStart { .. } => "stream_start",
            Self::StreamChunk { .. } => "stream_chunk",
            Self::StreamComplete { .. } => "stream_complete",
            Self::StreamError { .. } => "stream_error",
            Self::AgentStart(_) => "agent_start",
            Self::TypingStatus { .. } => "typing_status",
            Self::PlanUpdate(_) => "plan_update",
            Self::AgentRuntime(_) => "agent_runtime",
            Self::InsightGenerated(_) => "insight_generated",
            Self::MissingInformation(_) => "missing_information",
            Self::GamificationUpdate(_) => "gamification_update",
        }
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Known(InboundEnvelope),
    /// Well-formed JSON with a `type` this layer does not handle.
    Unknown(String),
}

/// Parse one raw text frame.
///
/// Malformed JSON, a missing `type`, or a known type with the wrong shape are
/// errors. An unrecognized `type` is not.
pub fn parse_frame(raw: &str) -> Result<Frame> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(Error::MissingFrameType)?;

    if !INBOUND_TYPES.contains(&kind) {
        return Ok(Frame::Unknown(kind.to_string()));
    }

    let kind = kind.to_string();
    serde_json::from_value(value)
        .map(Frame::Known)
        .map_err(|source| Error::InvalidFrame { kind, source })
}

/// Outbound frame to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    Ping,
    StreamingMessage { content: String, temp_id: String },
    TypingStatus { is_typing: bool },
}

impl OutboundEnvelope {
    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
