//! Type definitions shared across the connection layer.

use crate::channel::ChannelIdentity;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// Connection state
// ============================================================================

/// Lifecycle status of a channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No channel selected.
    #[default]
    Idle,
    /// Transport created, handshake not yet acknowledged.
    Connecting,
    /// Handshake acknowledged; frames flow both ways.
    Open,
    /// Transport ended without a fatal classification.
    Closed,
    /// Transport ended fatally or could not be initialized. No automatic retry.
    Error,
}

/// Why the connection is in a degraded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// No token could be obtained before opening.
    MissingCredential,
    /// Server closed with an authorization close code.
    AccessRevoked { code: u16 },
    /// The transport URL could not be built.
    InvalidUrl,
    /// Transient transport failure; a retry is pending.
    Transient,
}

/// Consumer-facing description of the current fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFault {
    pub kind: FaultKind,
    pub message: String,
}

impl ConnectionFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the user has to reconnect manually or re-authenticate.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind, FaultKind::Transient)
    }
}

/// A scheduled automatic reconnection, shown as "Reconnecting...".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectIndicator {
    pub attempt: u32,
    pub delay: Duration,
}

/// Observable view of one controller, published after every processed input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionSnapshot {
    pub channel: Option<ChannelIdentity>,
    pub status: ConnectionStatus,
    pub error: Option<ConnectionFault>,
    pub reconnect: Option<ReconnectIndicator>,
    pub reconnect_attempt: u32,
    pub is_streaming: bool,
    pub streaming_text: Option<String>,
    pub is_peer_typing: bool,
    pub active_agent: Option<String>,
    pub last_stream_error: Option<String>,
}

// ============================================================================
// Messages
// ============================================================================

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
    System,
    #[serde(other)]
    Other,
}

/// Whether a cached record has been confirmed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Shown optimistically, awaiting the server's copy.
    Pending,
    /// Authoritative server record.
    #[default]
    Confirmed,
    /// Confirmation never arrived within the configured window.
    Failed,
}

/// One chat message as held in the message cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub sender: Sender,
    #[serde(default)]
    pub content: String,
    /// Unix timestamp in milliseconds.
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub provenance: Provenance,
    /// Server fields this layer does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MessageRecord {
    /// A provisional record for a message the user just sent.
    pub fn provisional(temp_id: &str, conversation_id: Option<&str>, content: &str) -> Self {
        Self {
            id: temp_id.to_string(),
            conversation_id: conversation_id.map(String::from),
            sender: Sender::User,
            content: content.to_string(),
            created_at: now_millis(),
            provenance: Provenance::Pending,
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.provenance == Provenance::Pending
    }
}

// ============================================================================
// Agent and plan events
// ============================================================================

/// The backend routed the conversation to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStart {
    pub agent: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Plan-build progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanUpdate {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// De-duplication key for the plan-progress store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Intermediate execution-trace step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRuntimeStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A generated insight for the insights feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The backend needs more information from the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingInformation {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// Gamification
// ============================================================================

/// Gamification event sub-kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamificationKind {
    LevelUp,
    BadgeEarned,
    StreakMilestone,
    XpGained,
    #[serde(other)]
    Other,
}

impl GamificationKind {
    /// Sub-kinds that also raise a toast.
    pub fn is_celebration(&self) -> bool {
        matches!(self, Self::LevelUp | Self::BadgeEarned | Self::StreakMilestone)
    }
}

/// Gamification update, broadcast to celebration subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamificationUpdate {
    #[serde(alias = "event_type")]
    pub kind: GamificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// Toasts
// ============================================================================

/// Toast severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Warning,
    Celebration,
}

/// A transient notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub title: String,
    pub body: String,
}

impl Toast {
    pub fn new(kind: ToastKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
