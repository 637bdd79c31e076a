//! MentorLink real-time connection layer
//!
//! Client-side WebSocket plumbing for the mentoring chat backend: one logical
//! channel at a time, application-level heartbeats, capped exponential
//! reconnection, streamed assistant replies and optimistic sends reconciled
//! against the server's copy.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mentorlink::{ChannelIdentity, ConnectionStatus, Credential, LinkBuilder, LinkConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = LinkConfig::builder().host("api.example.com").build();
//!     let mut link = LinkBuilder::new(Credential::new("jwt-token"))
//!         .config(config)
//!         .spawn();
//!
//!     // Connect to a conversation
//!     link.select_channel(Some(ChannelIdentity::conversation("42")))?;
//!     link.wait_for(|s| s.status == ConnectionStatus::Open).await?;
//!
//!     // Shown immediately, confirmed when the server echoes it back
//!     let provisional = link.send("How much should I save each month?").await?;
//!     println!("sent as {}", provisional.id);
//!
//!     // Follow the streamed reply
//!     while let Ok(snapshot) = link.changed().await {
//!         if let Some(text) = &snapshot.streaming_text {
//!             println!("assistant: {}", text);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

mod cache;
mod channel;
mod client;
mod config;
mod controller;
mod credentials;
mod dispatch;
mod envelope;
mod error;
mod heartbeat;
mod reconcile;
mod reconnect;
mod router;
mod stream;
mod transport;
mod types;
mod typing;

pub use cache::{InMemoryMessageCache, MessageCache, MessagePages};
pub use channel::{ChannelIdentity, ChannelKind};
pub use client::{LinkBuilder, LinkHandle};
pub use config::{LinkConfig, LinkConfigBuilder, DEFAULT_CONNECT_TIMEOUT};
pub use controller::{ConnectionController, CLOSE_NORMAL};
pub use credentials::{Credential, NoCredential, TokenProvider};
pub use dispatch::{Dispatcher, GamificationBus, NoopDispatcher};
pub use envelope::{parse_frame, Frame, InboundEnvelope, MessageEnvelope, OutboundEnvelope, INBOUND_TYPES};
pub use error::{Error, Result};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
pub use reconcile::{OptimisticReconciler, PendingMessage, PendingPolicy, Reconciled};
pub use reconnect::{
    ReconnectConfig, ReconnectDecision, ReconnectScheduler, CLOSE_ABNORMAL, CLOSE_FORBIDDEN, CLOSE_UNAUTHORIZED,
};
pub use router::{EventRouter, Signal};
pub use stream::{Completion, StreamAssembler};
pub use transport::{OutboundFrame, Transport, TransportEvent, TransportHandle, TransportId, TransportNotice, WsTransport};
pub use types::*;
pub use typing::{TypingIndicator, DEFAULT_TYPING_WINDOW};
