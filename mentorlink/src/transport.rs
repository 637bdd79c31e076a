//! Bidirectional text-frame transport.
//!
//! A [`Transport`] opens one socket per call and reports its lifecycle as
//! [`TransportNotice`]s tagged with the [`TransportId`] the controller chose.
//! The controller uses the id to drop events from transports it has already
//! abandoned.

use crate::error::{Error, Result};
use crate::reconnect::CLOSE_ABNORMAL;
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

/// Identifies one opened transport. Never reused within a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Lifecycle callback from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    /// One inbound text frame.
    Frame(String),
    /// The transport ended. `code` is `None` when no close frame was seen.
    Closed { code: Option<u16>, reason: String },
    /// Non-terminal error report. A `Closed` always follows a fatal one.
    Error(String),
}

/// A [`TransportEvent`] with the id of the transport that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportNotice {
    pub id: TransportId,
    pub event: TransportEvent,
}

/// A frame queued for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Sending half of an opened transport.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    id: TransportId,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl TransportHandle {
    pub fn new(id: TransportId, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    /// Queue a text frame. Fails if the writer is gone or its queue is full.
    pub fn send(&self, text: String) -> Result<()> {
        self.outbound
            .try_send(OutboundFrame::Text(text))
            .map_err(|_| Error::NotConnected)
    }

    /// Ask the writer to close with `code`. Best effort.
    pub fn close(&self, code: u16, reason: &str) {
        let frame = OutboundFrame::Close {
            code,
            reason: reason.to_string(),
        };
        if self.outbound.try_send(frame).is_err() {
            debug!(transport = %self.id, "close dropped; writer already gone");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Opens transports.
pub trait Transport: Send + Sync + 'static {
    /// Start connecting to `url`. Every lifecycle event for the new transport
    /// is sent on `events` tagged with `id`.
    fn open(
        &self,
        id: TransportId,
        url: Url,
        queue: usize,
        events: mpsc::UnboundedSender<TransportNotice>,
    ) -> TransportHandle;
}

/// WebSocket transport on tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(
        &self,
        id: TransportId,
        url: Url,
        queue: usize,
        events: mpsc::UnboundedSender<TransportNotice>,
    ) -> TransportHandle {
        let (tx, rx) = mpsc::channel::<OutboundFrame>(queue.max(1));
        tokio::spawn(run_socket(id, url, rx, events));
        TransportHandle::new(id, tx)
    }
}

async fn run_socket(
    id: TransportId,
    url: Url,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    events: mpsc::UnboundedSender<TransportNotice>,
) {
    let emit = |event: TransportEvent| {
        // The controller may be gone; nobody is left to tell.
        let _ = events.send(TransportNotice { id, event });
    };

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!(transport = %id, error = %e, "websocket connect failed");
            emit(TransportEvent::Error(e.to_string()));
            emit(TransportEvent::Closed {
                code: Some(CLOSE_ABNORMAL),
                reason: "connect failed".to_string(),
            });
            return;
        }
    };

    debug!(transport = %id, "websocket open");
    emit(TransportEvent::Opened);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(e) = write.send(WsMessage::Text(text)).await {
                        warn!(transport = %id, error = %e, "websocket write failed");
                        emit(TransportEvent::Error(e.to_string()));
                        emit(TransportEvent::Closed { code: Some(CLOSE_ABNORMAL), reason: e.to_string() });
                        break;
                    }
                }
                Some(OutboundFrame::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = write.send(WsMessage::Close(Some(frame))).await;
                    let _ = write.close().await;
                    emit(TransportEvent::Closed { code: Some(code), reason });
                    break;
                }
                None => {
                    // Every handle dropped.
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => emit(TransportEvent::Frame(text)),
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    debug!(transport = %id, ?code, "websocket closed by peer");
                    emit(TransportEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(transport = %id, error = %e, "websocket read failed");
                    emit(TransportEvent::Error(e.to_string()));
                    emit(TransportEvent::Closed { code: Some(CLOSE_ABNORMAL), reason: e.to_string() });
                    break;
                }
                None => {
                    emit(TransportEvent::Closed { code: Some(CLOSE_ABNORMAL), reason: "stream ended".to_string() });
                    break;
                }
            }
        }
    }
}
