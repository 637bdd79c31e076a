//! Scripted in-memory transport.
//!
//! Every `open` is recorded. The test then plays the server: it emits
//! lifecycle events for a given transport id and drains what the client
//! wrote to it.

use mentorlink::{OutboundFrame, Transport, TransportEvent, TransportHandle, TransportId, TransportNotice};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use url::Url;

struct Socket {
    id: TransportId,
    url: Url,
    events: mpsc::UnboundedSender<TransportNotice>,
    outbound: mpsc::Receiver<OutboundFrame>,
}

/// In-memory transport driven by the test.
#[derive(Default)]
pub struct ScriptedTransport {
    sockets: Mutex<Vec<Socket>>,
    opened: Notify,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transports opened so far.
    pub fn open_count(&self) -> usize {
        self.sockets.lock().len()
    }

    /// Wait until at least `n` transports were opened; returns the id of the `n`th.
    pub async fn wait_for_open(&self, n: usize) -> TransportId {
        assert!(n > 0, "transports are counted from 1");
        loop {
            let notified = self.opened.notified();
            if let Some(socket) = self.sockets.lock().get(n - 1) {
                return socket.id;
            }
            notified.await;
        }
    }

    /// URL the `n`th transport (from 1) was opened with.
    pub fn url(&self, n: usize) -> Url {
        self.sockets.lock()[n - 1].url.clone()
    }

    pub fn last_id(&self) -> Option<TransportId> {
        self.sockets.lock().last().map(|s| s.id)
    }

    /// Deliver `event` as if transport `id` raised it.
    pub fn emit(&self, id: TransportId, event: TransportEvent) {
        let sockets = self.sockets.lock();
        if let Some(socket) = sockets.iter().find(|s| s.id == id) {
            let _ = socket.events.send(TransportNotice { id, event });
        }
    }

    /// Socket open followed by the server's `connection_established`.
    pub fn accept(&self, id: TransportId) {
        self.emit(id, TransportEvent::Opened);
        self.frame(id, r#"{"type":"connection_established","message":"ok"}"#);
    }

    pub fn frame(&self, id: TransportId, text: &str) {
        self.emit(id, TransportEvent::Frame(text.to_string()));
    }

    pub fn close(&self, id: TransportId, code: u16) {
        self.emit(
            id,
            TransportEvent::Closed {
                code: Some(code),
                reason: String::new(),
            },
        );
    }

    /// Drain everything the client has written to transport `id`.
    pub fn outbound(&self, id: TransportId) -> Vec<OutboundFrame> {
        let mut sockets = self.sockets.lock();
        let mut frames = Vec::new();
        if let Some(socket) = sockets.iter_mut().find(|s| s.id == id) {
            while let Ok(frame) = socket.outbound.try_recv() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Drained outbound text frames parsed as JSON.
    pub fn outbound_json(&self, id: TransportId) -> Vec<serde_json::Value> {
        self.outbound(id)
            .into_iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Text(text) => serde_json::from_str(&text).ok(),
                OutboundFrame::Close { .. } => None,
            })
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn open(
        &self,
        id: TransportId,
        url: Url,
        queue: usize,
        events: mpsc::UnboundedSender<TransportNotice>,
    ) -> TransportHandle {
        let (tx, rx) = mpsc::channel(queue.max(1));
        tracing::debug!(transport = %id, %url, "scripted transport opened");
        self.sockets.lock().push(Socket {
            id,
            url,
            events,
            outbound: rx,
        });
        self.opened.notify_waiters();
        TransportHandle::new(id, tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_opens_and_outbound() {
        let transport = ScriptedTransport::new();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let url = Url::parse("ws://localhost:8000/ws/chat/1/?token=t").unwrap();

        let handle = transport.open(TransportId(1), url.clone(), 8, events_tx);
        handle.send(r#"{"type":"ping"}"#.to_string()).unwrap();

        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.url(1), url);
        assert_eq!(transport.outbound_json(TransportId(1))[0]["type"], "ping");

        transport.close(TransportId(1), 1006);
        let notice = events_rx.try_recv().unwrap();
        assert_eq!(notice.id, TransportId(1));
        assert!(matches!(notice.event, TransportEvent::Closed { code: Some(1006), .. }));
    }
}
