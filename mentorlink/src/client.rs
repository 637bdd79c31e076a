//! Async front end for a [`ConnectionController`].
//!
//! [`LinkBuilder::spawn`] moves the controller into a driver task that owns
//! it exclusively. The task waits on consumer requests, transport events and
//! the controller's next timer deadline, handles one input at a time and
//! publishes a fresh [`ConnectionSnapshot`] after each.

use crate::cache::{InMemoryMessageCache, MessageCache};
use crate::channel::ChannelIdentity;
use crate::config::LinkConfig;
use crate::controller::ConnectionController;
use crate::credentials::TokenProvider;
use crate::dispatch::{Dispatcher, GamificationBus, NoopDispatcher};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportNotice, WsTransport};
use crate::types::*;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info};

enum Request {
    SelectChannel(Option<ChannelIdentity>),
    Send {
        content: String,
        reply: oneshot::Sender<Result<MessageRecord>>,
    },
    SetTyping(bool),
    Reconnect,
    Shutdown,
}

/// Builder for a [`LinkHandle`].
///
/// # Example
///
/// ```rust,no_run
/// use mentorlink::{ChannelIdentity, Credential, LinkBuilder, LinkConfig};
///
/// # async fn run() -> mentorlink::Result<()> {
/// let link = LinkBuilder::new(Credential::new("jwt"))
///     .config(LinkConfig::builder().host("api.example.com").build())
///     .spawn();
///
/// link.select_channel(Some(ChannelIdentity::conversation("42")))?;
/// # Ok(())
/// # }
/// ```
pub struct LinkBuilder {
    config: LinkConfig,
    credentials: Arc<dyn TokenProvider>,
    cache: Arc<dyn MessageCache>,
    dispatcher: Arc<dyn Dispatcher>,
    transport: Arc<dyn Transport>,
    bus: GamificationBus,
}

impl LinkBuilder {
    pub fn new(credentials: impl TokenProvider + 'static) -> Self {
        Self::with_credentials(Arc::new(credentials))
    }

    /// Use a shared token provider.
    pub fn with_credentials(credentials: Arc<dyn TokenProvider>) -> Self {
        Self {
            config: LinkConfig::default(),
            credentials,
            cache: Arc::new(InMemoryMessageCache::new()),
            dispatcher: Arc::new(NoopDispatcher),
            transport: Arc::new(WsTransport::new()),
            bus: GamificationBus::new(),
        }
    }

    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Message cache shared with the consumer. Defaults to an in-memory cache.
    pub fn cache(mut self, cache: Arc<dyn MessageCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Replace the WebSocket transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn bus(mut self, bus: GamificationBus) -> Self {
        self.bus = bus;
        self
    }

    /// Start the driver task. Must be called from within a tokio runtime.
    pub fn spawn(self) -> LinkHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        let controller = ConnectionController::new(
            self.config,
            self.credentials,
            self.transport,
            events_tx,
            self.cache.clone(),
            self.dispatcher,
            self.bus.clone(),
        );
        let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot(Instant::now()));

        tokio::spawn(drive(controller, requests_rx, events_rx, snapshot_tx));

        LinkHandle {
            requests: requests_tx,
            snapshot: snapshot_rx,
            bus: self.bus,
            cache: self.cache,
        }
    }
}

/// Consumer handle to a running connection.
///
/// Cloning is cheap. The driver stops and closes its transport once every
/// handle is dropped.
#[derive(Clone)]
pub struct LinkHandle {
    requests: mpsc::UnboundedSender<Request>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    bus: GamificationBus,
    cache: Arc<dyn MessageCache>,
}

impl LinkHandle {
    /// Switch to `channel`, or disconnect with `None`.
    pub fn select_channel(&self, channel: Option<ChannelIdentity>) -> Result<()> {
        self.request(Request::SelectChannel(channel))
    }

    /// Send a user message.
    ///
    /// Resolves once the frame is queued on the transport, returning the
    /// provisional record shown in the cache. Fails with
    /// [`Error::NotConnected`] unless the channel is open.
    pub async fn send(&self, content: impl Into<String>) -> Result<MessageRecord> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Send {
            content: content.into(),
            reply,
        })?;
        rx.await.map_err(|_| Error::DriverStopped)?
    }

    /// Tell the peer whether the user is typing. Ignored unless open.
    pub fn set_typing_status(&self, is_typing: bool) {
        let _ = self.request(Request::SetTyping(is_typing));
    }

    /// Reconnect now with a fresh backoff, e.g. after an access error.
    pub fn reconnect(&self) -> Result<()> {
        self.request(Request::Reconnect)
    }

    /// Close the transport and stop the driver.
    pub fn shutdown(&self) {
        let _ = self.request(Request::Shutdown);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot.borrow().status
    }

    pub fn error(&self) -> Option<ConnectionFault> {
        self.snapshot.borrow().error.clone()
    }

    /// Wait for the next published snapshot.
    pub async fn changed(&mut self) -> Result<ConnectionSnapshot> {
        self.snapshot.changed().await.map_err(|_| Error::DriverStopped)?;
        Ok(self.snapshot.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `predicate`, including the current one.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&ConnectionSnapshot) -> bool,
    ) -> Result<ConnectionSnapshot> {
        self.snapshot
            .wait_for(predicate)
            .await
            .map(|snapshot| snapshot.clone())
            .map_err(|_| Error::DriverStopped)
    }

    pub fn subscribe_gamification(&self) -> broadcast::Receiver<GamificationUpdate> {
        self.bus.subscribe()
    }

    pub fn cache(&self) -> Arc<dyn MessageCache> {
        self.cache.clone()
    }

    fn request(&self, request: Request) -> Result<()> {
        self.requests.send(request).map_err(|_| Error::DriverStopped)
    }
}

async fn drive(
    mut controller: ConnectionController,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut events: mpsc::UnboundedReceiver<TransportNotice>,
    snapshot: watch::Sender<ConnectionSnapshot>,
) {
    debug!("connection driver started");

    loop {
        let deadline = controller.next_deadline();
        let timer = async move {
            match deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            request = requests.recv() => match request {
                Some(Request::Shutdown) | None => {
                    controller.shutdown();
                    publish(&controller, &snapshot);
                    break;
                }
                Some(request) => apply(&mut controller, request),
            },
            Some(notice) = events.recv() => controller.on_transport_event(notice, Instant::now()),
            _ = timer => controller.poll_timers(Instant::now()),
        }

        publish(&controller, &snapshot);
    }

    info!("connection driver stopped");
}

fn apply(controller: &mut ConnectionController, request: Request) {
    match request {
        Request::SelectChannel(channel) => controller.select_channel(channel, Instant::now()),
        Request::Send { content, reply } => {
            let _ = reply.send(controller.send(&content, Instant::now()));
        }
        Request::SetTyping(is_typing) => controller.set_typing_status(is_typing),
        Request::Reconnect => controller.reconnect_now(Instant::now()),
        Request::Shutdown => controller.shutdown(),
    }
}

fn publish(controller: &ConnectionController, tx: &watch::Sender<ConnectionSnapshot>) {
    let next = controller.snapshot(Instant::now());
    tx.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}
