//! Live channel: the tab's single push subscription.
//!
//! Speaks STOMP over a text pipe supplied by a `Connector`. The worker
//! connects with the bearer token in the CONNECT frame, subscribes to
//! `/topic/notifications/<user>` and forwards every MESSAGE as a
//! `Notification` forced to unread. When the pipe drops it waits a fixed
//! delay and reconnects, forever, until `disconnect()` is called.
//!
//! State: Disconnected -> Connecting -> Connected -> (drop) Connecting -> ...
//! Only `disconnect()` returns it to Disconnected.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use campuslink_protocol::{
    decode_frames, notification_topic, Command, Frame, FrameError, Notification,
    NotificationPayload,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::session::SessionStore;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Broker rejected the connection: {message}")]
    Rejected { message: String },

    #[error("Connection closed")]
    Closed,

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Bidirectional text pipe to the realtime endpoint. Dropping `inbound`'s
/// sender on the far side signals a transport-level disconnect.
pub struct FrameLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Opens transport connections for the live channel
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<FrameLink, ChannelError>> + Send;
}

struct Worker {
    user_id: i64,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The tab's push subscription. Construct one per tab and share it.
pub struct LiveChannel<C> {
    connector: Arc<C>,
    url: String,
    reconnect_delay: Duration,
    session: SessionStore,
    state_tx: Arc<watch::Sender<ChannelState>>,
    worker: Mutex<Option<Worker>>,
}

impl<C: Connector> LiveChannel<C> {
    pub fn new(
        connector: Arc<C>,
        url: impl Into<String>,
        reconnect_delay: Duration,
        session: SessionStore,
    ) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        Self {
            connector,
            url: url.into(),
            reconnect_delay,
            session,
            state_tx: Arc::new(state_tx),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }

    /// Start the subscription for `user_id`.
    ///
    /// A no-op returning false while a subscription is already running.
    /// Every attempt reads the session's current token; `token` only stands
    /// in for the first one. A reconnect with no token in the session ends
    /// the worker in `Disconnected`.
    pub async fn connect(
        &self,
        user_id: i64,
        token: String,
        events: mpsc::Sender<Notification>,
    ) -> bool {
        let mut worker = self.worker.lock().await;
        if let Some(existing) = worker.as_ref() {
            if !existing.handle.is_finished() {
                debug!(
                    component = "channel",
                    event = "channel.connect.already_running",
                    user_id = existing.user_id,
                    "Live channel already connected"
                );
                return false;
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = ChannelTask {
            connector: Arc::clone(&self.connector),
            url: self.url.clone(),
            reconnect_delay: self.reconnect_delay,
            session: self.session.clone(),
            state_tx: Arc::clone(&self.state_tx),
            user_id,
            initial_token: token,
            events,
        };
        let handle = tokio::spawn(task.run(shutdown_rx));

        *worker = Some(Worker {
            user_id,
            shutdown_tx,
            handle,
        });
        true
    }

    /// Tear the subscription down. Called on logout only.
    pub async fn disconnect(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        let _ = worker.shutdown_tx.send(true);
        if let Err(e) = worker.handle.await {
            warn!(
                component = "channel",
                event = "channel.worker.join_failed",
                error = %e,
                "Live channel worker ended abnormally"
            );
        }
        self.state_tx.send_replace(ChannelState::Disconnected);
        info!(
            component = "channel",
            event = "channel.disconnected",
            user_id = worker.user_id,
            "Live channel torn down"
        );
    }
}

enum Exit {
    Shutdown,
    Dropped(ChannelError),
}

struct ChannelTask<C> {
    connector: Arc<C>,
    url: String,
    reconnect_delay: Duration,
    session: SessionStore,
    state_tx: Arc<watch::Sender<ChannelState>>,
    user_id: i64,
    initial_token: String,
    events: mpsc::Sender<Notification>,
}

impl<C: Connector> ChannelTask<C> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let topic = notification_topic(self.user_id);
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            let token = match self.session.token() {
                Some(token) => token,
                None if attempt == 1 => self.initial_token.clone(),
                None => {
                    info!(
                        component = "channel",
                        event = "channel.stopped.logged_out",
                        user_id = self.user_id,
                        "Session has no token, not reconnecting"
                    );
                    break;
                }
            };
            self.state_tx.send_replace(ChannelState::Connecting);

            match self
                .run_once(&token, &topic, &subscription_id, &mut shutdown)
                .await
            {
                Exit::Shutdown => break,
                Exit::Dropped(e) => {
                    warn!(
                        component = "channel",
                        event = "channel.dropped",
                        user_id = self.user_id,
                        attempt,
                        retry_in_ms = self.reconnect_delay.as_millis() as u64,
                        error = %e,
                        "Live channel dropped, reconnecting"
                    );
                }
            }

            self.state_tx.send_replace(ChannelState::Connecting);
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = wait_shutdown(&mut shutdown) => break,
            }
        }

        self.state_tx.send_replace(ChannelState::Disconnected);
    }

    async fn run_once(
        &self,
        token: &str,
        topic: &str,
        subscription_id: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Exit {
        let link = tokio::select! {
            link = self.connector.connect(&self.url) => link,
            _ = wait_shutdown(shutdown) => return Exit::Shutdown,
        };
        let FrameLink {
            outbound,
            mut inbound,
        } = match link {
            Ok(link) => link,
            Err(e) => return Exit::Dropped(e),
        };

        let connect = Frame::connect(&host_of(&self.url), token);
        if outbound.send(connect.encode()).await.is_err() {
            return Exit::Dropped(ChannelError::Closed);
        }

        // Wait for CONNECTED before subscribing
        loop {
            let text = tokio::select! {
                text = inbound.recv() => text,
                _ = wait_shutdown(shutdown) => return Exit::Shutdown,
            };
            let Some(text) = text else {
                return Exit::Dropped(ChannelError::Handshake(
                    "closed before CONNECTED".into(),
                ));
            };
            let frames = match decode_frames(&text) {
                Ok(frames) => frames,
                Err(e) => return Exit::Dropped(e.into()),
            };
            if let Some(err) = frames.iter().find(|f| f.command == Command::Error) {
                return Exit::Dropped(rejection(err));
            }
            if frames.iter().any(|f| f.command == Command::Connected) {
                break;
            }
        }

        let subscribe = Frame::subscribe(subscription_id, topic);
        if outbound.send(subscribe.encode()).await.is_err() {
            return Exit::Dropped(ChannelError::Closed);
        }
        self.state_tx.send_replace(ChannelState::Connected);
        info!(
            component = "channel",
            event = "channel.subscribed",
            user_id = self.user_id,
            topic = %topic,
            "Live channel subscribed"
        );

        loop {
            let text = tokio::select! {
                text = inbound.recv() => text,
                _ = wait_shutdown(shutdown) => {
                    let receipt = format!("disconnect-{}", self.user_id);
                    let _ = outbound.send(Frame::unsubscribe(subscription_id).encode()).await;
                    let _ = outbound.send(Frame::disconnect(&receipt).encode()).await;
                    return Exit::Shutdown;
                }
            };
            let Some(text) = text else {
                return Exit::Dropped(ChannelError::Closed);
            };
            if let Err(e) = self.dispatch(&text, subscription_id).await {
                return Exit::Dropped(e);
            }
        }
    }

    /// Forward MESSAGE frames. Malformed input is logged and dropped; only an
    /// ERROR frame ends the connection.
    async fn dispatch(&self, text: &str, subscription_id: &str) -> Result<(), ChannelError> {
        let frames = match decode_frames(text) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(
                    component = "channel",
                    event = "channel.frame.malformed",
                    user_id = self.user_id,
                    error = %e,
                    "Dropping malformed frame"
                );
                return Ok(());
            }
        };

        for frame in frames {
            match frame.command {
                Command::Message => {
                    if frame
                        .header("subscription")
                        .is_some_and(|sub| sub != subscription_id)
                    {
                        continue;
                    }
                    let Some(notification) = self.parse_notification(&frame.body) else {
                        continue;
                    };
                    debug!(
                        component = "channel",
                        event = "channel.notification.received",
                        user_id = self.user_id,
                        notification_id = notification.id,
                    );
                    if self.events.send(notification).await.is_err() {
                        debug!(
                            component = "channel",
                            event = "channel.events.closed",
                            user_id = self.user_id,
                            "No listener for pushed notifications"
                        );
                    }
                }
                Command::Error => return Err(rejection(&frame)),
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_notification(&self, body: &str) -> Option<Notification> {
        match serde_json::from_str::<NotificationPayload>(body) {
            Ok(payload) => {
                let mut notification = payload.normalize();
                // New arrivals are unread regardless of what the payload claims
                notification.unread = true;
                Some(notification)
            }
            Err(e) => {
                warn!(
                    component = "channel",
                    event = "channel.payload.malformed",
                    user_id = self.user_id,
                    error = %e,
                    "Failed to parse pushed notification"
                );
                None
            }
        }
    }
}

fn rejection(frame: &Frame) -> ChannelError {
    let message = frame
        .header("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.clone());
    ChannelError::Rejected { message }
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender means the owning channel is gone
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Host part of a ws:// or wss:// URL, for the CONNECT `host` header.
/// Anything that does not parse as a URL is used verbatim.
fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use campuslink_protocol::{decode_frames, Command, Frame};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::{ChannelError, Connector, FrameLink};

    pub struct MockServer {
        pub to_client: mpsc::Sender<String>,
        pub from_client: mpsc::Receiver<String>,
    }

    impl MockServer {
        pub async fn next_frame(&mut self) -> Frame {
            let text = self.from_client.recv().await.unwrap();
            decode_frames(&text).unwrap().remove(0)
        }

        /// Accept CONNECT, reply CONNECTED, return (CONNECT, SUBSCRIBE)
        pub async fn handshake(&mut self) -> (Frame, Frame) {
            let connect = self.next_frame().await;
            assert_eq!(connect.command, Command::Connect);
            self.to_client
                .send("CONNECTED\nversion:1.2\n\n\0".into())
                .await
                .unwrap();
            let subscribe = self.next_frame().await;
            assert_eq!(subscribe.command, Command::Subscribe);
            (connect, subscribe)
        }

        pub async fn push(&self, subscribe: &Frame, body: &str) {
            let frame = Frame::new(Command::Message)
                .with_header("destination", subscribe.header("destination").unwrap())
                .with_header("subscription", subscribe.header("id").unwrap())
                .with_header("message-id", "m")
                .with_body(body);
            self.to_client.send(frame.encode()).await.unwrap();
        }
    }

    /// Each connection attempt hands the server half to the test.
    pub struct MockConnector {
        pub attempts: AtomicUsize,
        pub attempted_at: std::sync::Mutex<Vec<Instant>>,
        servers: mpsc::UnboundedSender<MockServer>,
    }

    impl MockConnector {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
            let (servers, servers_rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                attempts: AtomicUsize::new(0),
                attempted_at: std::sync::Mutex::new(Vec::new()),
                servers,
            });
            (connector, servers_rx)
        }
    }

    impl Connector for MockConnector {
        async fn connect(&self, _url: &str) -> Result<FrameLink, ChannelError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.attempted_at.lock().unwrap().push(Instant::now());
            let (to_client, inbound) = mpsc::channel(16);
            let (outbound, from_client) = mpsc::channel(16);
            let _ = self.servers.send(MockServer {
                to_client,
                from_client,
            });
            Ok(FrameLink { outbound, inbound })
        }
    }
}
