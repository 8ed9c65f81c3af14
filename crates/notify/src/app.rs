//! Application shell: owns the tab's single live channel and wires it to
//! the notification store.
//!
//! One `NotifyApp` per tab. `start()` opens the view for the logged-in user,
//! `logout()` tears it down. A 401 from any request, the poller's included,
//! closes the live channel at once; `wait_login_required()` then drops the
//! rest of the view and hands back the redirect.

use std::sync::Arc;

use campuslink_protocol::Notification;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{ChannelState, Connector, LiveChannel};
use crate::config::NotifyConfig;
use crate::poller::{spawn_reconciliation, ReconcileHandle};
use crate::session::{SessionStore, StorageError};
use crate::store::{NotificationStore, StoreError};
use crate::surface::NotificationSurface;
use crate::transport::{AuthEvent, TransportClient, LOGIN_PATH};
use crate::ws::WsConnector;

const PUSH_QUEUE: usize = 64;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not logged in")]
    NotAuthenticated,

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct ActiveView {
    store: NotificationStore<TransportClient>,
    pump: JoinHandle<()>,
    poller: Option<ReconcileHandle>,
    /// Closes the channel on the first 401; finished means the view is dead
    auth_guard: JoinHandle<()>,
}

pub struct NotifyApp<C = WsConnector> {
    config: NotifyConfig,
    session: SessionStore,
    transport: TransportClient,
    channel: Arc<LiveChannel<C>>,
    active: Mutex<Option<ActiveView>>,
    auth_rx: Mutex<broadcast::Receiver<AuthEvent>>,
}

impl NotifyApp<WsConnector> {
    /// Shell talking to the configured WebSocket endpoint
    pub fn new(config: NotifyConfig, session: SessionStore) -> Self {
        Self::with_connector(config, session, Arc::new(WsConnector))
    }
}

impl<C: Connector> NotifyApp<C> {
    pub fn with_connector(config: NotifyConfig, session: SessionStore, connector: Arc<C>) -> Self {
        let transport = TransportClient::new(config.rest_base_url.clone(), session.clone());
        let auth_rx = transport.subscribe_auth();
        let channel = Arc::new(LiveChannel::new(
            connector,
            config.realtime_url.clone(),
            config.reconnect_delay,
            session.clone(),
        ));
        Self {
            config,
            session,
            transport,
            channel,
            active: Mutex::new(None),
            auth_rx: Mutex::new(auth_rx),
        }
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn channel(&self) -> &LiveChannel<C> {
        &self.channel
    }

    /// Store for the running view, if any
    pub async fn store(&self) -> Option<NotificationStore<TransportClient>> {
        self.active.lock().await.as_ref().map(|v| v.store.clone())
    }

    /// Surface over the running view, configured with this app's limits
    pub async fn surface(&self) -> Option<NotificationSurface<TransportClient>> {
        let store = self.store().await?;
        Some(NotificationSurface::new(
            store,
            self.config.dropdown_limit,
            self.config.page_size,
        ))
    }

    /// Open the notifications view for the logged-in user.
    ///
    /// Connects the live channel and loads a snapshot. If the snapshot fails
    /// for any reason other than an expired session the view stays up, the
    /// error is returned, and pushes keep arriving. Calling this again while
    /// a healthy view is running just refreshes it.
    pub async fn start(&self) -> Result<NotificationStore<TransportClient>, AppError> {
        let session = self.session.current();
        let (Some(user), Some(token)) = (session.user.as_ref(), session.token.clone()) else {
            return Err(AppError::NotAuthenticated);
        };
        if !session.is_authenticated() {
            return Err(AppError::NotAuthenticated);
        }

        let store = {
            let mut active = self.active.lock().await;
            match active.as_ref() {
                Some(view)
                    if view.store.user_id() == user.id && !view.auth_guard.is_finished() =>
                {
                    view.store.clone()
                }
                _ => {
                    if let Some(stale) = active.take() {
                        self.channel.disconnect().await;
                        close_view(stale).await;
                    }
                    // Expiries queued before this login belong to the old session.
                    // A waiter holding the lock has already drained them.
                    if let Ok(mut auth_rx) = self.auth_rx.try_lock() {
                        *auth_rx = self.transport.subscribe_auth();
                    }
                    let view = self.open_view(user.id, token).await;
                    let store = view.store.clone();
                    *active = Some(view);
                    store
                }
            }
        };

        match store.refresh().await {
            Ok(_) => Ok(store),
            Err(e) => {
                if e.transport().is_auth_expired() {
                    self.teardown().await;
                }
                Err(e.into())
            }
        }
    }

    async fn open_view(&self, user_id: i64, token: String) -> ActiveView {
        let store = NotificationStore::new(self.transport.clone(), user_id);
        let (events_tx, events_rx) = mpsc::channel(PUSH_QUEUE);
        let pump = tokio::spawn(pump_pushes(store.clone(), events_rx));
        let auth_guard = tokio::spawn(close_on_expiry(
            Arc::clone(&self.channel),
            self.transport.subscribe_auth(),
        ));
        self.channel.connect(user_id, token, events_tx).await;
        let poller = self
            .config
            .poll_interval
            .map(|every| spawn_reconciliation(store.clone(), every));

        info!(
            component = "app",
            event = "app.view.started",
            user_id,
            polling = poller.is_some(),
            "Notifications view started"
        );
        ActiveView {
            store,
            pump,
            poller,
            auth_guard,
        }
    }

    /// Close the live channel and drop the view. The session is untouched.
    pub async fn teardown(&self) {
        self.channel.disconnect().await;
        if let Some(view) = self.active.lock().await.take() {
            close_view(view).await;
        }
    }

    /// Explicit logout: the only path that closes the channel on purpose.
    pub async fn logout(&self) -> Result<(), StorageError> {
        self.teardown().await;
        self.session.logout()
    }

    /// Resolve once a request was rejected with 401. The view has been torn
    /// down by then; the returned path is where to send the user.
    pub async fn wait_login_required(&self) -> String {
        let mut auth_rx = self.auth_rx.lock().await;
        let redirect = loop {
            match auth_rx.recv().await {
                Ok(AuthEvent::LoginRequired { redirect }) => break redirect,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        component = "app",
                        event = "app.auth.lagged",
                        skipped,
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break LOGIN_PATH.to_string(),
            }
        };
        drop(auth_rx);

        self.teardown().await;
        redirect
    }
}

async fn pump_pushes(
    store: NotificationStore<TransportClient>,
    mut events: mpsc::Receiver<Notification>,
) {
    while let Some(notification) = events.recv().await {
        store.ingest_pushed(notification).await;
    }
}

async fn close_on_expiry<C: Connector>(
    channel: Arc<LiveChannel<C>>,
    mut auth_rx: broadcast::Receiver<AuthEvent>,
) {
    // LoginRequired is the only event, so a lag means one was missed
    match auth_rx.recv().await {
        Ok(AuthEvent::LoginRequired { .. }) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        Err(broadcast::error::RecvError::Closed) => return,
    }
    info!(
        component = "app",
        event = "app.auth.expired",
        "Session expired, closing live channel"
    );
    channel.disconnect().await;
}

async fn close_view(view: ActiveView) {
    view.auth_guard.abort();
    if let Some(poller) = view.poller {
        poller.stop().await;
    }
    // The channel dropped its sender on disconnect, so the pump drains and ends
    if let Err(e) = view.pump.await {
        warn!(
            component = "app",
            event = "app.pump.join_failed",
            error = %e,
        );
    }
    info!(
        component = "app",
        event = "app.view.closed",
        user_id = view.store.user_id(),
        "Notifications view closed"
    );
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::channel::testing::MockConnector;
    use crate::session::test_user;
    use crate::transport::TransportError;

    #[derive(Clone, Default)]
    struct Backend {
        reject: Arc<AtomicBool>,
    }

    async fn list(
        State(backend): State<Backend>,
        Query(q): Query<HashMap<String, String>>,
    ) -> Response {
        if backend.reject.load(Ordering::SeqCst) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        assert_eq!(q.get("userId").map(String::as_str), Some("42"));
        Json(json!([
            {"id": 1, "message": "Order placed", "type": "ORDER", "isRead": false},
            {"id": 2, "message": "Old news", "isRead": true}
        ]))
        .into_response()
    }

    async fn backend() -> (String, Backend) {
        let backend = Backend::default();
        let app = Router::new()
            .route("/api/notifications", get(list))
            .with_state(backend.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/api"), backend)
    }

    fn config(rest: String) -> NotifyConfig {
        NotifyConfig {
            rest_base_url: rest,
            realtime_url: "ws://broker.test/ws".into(),
            reconnect_delay: Duration::from_secs(60),
            poll_interval: None,
            ..NotifyConfig::default()
        }
    }

    #[tokio::test]
    async fn start_requires_a_session() {
        let (connector, _servers) = MockConnector::new();
        let app = NotifyApp::with_connector(
            NotifyConfig::default(),
            SessionStore::in_memory(),
            connector,
        );
        assert!(matches!(app.start().await, Err(AppError::NotAuthenticated)));
        assert_eq!(app.channel_state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn start_merges_snapshot_and_pushes() {
        let (rest, _backend) = backend().await;
        let (connector, mut servers) = MockConnector::new();
        let session = SessionStore::in_memory();
        session.login(test_user(42), "tok".into()).unwrap();
        let app = NotifyApp::with_connector(config(rest), session, Arc::clone(&connector));

        let store = app.start().await.unwrap();
        assert_eq!(store.unread_count(), 1);

        let mut server = servers.recv().await.unwrap();
        let (connect, subscribe) = server.handshake().await;
        assert_eq!(connect.header("Authorization"), Some("Bearer tok"));
        assert_eq!(connect.header("host"), Some("broker.test"));

        let mut unread = store.subscribe_unread();
        server
            .push(&subscribe, r#"{"id":3,"message":"New message","type":"MESSAGE"}"#)
            .await;
        unread.wait_for(|n| *n == 2).await.unwrap();

        let surface = app.surface().await.unwrap();
        let ids: Vec<i64> = surface.dropdown_items().await.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        // Starting again keeps the same view and channel
        app.start().await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_session_tears_everything_down() {
        let (rest, backend) = backend().await;
        backend.reject.store(true, Ordering::SeqCst);
        let (connector, _servers) = MockConnector::new();
        let session = SessionStore::in_memory();
        session.login(test_user(42), "tok".into()).unwrap();
        let app = NotifyApp::with_connector(config(rest), session.clone(), connector);

        let err = app.start().await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Store(StoreError::Snapshot(TransportError::AuthExpired))
        ));
        assert!(!session.is_authenticated());
        assert_eq!(app.channel_state(), ChannelState::Disconnected);
        assert!(app.store().await.is_none());

        let redirect = tokio::time::timeout(Duration::from_secs(1), app.wait_login_required())
            .await
            .unwrap();
        assert_eq!(redirect, "/login");
    }

    #[tokio::test]
    async fn logout_closes_channel_and_clears_session() {
        let (rest, _backend) = backend().await;
        let (connector, mut servers) = MockConnector::new();
        let session = SessionStore::in_memory();
        session.login(test_user(42), "tok".into()).unwrap();
        let app = NotifyApp::with_connector(config(rest), session.clone(), connector);

        app.start().await.unwrap();
        let mut server = servers.recv().await.unwrap();
        server.handshake().await;

        app.logout().await.unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(app.channel_state(), ChannelState::Disconnected);
        assert!(app.store().await.is_none());
        assert!(matches!(app.start().await, Err(AppError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn relogin_after_expiry_is_not_torn_down() {
        let (rest, backend) = backend().await;
        backend.reject.store(true, Ordering::SeqCst);
        let (connector, _servers) = MockConnector::new();
        let session = SessionStore::in_memory();
        session.login(test_user(42), "old".into()).unwrap();
        let app = NotifyApp::with_connector(config(rest), session.clone(), connector);
        assert!(app.start().await.is_err());

        backend.reject.store(false, Ordering::SeqCst);
        session.login(test_user(42), "new".into()).unwrap();
        app.start().await.unwrap();

        let waited =
            tokio::time::timeout(Duration::from_millis(300), app.wait_login_required()).await;
        assert!(waited.is_err(), "earlier expiry must not end the new view");
        assert!(app.store().await.is_some());
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn poller_expiry_closes_the_channel() {
        let (rest, backend) = backend().await;
        let (connector, mut servers) = MockConnector::new();
        let session = SessionStore::in_memory();
        session.login(test_user(42), "tok".into()).unwrap();
        let app = NotifyApp::with_connector(
            NotifyConfig {
                poll_interval: Some(Duration::from_millis(50)),
                ..config(rest)
            },
            session.clone(),
            Arc::clone(&connector),
        );
        let mut states = app.channel().subscribe_state();

        app.start().await.unwrap();
        let mut server = servers.recv().await.unwrap();
        server.handshake().await;
        states
            .wait_for(|s| *s == ChannelState::Connected)
            .await
            .unwrap();

        backend.reject.store(true, Ordering::SeqCst);
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ChannelState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(!session.is_authenticated());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(app.wait_login_required().await, "/login");
        assert!(app.store().await.is_none());
    }
}
