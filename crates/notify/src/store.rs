//! Notification store: the authoritative list for the current view session.
//!
//! Wraps a `NotificationSet` behind a mutex, talks to the backend through
//! `NotificationApi`, and publishes the unread count on a `watch` channel
//! whenever it changes. Mutations are applied locally only after the backend
//! accepted them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use campuslink_protocol::{Notification, NotificationPayload};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::notifications::NotificationSet;
use crate::transport::TransportError;

/// Backend operations the store depends on
pub trait NotificationApi: Send + Sync + 'static {
    fn fetch_snapshot(
        &self,
        user_id: i64,
    ) -> impl Future<Output = Result<Vec<NotificationPayload>, TransportError>> + Send;

    fn mark_read(&self, id: i64) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn mark_all_read(&self, user_id: i64)
        -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to load notifications: {0}")]
    Snapshot(#[source] TransportError),

    #[error("Failed to update notifications: {0}")]
    Mutation(#[source] TransportError),
}

impl StoreError {
    pub fn transport(&self) -> &TransportError {
        match self {
            StoreError::Snapshot(e) | StoreError::Mutation(e) => e,
        }
    }
}

/// What happened to a refresh that completed successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied,
    /// A newer refresh already landed; this response was dropped.
    Superseded,
}

struct StoreInner<A> {
    api: A,
    user_id: i64,
    set: Mutex<NotificationSet>,
    unread_tx: watch::Sender<usize>,
}

/// Shared handle to one user's notifications (cheap to Clone).
pub struct NotificationStore<A> {
    inner: Arc<StoreInner<A>>,
}

impl<A> fmt::Debug for NotificationStore<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationStore")
            .field("user_id", &self.inner.user_id)
            .field("unread", &*self.inner.unread_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl<A> Clone for NotificationStore<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: NotificationApi> NotificationStore<A> {
    pub fn new(api: A, user_id: i64) -> Self {
        let (unread_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                api,
                user_id,
                set: Mutex::new(NotificationSet::new()),
                unread_tx,
            }),
        }
    }

    pub fn user_id(&self) -> i64 {
        self.inner.user_id
    }

    pub fn api(&self) -> &A {
        &self.inner.api
    }

    /// Receives the unread count each time it changes
    pub fn subscribe_unread(&self) -> watch::Receiver<usize> {
        self.inner.unread_tx.subscribe()
    }

    pub fn unread_count(&self) -> usize {
        *self.inner.unread_tx.borrow()
    }

    pub async fn entries(&self) -> Vec<Notification> {
        self.inner.set.lock().await.to_vec()
    }

    pub async fn len(&self) -> usize {
        self.inner.set.lock().await.len()
    }

    /// Replace the working set with an already fetched list
    pub async fn load_snapshot(&self, list: Vec<NotificationPayload>) {
        let mut set = self.inner.set.lock().await;
        set.load_snapshot(list.into_iter().map(NotificationPayload::normalize).collect());
        self.publish(&set);
    }

    /// Fetch a snapshot and merge it.
    ///
    /// On failure nothing local changes, pushed entries included.
    pub async fn refresh(&self) -> Result<RefreshOutcome, StoreError> {
        let ticket = self.inner.set.lock().await.begin_snapshot();

        let list = self
            .inner
            .api
            .fetch_snapshot(self.inner.user_id)
            .await
            .map_err(|e| {
                warn!(
                    component = "store",
                    event = "store.snapshot.failed",
                    user_id = self.inner.user_id,
                    error = %e,
                    "Notification snapshot failed"
                );
                StoreError::Snapshot(e)
            })?;

        let mut set = self.inner.set.lock().await;
        let applied = set.apply_snapshot(
            ticket,
            list.into_iter().map(NotificationPayload::normalize).collect(),
        );
        if !applied {
            debug!(
                component = "store",
                event = "store.snapshot.superseded",
                user_id = self.inner.user_id,
                "Dropping snapshot older than one already applied"
            );
            return Ok(RefreshOutcome::Superseded);
        }
        self.publish(&set);
        Ok(RefreshOutcome::Applied)
    }

    /// Merge a notification delivered by the live channel
    pub async fn ingest_pushed(&self, notification: Notification) {
        let mut set = self.inner.set.lock().await;
        set.ingest_pushed(notification);
        self.publish(&set);
    }

    /// Ask the backend to mark `id` read, then flip it locally.
    pub async fn mark_read(&self, id: i64) -> Result<(), StoreError> {
        self.inner
            .api
            .mark_read(id)
            .await
            .map_err(StoreError::Mutation)?;

        let mut set = self.inner.set.lock().await;
        if !set.mark_read(id) {
            debug!(
                component = "store",
                event = "store.mark_read.unknown",
                notification_id = id,
                "Marked a notification this view does not hold"
            );
        }
        self.publish(&set);
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<(), StoreError> {
        self.inner
            .api
            .mark_all_read(self.inner.user_id)
            .await
            .map_err(StoreError::Mutation)?;

        let mut set = self.inner.set.lock().await;
        set.mark_all_read();
        self.publish(&set);
        Ok(())
    }

    fn publish(&self, set: &NotificationSet) {
        let count = set.unread_count();
        self.inner.unread_tx.send_if_modified(|current| {
            if *current == count {
                return false;
            }
            *current = count;
            true
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use campuslink_protocol::NotificationPayload;
    use tokio::sync::{oneshot, Mutex};

    use super::NotificationApi;
    use crate::transport::TransportError;

    type Reply = Result<Vec<NotificationPayload>, TransportError>;

    #[derive(Default)]
    pub struct MockState {
        pub snapshots: Mutex<VecDeque<oneshot::Receiver<Reply>>>,
        pub fetches_started: AtomicUsize,
        pub fail_mutations: AtomicBool,
        pub calls: Mutex<Vec<String>>,
    }

    /// Snapshot responses are released by the test through oneshot gates.
    #[derive(Clone, Default)]
    pub struct MockApi {
        pub state: Arc<MockState>,
    }

    impl MockApi {
        /// Queue a gate for the next fetch and return its release handle
        pub async fn gate(&self) -> oneshot::Sender<Reply> {
            let (tx, rx) = oneshot::channel();
            self.state.snapshots.lock().await.push_back(rx);
            tx
        }

        /// Queue an immediately available snapshot
        pub async fn respond(&self, reply: Reply) {
            let tx = self.gate().await;
            let _ = tx.send(reply);
        }

        pub async fn wait_for_fetches(&self, n: usize) {
            while self.state.fetches_started.load(Ordering::SeqCst) < n {
                tokio::task::yield_now().await;
            }
        }

        pub fn fail_mutations(&self, fail: bool) {
            self.state.fail_mutations.store(fail, Ordering::SeqCst);
        }

        pub async fn calls(&self) -> Vec<String> {
            self.state.calls.lock().await.clone()
        }

        fn mutation_result(&self) -> Result<(), TransportError> {
            if self.state.fail_mutations.load(Ordering::SeqCst) {
                Err(TransportError::Status {
                    status: 503,
                    body: "unavailable".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl NotificationApi for MockApi {
        async fn fetch_snapshot(&self, user_id: i64) -> Reply {
            let rx = self.state.snapshots.lock().await.pop_front();
            self.state.calls.lock().await.push(format!("fetch {user_id}"));
            self.state.fetches_started.fetch_add(1, Ordering::SeqCst);
            match rx {
                Some(rx) => rx.await.unwrap_or_else(|_| Ok(Vec::new())),
                None => Ok(Vec::new()),
            }
        }

        async fn mark_read(&self, id: i64) -> Result<(), TransportError> {
            self.state.calls.lock().await.push(format!("mark_read {id}"));
            self.mutation_result()
        }

        async fn mark_all_read(&self, user_id: i64) -> Result<(), TransportError> {
            self.state
                .calls
                .lock()
                .await
                .push(format!("mark_all_read {user_id}"));
            self.mutation_result()
        }
    }

    pub fn payload(id: i64, is_read: bool) -> NotificationPayload {
        NotificationPayload {
            id,
            message: format!("notification {id}"),
            title: None,
            kind: None,
            is_read: Some(is_read),
            unread: None,
            timestamp: None,
        }
    }
}
