//! REST transport to the marketplace backend.
//!
//! Every request carries the tab's current bearer token. A 401 ends the
//! session and broadcasts `AuthEvent::LoginRequired`; a 403 is handed back
//! to the caller untouched so one forbidden endpoint never logs anyone out.

use campuslink_protocol::NotificationPayload;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::session::SessionStore;
use crate::store::NotificationApi;

/// Where the application sends the user after the session expires
pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Authentication required")]
    AuthExpired,

    #[error("Permission denied: {body}")]
    AuthDenied { body: String },

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// True for the 403 case callers usually render inline
    pub fn is_denied(&self) -> bool {
        matches!(self, TransportError::AuthDenied { .. })
    }

    /// True for the 401 case; the session is already gone
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, TransportError::AuthExpired)
    }
}

/// Application-wide auth signals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Session was cleared; the shell should navigate to `redirect`.
    LoginRequired { redirect: String },
}

/// Backend client (cheap to Clone)
#[derive(Clone)]
pub struct TransportClient {
    http: reqwest::Client,
    base_url: String,
    session: SessionStore,
    auth_tx: broadcast::Sender<AuthEvent>,
}

impl TransportClient {
    pub fn new(base_url: impl Into<String>, session: SessionStore) -> Self {
        let (auth_tx, _) = broadcast::channel(16);
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            auth_tx,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Receive `LoginRequired` signals raised by 401 responses
    pub fn subscribe_auth(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let resp = self.execute(self.http.get(self.url(path))).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn post_empty(&self, path: &str) -> Result<(), TransportError> {
        self.execute(self.http.post(self.url(path))).await?;
        Ok(())
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, TransportError> {
        // Read the token per request so login/logout in this tab take effect immediately
        let builder = match self.session.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };

        let resp = builder.send().await?;
        let status = resp.status();
        debug!(
            component = "transport",
            event = "transport.response",
            status = status.as_u16(),
            url = %resp.url(),
        );

        match status {
            StatusCode::UNAUTHORIZED => {
                self.expire_session();
                Err(TransportError::AuthExpired)
            }
            StatusCode::FORBIDDEN => {
                let body = resp.text().await.unwrap_or_default();
                Err(TransportError::AuthDenied { body })
            }
            s if !s.is_success() => {
                let body = resp.text().await.unwrap_or_default();
                Err(TransportError::Status {
                    status: s.as_u16(),
                    body,
                })
            }
            _ => Ok(resp),
        }
    }

    fn expire_session(&self) {
        warn!(
            component = "transport",
            event = "transport.auth.expired",
            "Backend rejected credentials, clearing session"
        );
        if let Err(e) = self.session.logout() {
            warn!(
                component = "transport",
                event = "transport.auth.clear_failed",
                error = %e,
                "Failed to clear persisted session"
            );
        }
        // No receivers just means no shell is listening
        let _ = self.auth_tx.send(AuthEvent::LoginRequired {
            redirect: LOGIN_PATH.to_string(),
        });
    }

    /// Unread notifications only
    pub async fn fetch_unread(
        &self,
        user_id: i64,
    ) -> Result<Vec<NotificationPayload>, TransportError> {
        self.get_list(&format!("notifications/unread?userId={user_id}"))
            .await
    }

    /// Lists tolerate an empty body as "no notifications"
    async fn get_list(&self, path: &str) -> Result<Vec<NotificationPayload>, TransportError> {
        let resp = self.execute(self.http.get(self.url(path))).await?;
        let bytes = resp.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl NotificationApi for TransportClient {
    async fn fetch_snapshot(
        &self,
        user_id: i64,
    ) -> Result<Vec<NotificationPayload>, TransportError> {
        self.get_list(&format!("notifications?userId={user_id}")).await
    }

    async fn mark_read(&self, id: i64) -> Result<(), TransportError> {
        self.post_empty(&format!("notifications/mark-read/{id}"))
            .await
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<(), TransportError> {
        self.post_empty(&format!("notifications/{user_id}/mark-all-read"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_user;
    use axum::extract::{Path, Query};
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    fn bearer(headers: &HeaderMap) -> Option<String> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route(
                "/api/notifications",
                get(
                    |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                        if bearer(&headers).as_deref() != Some("Bearer tok-42") {
                            return Err(StatusCode::UNAUTHORIZED);
                        }
                        let user_id = q.get("userId").cloned().unwrap_or_default();
                        Ok(Json(json!([
                            {"id": 1, "message": format!("for {user_id}"), "isRead": true},
                            {"id": 2, "message": "unread", "isRead": false}
                        ])))
                    },
                ),
            )
            .route("/api/notifications/unread", get(|| async { "" }))
            .route(
                "/api/notifications/mark-read/{id}",
                post(|Path(id): Path<i64>| async move {
                    if id == 403 {
                        (StatusCode::FORBIDDEN, "not your notification").into_response()
                    } else {
                        StatusCode::OK.into_response()
                    }
                }),
            )
            .route(
                "/api/admin/books",
                get(|| async { (StatusCode::FORBIDDEN, "admins only") }),
            )
            .route(
                "/api/expired",
                get(|| async { StatusCode::UNAUTHORIZED }),
            )
            .route(
                "/api/boom",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "db down") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api")
    }

    fn logged_in() -> SessionStore {
        let session = SessionStore::in_memory();
        session.login(test_user(42), "tok-42".into()).unwrap();
        session
    }

    #[tokio::test]
    async fn snapshot_carries_bearer_token() {
        let base = spawn_backend().await;
        let client = TransportClient::new(base, logged_in());

        let list = client.fetch_snapshot(42).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].message, "for 42");
        assert!(list[1].is_unread());
    }

    #[tokio::test]
    async fn unauthorized_clears_session_and_requests_login() {
        let base = spawn_backend().await;
        let session = logged_in();
        let client = TransportClient::new(base, session.clone());
        let mut auth_rx = client.subscribe_auth();

        let err = client
            .get_json::<serde_json::Value>("expired")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::AuthExpired));
        assert!(!session.is_authenticated());
        assert_eq!(session.read_persisted(), None);
        assert_eq!(
            auth_rx.try_recv().unwrap(),
            AuthEvent::LoginRequired {
                redirect: "/login".into()
            }
        );
    }

    #[tokio::test]
    async fn forbidden_keeps_session_and_surfaces_error() {
        let base = spawn_backend().await;
        let session = logged_in();
        let client = TransportClient::new(base, session.clone());
        let mut auth_rx = client.subscribe_auth();

        let err = client
            .get_json::<serde_json::Value>("admin/books")
            .await
            .unwrap_err();
        assert!(err.is_denied());
        assert!(matches!(err, TransportError::AuthDenied { ref body } if body == "admins only"));
        assert!(session.is_authenticated());
        assert!(auth_rx.try_recv().is_err());

        let err = client.mark_read(403).await.unwrap_err();
        assert!(err.is_denied());
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn other_failures_propagate_unchanged() {
        let base = spawn_backend().await;
        let session = logged_in();
        let client = TransportClient::new(base, session.clone());

        let err = client
            .get_json::<serde_json::Value>("boom")
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransportError::Status { status: 500, ref body } if body == "db down")
        );
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn mutations_and_empty_lists() {
        let base = spawn_backend().await;
        let client = TransportClient::new(base, logged_in());

        client.mark_read(7).await.unwrap();
        assert!(client.fetch_unread(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_token_is_sent_without_credentials() {
        let base = spawn_backend().await;
        let session = SessionStore::in_memory();
        let client = TransportClient::new(base, session);

        let err = client.fetch_snapshot(42).await.unwrap_err();
        assert!(matches!(err, TransportError::AuthExpired));
    }
}
