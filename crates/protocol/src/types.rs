//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Notification category. Only drives which icon a surface shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "snake_case")]
pub enum NotificationKind {
    Order,
    Message,
    Wishlist,
    #[default]
    Other,
}

impl NotificationKind {
    /// Icon name for this category
    pub fn icon(self) -> &'static str {
        match self {
            NotificationKind::Order => "book-open",
            NotificationKind::Message => "message-circle",
            NotificationKind::Wishlist => "heart",
            NotificationKind::Other => "bell",
        }
    }
}

impl From<&str> for NotificationKind {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "order" | "match" => NotificationKind::Order,
            "message" => NotificationKind::Message,
            "wishlist" => NotificationKind::Wishlist,
            _ => NotificationKind::Other,
        }
    }
}

impl From<String> for NotificationKind {
    fn from(value: String) -> Self {
        NotificationKind::from(value.as_str())
    }
}

/// A notification exactly as the backend sends it.
///
/// The backend carries two overlapping read flags (`isRead` and the legacy
/// `unread`). Older deployments send `payload`, `readFlag` and `createdAt`
/// instead; those are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: i64,
    #[serde(default, alias = "payload")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<NotificationKind>,
    #[serde(default, alias = "readFlag", skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread: Option<bool>,
    #[serde(default, alias = "createdAt", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl NotificationPayload {
    /// Canonical read-state: an explicit `isRead: false` wins, otherwise
    /// fall back to `unread: true`. Anything else counts as read.
    pub fn is_unread(&self) -> bool {
        self.is_read == Some(false) || self.unread == Some(true)
    }

    /// Collapse the redundant read flags into a single boolean.
    pub fn normalize(self) -> Notification {
        let unread = self.is_unread();
        Notification {
            id: self.id,
            message: self.message,
            title: self.title,
            kind: self.kind.unwrap_or_default(),
            unread,
            timestamp: self.timestamp,
        }
    }
}

/// A notification after ingestion. Read-state is a single boolean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub message: String,
    pub title: Option<String>,
    pub kind: NotificationKind,
    pub unread: bool,
    /// ISO-8601 creation time, when the backend supplied one
    pub timestamp: Option<String>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.unread
    }
}

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    #[default]
    Student,
}

/// A marketplace account as returned by the users API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }
}

/// Partial user update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub profile_image_path: Option<String>,
}

/// Identity held for one tab
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: Option<User>,
    pub token: Option<String>,
}

impl Session {
    pub fn new(user: User, token: String) -> Self {
        Self {
            user: Some(user),
            token: Some(token),
        }
    }

    /// Both a user and a non-empty token are present
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Persisted form of a session: `{"state": {"user": ..., "token": ...}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub state: Session,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> NotificationPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn explicit_is_read_false_means_unread() {
        assert!(payload(r#"{"id":1,"message":"m","isRead":false}"#).is_unread());
        assert!(payload(r#"{"id":1,"message":"m","isRead":false,"unread":false}"#).is_unread());
    }

    #[test]
    fn unread_flag_is_the_fallback() {
        assert!(payload(r#"{"id":1,"message":"m","unread":true}"#).is_unread());
        assert!(payload(r#"{"id":1,"message":"m","isRead":true,"unread":true}"#).is_unread());
        assert!(!payload(r#"{"id":1,"message":"m","isRead":true}"#).is_unread());
        assert!(!payload(r#"{"id":1,"message":"m"}"#).is_unread());
    }

    #[test]
    fn legacy_field_names_are_accepted() {
        let n = payload(
            r#"{"id":9,"type":"ORDER","payload":"Order placed","readFlag":false,"createdAt":"2024-03-01T10:00:00"}"#,
        )
        .normalize();
        assert_eq!(n.message, "Order placed");
        assert_eq!(n.kind, NotificationKind::Order);
        assert!(n.unread);
        assert_eq!(n.timestamp.as_deref(), Some("2024-03-01T10:00:00"));
    }

    #[test]
    fn kind_parsing_is_case_insensitive_with_other_fallback() {
        assert_eq!(NotificationKind::from("match"), NotificationKind::Order);
        assert_eq!(NotificationKind::from("MESSAGE"), NotificationKind::Message);
        assert_eq!(NotificationKind::from("Wishlist"), NotificationKind::Wishlist);
        assert_eq!(NotificationKind::from("review"), NotificationKind::Other);
        assert_eq!(NotificationKind::Wishlist.icon(), "heart");
    }

    #[test]
    fn missing_kind_normalizes_to_other() {
        let n = payload(r#"{"id":2,"message":"hi","type":null}"#).normalize();
        assert_eq!(n.kind, NotificationKind::Other);
        assert_eq!(n.title, None);
    }

    #[test]
    fn persisted_session_shape() {
        let raw = r#"{"state":{"user":{"id":42,"name":"Asha","email":"a@gct.edu","username":"asha","role":"STUDENT"},"token":"t0k"}}"#;
        let parsed: PersistedSession = serde_json::from_str(raw).unwrap();
        assert!(parsed.state.is_authenticated());
        assert_eq!(parsed.state.user.as_ref().map(|u| u.id), Some(42));
        assert!(parsed.state.user.unwrap().is_student());
    }

    #[test]
    fn empty_token_is_not_authenticated() {
        let session = Session {
            user: None,
            token: Some("t".into()),
        };
        assert!(!session.is_authenticated());

        let raw = r#"{"state":{"user":{"id":1,"role":"ADMIN"},"token":""}}"#;
        let parsed: PersistedSession = serde_json::from_str(raw).unwrap();
        assert!(!parsed.state.is_authenticated());
        assert!(parsed.state.user.unwrap().is_admin());
    }
}
