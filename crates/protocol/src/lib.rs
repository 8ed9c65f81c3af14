//! CampusLink Protocol
//!
//! Types shared between the marketplace backend and notification clients.
//! Notifications travel as JSON, either in REST responses or inside STOMP
//! MESSAGE frames on the realtime endpoint.

pub mod stomp;
pub mod types;

pub use stomp::{decode_frames, Command, Frame, FrameError};
pub use types::*;

/// Per-user topic that carries pushed notifications
pub fn notification_topic(user_id: i64) -> String {
    format!("/topic/notifications/{user_id}")
}
