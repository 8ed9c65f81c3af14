//! CampusLink notifications client
//!
//! Keeps one tab's view of a user's notifications in sync with the
//! marketplace backend: a REST snapshot on load, live pushes over a STOMP
//! subscription, and periodic reconciliation. Read-state changes reach the
//! local list only after the backend accepts them.

pub mod app;
pub mod channel;
pub mod claims;
pub mod config;
pub mod logging;
pub mod notifications;
pub mod paths;
pub mod poller;
pub mod session;
pub mod store;
pub mod surface;
pub mod transport;
pub mod ws;

pub use app::NotifyApp;
pub use channel::{ChannelError, ChannelState, Connector, FrameLink, LiveChannel};
pub use config::NotifyConfig;
pub use session::{FileStorage, MemoryStorage, SessionStorage, SessionStore, StorageError};
pub use store::{NotificationApi, NotificationStore, RefreshOutcome, StoreError};
pub use surface::{badge_label, NotificationSurface, Page};
pub use transport::{AuthEvent, TransportClient, TransportError, LOGIN_PATH};
pub use ws::WsConnector;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
