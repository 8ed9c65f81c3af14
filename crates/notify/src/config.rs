//! Runtime settings for the notifications client.

use std::time::Duration;

pub const DEFAULT_REST_URL: &str = "http://localhost:8082/api";
pub const DEFAULT_REALTIME_URL: &str = "ws://localhost:8082/ws";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_DROPDOWN_LIMIT: usize = 6;
pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyConfig {
    /// REST API root, e.g. `http://host/api`
    pub rest_base_url: String,
    /// WebSocket endpoint carrying STOMP
    pub realtime_url: String,
    /// Fixed wait between a drop and the next connection attempt
    pub reconnect_delay: Duration,
    /// Reconciliation period; `None` disables polling
    pub poll_interval: Option<Duration>,
    pub dropdown_limit: usize,
    pub page_size: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            rest_base_url: DEFAULT_REST_URL.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            poll_interval: Some(DEFAULT_POLL_INTERVAL),
            dropdown_limit: DEFAULT_DROPDOWN_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
