// src/sync/types.rs

use std::time::Duration;

/// Minimal config used by the sync subsystem. Built from the top-level
/// `AppConfig` so the sync code does not depend on how settings are stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Reject `http://` schedule URLs.
    pub https_only: bool,
    pub connect_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
    /// Number of statuses a slow subscriber may fall behind before it starts missing them.
    pub status_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            https_only: false,
            connect_timeout: Some(Duration::from_secs(30)),
            request_timeout: None,
            user_agent: concat!("confsync/", env!("CARGO_PKG_VERSION")).to_string(),
            status_channel_capacity: 16,
        }
    }
}
