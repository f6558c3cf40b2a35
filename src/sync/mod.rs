// src/sync/mod.rs

// Declare sub-modules for sync logic
pub mod auto_update;
pub mod broadcast;
pub mod fetch;
pub mod http;
pub mod manager;
pub mod observer;
pub mod repository;
pub mod status;
pub mod types;
pub mod utils;

pub use broadcast::{Broadcaster, Subscription};
pub use fetch::{FailureCause, FetchError, FetchOutcome, ScheduleDownloader};
pub use manager::{SyncHandle, SyncManager};
pub use repository::{FetchScheduleResult, HttpStatus, NetworkRepository};
pub use status::SyncStatus;
pub use types::SyncConfig;
