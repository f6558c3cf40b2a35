// src/sync/status.rs
// Shared SyncStatus enum used by the sync subsystem and its observers.

use super::repository::HttpStatus;
use crate::models::ParseResult;

/// One phase of a synchronization attempt. An attempt always runs
/// `InitialFetching -> Fetching -> FetchSuccess|FetchFailure` and, only after
/// `FetchSuccess`, `InitialParsing -> Parsing -> ParseSuccess|ParseFailure`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    InitialFetching,
    Fetching,
    FetchSuccess,
    FetchFailure {
        http_status: HttpStatus,
        host_name: String,
        exception_message: String,
        /// Set when the attempt was requested by the user, not by a background refresh.
        is_user_request: bool,
    },
    InitialParsing,
    Parsing,
    ParseSuccess,
    ParseFailure {
        parse_result: ParseResult,
    },
}

impl SyncStatus {
    /// True for the statuses after which an attempt emits nothing more.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::FetchFailure { .. } | SyncStatus::ParseSuccess | SyncStatus::ParseFailure { .. }
        )
    }

    pub fn is_parse_phase(&self) -> bool {
        matches!(
            self,
            SyncStatus::InitialParsing
                | SyncStatus::Parsing
                | SyncStatus::ParseSuccess
                | SyncStatus::ParseFailure { .. }
        )
    }
}
