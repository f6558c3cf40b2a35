// src/sync/observer.rs

//! Turns the status stream into what a front end shows: progress, and failures
//! worth interrupting the user for

use log::debug;
use tokio::sync::mpsc;

use super::broadcast::Subscription;
use super::repository::HttpStatus;
use super::status::SyncStatus;
use crate::models::ParseResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressInfo {
    LoadingData,
    ProcessingData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// `None` hides the progress text.
    ToggleProgressInfo(Option<ProgressInfo>),
    ToggleProgressIndicator(bool),
    ShowFetchFailureInfo {
        http_status: HttpStatus,
        host_name: String,
        exception_message: String,
    },
    ShowParseFailureInfo(ParseResult),
    ScheduleParsed,
}

/// Maps one status to the events a front end should act on.
/// Fetch failures of background refreshes are not surfaced.
pub fn ui_events_for(status: &SyncStatus) -> Vec<UiEvent> {
    use UiEvent::*;
    let hide_progress = [ToggleProgressInfo(None), ToggleProgressIndicator(false)];
    match status {
        SyncStatus::InitialFetching => vec![ToggleProgressInfo(Some(ProgressInfo::LoadingData))],
        SyncStatus::Fetching | SyncStatus::Parsing => vec![ToggleProgressIndicator(true)],
        SyncStatus::FetchSuccess => hide_progress.to_vec(),
        SyncStatus::FetchFailure { http_status, host_name, exception_message, is_user_request } => {
            let mut events = hide_progress.to_vec();
            if *is_user_request {
                events.push(ShowFetchFailureInfo {
                    http_status: *http_status,
                    host_name: host_name.clone(),
                    exception_message: exception_message.clone(),
                });
            }
            events
        }
        SyncStatus::InitialParsing => vec![ToggleProgressInfo(Some(ProgressInfo::ProcessingData))],
        SyncStatus::ParseSuccess => {
            let mut events = hide_progress.to_vec();
            events.push(ScheduleParsed);
            events
        }
        SyncStatus::ParseFailure { parse_result } => {
            let mut events = hide_progress.to_vec();
            events.push(ShowParseFailureInfo(parse_result.clone()));
            events
        }
    }
}

/// Human readable explanation of a fetch result.
pub fn fetch_failure_message(http_status: HttpStatus, host_name: &str, exception_message: &str) -> String {
    match http_status {
        HttpStatus::HttpOk => "Schedule downloaded.".to_string(),
        HttpStatus::HttpNotModified => "The schedule is up to date.".to_string(),
        HttpStatus::HttpLoginFailUntrustedCertificate => format!(
            "The certificate of {} is not trusted: {}",
            host_name, exception_message
        ),
        HttpStatus::HttpConnectTimeout => format!("Connection to {} timed out.", host_name),
        HttpStatus::HttpDnsFailure => format!("Could not resolve {}.", host_name),
        HttpStatus::HttpCleartextNotPermitted => {
            format!("Unencrypted connections to {} are not permitted.", host_name)
        }
        HttpStatus::HttpCouldNotConnect => format!("Could not connect to {}.", host_name),
        HttpStatus::HttpWrongHttpCredentials => format!("Wrong credentials for {}.", host_name),
        HttpStatus::HttpNotFound => format!("The schedule was not found on {}.", host_name),
        HttpStatus::HttpCannotParseContent => {
            format!("The response from {} could not be read.", host_name)
        }
    }
}

/// Forwards [`UiEvent`]s for every status until the status channel closes or
/// the receiving side goes away.
pub async fn run_status_observer(
    mut statuses: Subscription<SyncStatus>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
) {
    while let Some(status) = statuses.next().await {
        for event in ui_events_for(&status) {
            if ui_tx.send(event).is_err() {
                debug!("Observer: UI receiver closed, stopping");
                return;
            }
        }
    }
}
