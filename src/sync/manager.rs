// src/sync/manager.rs

//! Main manager for the synchronization process

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};

use super::broadcast::{Broadcaster, Subscription};
use super::fetch::ScheduleDownloader;
use super::http::create_http_client;
use super::repository::{host_name_of, FetchScheduleResult, NetworkRepository};
use super::status::SyncStatus;
use super::types::SyncConfig;
use super::utils::lock_unpoisoned;
use crate::models::{ChangeStatistic, ParseResult, ScheduleChangesParameter};
use crate::parser::{ParseEvent, ScheduleParser};
use crate::store::ScheduleStore;

/// Runs synchronization attempts: fetch, then parse into the store, publishing
/// every [`SyncStatus`] on the way.
///
/// The manager does not prevent overlapping attempts. Callers which may trigger
/// updates concurrently have to serialize them (see `AutoUpdater`).
pub struct SyncManager {
    attempt: Attempt,
    current: Mutex<Option<AbortHandle>>,
}

/// Everything one attempt needs, cloned into its task.
#[derive(Clone)]
struct Attempt {
    repository: NetworkRepository,
    store: Arc<dyn ScheduleStore>,
    statuses: Broadcaster<SyncStatus>,
    changes: Broadcaster<ScheduleChangesParameter>,
}

/// Handle to a running attempt.
pub struct SyncHandle {
    task: JoinHandle<Result<SyncStatus>>,
}

impl SyncHandle {
    /// Abandons the attempt at its next suspension point. No status is published
    /// afterwards. Does nothing if the attempt already finished.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the attempt. `Ok(None)` means it was cancelled.
    pub async fn join(self) -> Result<Option<SyncStatus>> {
        match self.task.await {
            Ok(result) => result.map(Some),
            Err(e) if e.is_cancelled() => Ok(None),
            Err(e) => Err(anyhow!("Sync attempt panicked: {}", e)),
        }
    }
}

impl SyncManager {
    /// Creates a manager publishing on the process-wide status channel. The
    /// first manager in the process decides that channel's capacity.
    pub fn new(
        config: &SyncConfig,
        parser: Arc<dyn ScheduleParser>,
        store: Arc<dyn ScheduleStore>,
    ) -> Result<Self> {
        let client = create_http_client(config)?;
        let downloader = ScheduleDownloader::new(client, config);
        let repository = NetworkRepository::new(downloader, parser);
        Ok(Self {
            attempt: Attempt {
                repository,
                store,
                statuses: Broadcaster::global_with_capacity(config.status_channel_capacity).clone(),
                changes: Broadcaster::new(config.status_channel_capacity),
            },
            current: Mutex::new(None),
        })
    }

    /// Publishes statuses on `statuses` instead of the process-wide channel.
    pub fn with_status_broadcaster(mut self, statuses: Broadcaster<SyncStatus>) -> Self {
        self.attempt.statuses = statuses;
        self
    }

    pub fn statuses(&self) -> Subscription<SyncStatus> {
        self.attempt.statuses.subscribe()
    }

    pub fn schedule_changes(&self) -> Subscription<ScheduleChangesParameter> {
        self.attempt.changes.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.attempt.store
    }

    /// Starts one synchronization attempt on a background task.
    /// `is_user_request` is passed through to `FetchFailure` for observers.
    pub fn load_schedule(&self, is_user_request: bool) -> SyncHandle {
        let attempt = self.attempt.clone();
        let task = tokio::spawn(async move { attempt.run(is_user_request).await });
        *lock_unpoisoned(&self.current) = Some(task.abort_handle());
        SyncHandle { task }
    }

    /// Cancels the most recently started attempt.
    pub fn cancel_loading(&self) {
        if let Some(handle) = lock_unpoisoned(&self.current).take() {
            debug!("Sync: Cancelling loading");
            handle.abort();
        }
    }

    /// Marks the current schedule changes as seen so no further summary is published.
    pub fn acknowledge_schedule_changes(&self) -> Result<()> {
        self.attempt.store.update_schedule_changes_seen(true)
    }
}

impl Attempt {
    fn publish(&self, status: SyncStatus) {
        debug!("Sync: >> {:?}", status);
        self.statuses.publish(status);
    }

    async fn run(self, is_user_request: bool) -> Result<SyncStatus> {
        let url = self.store.read_schedule_url();
        let etag = self.store.read_meta().etag;
        host_name_of(&url)?;

        info!("Sync: Loading schedule from {} (user request: {})", url, is_user_request);
        self.publish(SyncStatus::InitialFetching);
        self.publish(SyncStatus::Fetching);

        let fetched = self.repository.fetch_schedule(&url, &etag).await?;
        if !fetched.http_status.is_successful() {
            info!("Sync: Fetch finished with {}", fetched.http_status);
            let status = SyncStatus::FetchFailure {
                http_status: fetched.http_status,
                host_name: fetched.host_name,
                exception_message: fetched.exception_message,
                is_user_request,
            };
            self.publish(status.clone());
            return Ok(status);
        }
        self.publish(SyncStatus::FetchSuccess);

        self.publish(SyncStatus::InitialParsing);
        self.publish(SyncStatus::Parsing);
        let parse_result = self.parse(fetched).await;

        let status = if parse_result.is_success {
            SyncStatus::ParseSuccess
        } else {
            SyncStatus::ParseFailure { parse_result }
        };
        self.publish(status.clone());
        if status == SyncStatus::ParseSuccess {
            self.publish_schedule_changes();
        }
        Ok(status)
    }

    /// Parses on the blocking pool, then applies the events to the store in order.
    async fn parse(&self, fetched: FetchScheduleResult) -> ParseResult {
        let repository = self.repository.clone();
        let FetchScheduleResult { schedule_xml, etag, .. } = fetched;
        let parsed = tokio::task::spawn_blocking(move || {
            let mut events = Vec::new();
            repository.parse_schedule(&schedule_xml, &etag, |event| events.push(event));
            events
        })
        .await;

        let events = match parsed {
            Ok(events) => events,
            Err(e) => {
                error!("Sync: Parser task failed: {}", e);
                return ParseResult::failure("");
            }
        };

        let mut parse_result = None;
        for event in events {
            match event {
                ParseEvent::Sessions(sessions) => {
                    debug!("Sync: Storing {} sessions", sessions.len());
                    if let Err(e) = self.store.update_sessions(sessions) {
                        error!("Sync: Failed to store sessions: {:#}", e);
                    }
                }
                ParseEvent::Meta(meta) => {
                    if let Err(e) = self.store.update_meta(meta) {
                        error!("Sync: Failed to store meta: {:#}", e);
                    }
                }
                ParseEvent::Done(result) => parse_result = Some(result),
            }
        }
        parse_result.unwrap_or_else(|| {
            warn!("Sync: Parser finished without reporting a result");
            ParseResult::failure("")
        })
    }

    fn publish_schedule_changes(&self) {
        if self.store.read_schedule_changes_seen() {
            return;
        }
        let schedule_version = self.store.read_meta().version;
        let changed = self.store.load_changed_sessions();
        let parameter = ScheduleChangesParameter {
            schedule_version,
            change_statistic: ChangeStatistic::of(&changed),
        };
        info!(
            "Sync: Schedule {} has {} unseen changes",
            parameter.schedule_version,
            parameter.change_statistic.total()
        );
        self.changes.publish(parameter);
    }
}
