// src/sync/auto_update.rs

//! Background schedule refreshes driven by the auto-update trigger

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::manager::SyncManager;
use super::status::SyncStatus;
use crate::alarms::{AlarmServices, Trigger, TriggerAction, TriggerIdentity};

/// Receives what the background updater wants to tell the user.
pub trait Notifier: Send + Sync {
    fn schedule_updated(&self, version: &str, changes_count: usize);
    fn session_reminder(&self, session_id: &str, title: &str);
}

/// Writes notifications to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn schedule_updated(&self, version: &str, changes_count: usize) {
        if version.is_empty() {
            info!("Notify: Schedule updated ({} changes)", changes_count);
        } else {
            info!("Notify: Schedule updated to {} ({} changes)", version, changes_count);
        }
    }

    fn session_reminder(&self, session_id: &str, title: &str) {
        info!("Notify: '{}' ({}) is about to start", title, session_id);
    }
}

fn next_update_at(now: DateTime<Utc>, interval: Duration) -> Option<DateTime<Utc>> {
    now.checked_add_signed(interval.max(Duration::minutes(1)))
}

/// Runs at most one background update at a time and re-arms the auto-update
/// trigger before each run.
pub struct AutoUpdater {
    manager: Arc<SyncManager>,
    alarms: AlarmServices,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    running: AtomicBool,
}

/// Clears the running flag however the update ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AutoUpdater {
    pub fn new(
        manager: Arc<SyncManager>,
        alarms: AlarmServices,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
    ) -> Self {
        Self { manager, alarms, notifier, interval, running: AtomicBool::new(false) }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Arms the auto-update trigger one interval from now. Intervals shorter
    /// than a minute are stretched to one minute.
    pub fn schedule_next_update(&self) {
        match next_update_at(Utc::now(), self.interval) {
            Some(next) => {
                debug!("AutoUpdate: Next update at {}", next);
                self.alarms.schedule_auto_update_alarm(next.timestamp_millis());
            }
            None => warn!("AutoUpdate: Interval {} is out of range, not rescheduling", self.interval),
        }
    }

    pub fn stop(&self) {
        self.alarms.discard_auto_update_alarm();
        self.manager.cancel_loading();
    }

    /// Runs one background update. Returns `Ok(None)` without doing anything if
    /// an update is already in flight, or if the attempt was cancelled.
    pub async fn update(&self) -> Result<Option<SyncStatus>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("AutoUpdate: Fetching already in progress.");
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        self.schedule_next_update();
        let status = self.manager.load_schedule(false).join().await?;

        match &status {
            Some(SyncStatus::ParseSuccess) => {
                let store = self.manager.store();
                let changes_count = store.load_changed_sessions().len();
                if changes_count > 0 {
                    self.notifier.schedule_updated(&store.read_meta().version, changes_count);
                }
                info!("AutoUpdate: Background update complete");
            }
            Some(other) => info!("AutoUpdate: Background update ended with {:?}", other),
            None => info!("AutoUpdate: Background update cancelled"),
        }
        Ok(status)
    }

    /// Handles fired triggers until the timer goes away.
    pub async fn run(&self, mut fired_rx: mpsc::UnboundedReceiver<Trigger>) {
        self.schedule_next_update();
        while let Some(trigger) = fired_rx.recv().await {
            match (trigger.action, &trigger.identity) {
                (TriggerAction::AutoUpdate, _) => {
                    if let Err(e) = self.update().await {
                        warn!("AutoUpdate: Update failed: {:#}", e);
                    }
                }
                (TriggerAction::Add, TriggerIdentity::Session { session_id, title, .. }) => {
                    self.notifier.session_reminder(session_id, title);
                }
                (action, identity) => debug!("AutoUpdate: Ignoring {:?} for '{}'", action, identity),
            }
        }
    }
}
