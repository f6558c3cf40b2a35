// src/store.rs

//! Persistence of the cached schedule. The sync pipeline talks to the
//! [`ScheduleStore`] trait; two stores are provided: an in-memory one and a
//! JSON file in the platform data directory.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::models::{Meta, Session};
use crate::sync::utils::lock_unpoisoned;

pub trait ScheduleStore: Send + Sync {
    fn read_schedule_url(&self) -> String;
    fn read_meta(&self) -> Meta;
    fn update_meta(&self, meta: Meta) -> Result<()>;
    /// Replaces the cached sessions. Change flags are computed against the previous set.
    fn update_sessions(&self, sessions: Vec<Session>) -> Result<()>;
    fn load_sessions(&self) -> Vec<Session>;
    fn load_changed_sessions(&self) -> Vec<Session>;
    fn read_schedule_changes_seen(&self) -> bool;
    fn update_schedule_changes_seen(&self, seen: bool) -> Result<()>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct StoreState {
    pub schedule_url: String,
    pub meta: Meta,
    pub sessions: Vec<Session>,
    pub schedule_changes_seen: bool,
}

impl StoreState {
    fn with_url(schedule_url: &str) -> Self {
        Self {
            schedule_url: schedule_url.to_string(),
            schedule_changes_seen: true,
            ..Default::default()
        }
    }

    fn apply_sessions(&mut self, incoming: Vec<Session>) {
        let flagged = flag_session_changes(&self.sessions, incoming);
        if flagged.iter().any(Session::has_any_change) {
            debug!("Store: Schedule contains changes, marking them as unseen");
            self.schedule_changes_seen = false;
        }
        self.sessions = flagged;
    }

    fn changed_sessions(&self) -> Vec<Session> {
        self.sessions.iter().filter(|s| s.has_any_change()).cloned().collect()
    }
}

/// Compares `incoming` against `previous` and sets the change flags on the result.
/// Sessions missing from `incoming` are kept and flagged as canceled. Nothing is
/// flagged when there was no previous schedule.
pub fn flag_session_changes(previous: &[Session], incoming: Vec<Session>) -> Vec<Session> {
    if previous.is_empty() {
        return incoming;
    }
    let mut old_by_id: HashMap<&str, &Session> =
        previous.iter().map(|s| (s.session_id.as_str(), s)).collect();

    let mut result = Vec::with_capacity(incoming.len());
    for mut session in incoming {
        match old_by_id.remove(session.session_id.as_str()) {
            Some(old) => {
                session.change_title = old.title != session.title;
                session.change_time = old.date_utc != session.date_utc;
                session.change_room = old.room != session.room;
                session.change_day = old.day != session.day;
                session.is_highlight = old.is_highlight;
                session.has_alarm = old.has_alarm;
            }
            None => session.change_is_new = true,
        }
        result.push(session);
    }

    let mut canceled: Vec<Session> = old_by_id
        .into_values()
        .filter(|old| !old.change_is_canceled)
        .map(|old| Session { change_is_canceled: true, ..old.clone() })
        .collect();
    canceled.sort_by(|a, b| a.session_id.cmp(&b.session_id));
    result.extend(canceled);
    result
}

/// Keeps everything in memory.
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new(schedule_url: &str) -> Self {
        Self { state: Mutex::new(StoreState::with_url(schedule_url)) }
    }
}

impl ScheduleStore for MemoryStore {
    fn read_schedule_url(&self) -> String {
        lock_unpoisoned(&self.state).schedule_url.clone()
    }

    fn read_meta(&self) -> Meta {
        lock_unpoisoned(&self.state).meta.clone()
    }

    fn update_meta(&self, meta: Meta) -> Result<()> {
        lock_unpoisoned(&self.state).meta = meta;
        Ok(())
    }

    fn update_sessions(&self, sessions: Vec<Session>) -> Result<()> {
        lock_unpoisoned(&self.state).apply_sessions(sessions);
        Ok(())
    }

    fn load_sessions(&self) -> Vec<Session> {
        lock_unpoisoned(&self.state).sessions.clone()
    }

    fn load_changed_sessions(&self) -> Vec<Session> {
        lock_unpoisoned(&self.state).changed_sessions()
    }

    fn read_schedule_changes_seen(&self) -> bool {
        lock_unpoisoned(&self.state).schedule_changes_seen
    }

    fn update_schedule_changes_seen(&self, seen: bool) -> Result<()> {
        lock_unpoisoned(&self.state).schedule_changes_seen = seen;
        Ok(())
    }
}

/// Persists the whole state as JSON after every write.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileStore {
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "ConfSync", "ConfSync")
            .context("Failed to get project directories")?;
        let data_dir = proj_dirs.data_dir();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        Ok(data_dir.join("schedule.json"))
    }

    /// Opens the store at `path`, starting empty if the file does not exist yet.
    /// `schedule_url` always overrides the stored URL.
    pub fn open(path: &Path, schedule_url: &str) -> Result<Self> {
        let mut state = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read store file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse store file: {}", path.display()))?
        } else {
            info!("Store: No cached schedule at {}, starting empty", path.display());
            StoreState::with_url(schedule_url)
        };
        state.schedule_url = schedule_url.to_string();
        Ok(Self { path: path.to_path_buf(), state: Mutex::new(state) })
    }

    fn write<F: FnOnce(&mut StoreState)>(&self, change: F) -> Result<()> {
        let mut state = lock_unpoisoned(&self.state);
        change(&mut state);
        let contents =
            serde_json::to_string_pretty(&*state).context("Failed to serialize store state")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write store file: {}", self.path.display()))
    }
}

impl ScheduleStore for FileStore {
    fn read_schedule_url(&self) -> String {
        lock_unpoisoned(&self.state).schedule_url.clone()
    }

    fn read_meta(&self) -> Meta {
        lock_unpoisoned(&self.state).meta.clone()
    }

    fn update_meta(&self, meta: Meta) -> Result<()> {
        self.write(|state| state.meta = meta)
    }

    fn update_sessions(&self, sessions: Vec<Session>) -> Result<()> {
        self.write(|state| state.apply_sessions(sessions))
    }

    fn load_sessions(&self) -> Vec<Session> {
        lock_unpoisoned(&self.state).sessions.clone()
    }

    fn load_changed_sessions(&self) -> Vec<Session> {
        lock_unpoisoned(&self.state).changed_sessions()
    }

    fn read_schedule_changes_seen(&self) -> bool {
        lock_unpoisoned(&self.state).schedule_changes_seen
    }

    fn update_schedule_changes_seen(&self, seen: bool) -> Result<()> {
        self.write(|state| state.schedule_changes_seen = seen)
    }
}
