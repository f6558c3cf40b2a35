// src/models.rs

//! Schedule data shared between the sync pipeline, the stores and the alarms

use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::alarms::SchedulableAlarm;

/// A single session (talk, workshop, ...) of the conference schedule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Session {
    pub session_id: String,
    pub title: String,
    pub day: i32,
    /// Start of the session in epoch milliseconds (UTC).
    pub date_utc: i64,
    pub room: String,
    /// Marked as favourite by the user.
    pub is_highlight: bool,
    pub has_alarm: bool,

    pub change_title: bool,
    pub change_time: bool,
    pub change_room: bool,
    pub change_day: bool,
    pub change_language: bool,
    pub change_speakers: bool,
    pub change_track: bool,
    pub change_is_new: bool,
    pub change_is_canceled: bool,
}

impl Session {
    /// True if any attribute changed. New and canceled sessions are counted separately.
    pub fn is_changed(&self) -> bool {
        self.change_title
            || self.change_time
            || self.change_room
            || self.change_day
            || self.change_language
            || self.change_speakers
            || self.change_track
    }

    /// True if the session carries any change flag at all.
    pub fn has_any_change(&self) -> bool {
        self.is_changed() || self.change_is_new || self.change_is_canceled
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.date_utc).single()
    }

    pub fn to_schedulable_alarm(&self) -> SchedulableAlarm {
        SchedulableAlarm {
            session_id: self.session_id.clone(),
            day: self.day,
            session_title: self.title.clone(),
            start_time: self.date_utc,
        }
    }
}

/// Schedule metadata. The `etag` is the validator token of the last fetched document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Meta {
    pub version: String,
    pub title: String,
    pub num_days: i32,
    pub etag: String,
}

/// Outcome reported by the schedule parser once it is done.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParseResult {
    pub is_success: bool,
    pub version: String,
}

impl ParseResult {
    pub fn success(version: impl Into<String>) -> Self {
        Self { is_success: true, version: version.into() }
    }

    pub fn failure(version: impl Into<String>) -> Self {
        Self { is_success: false, version: version.into() }
    }
}

/// Counts of the kinds of changes found in a schedule update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeStatistic {
    pub changed_sessions_count: usize,
    pub new_sessions_count: usize,
    pub canceled_sessions_count: usize,
    pub changed_favorites_count: usize,
}

impl ChangeStatistic {
    pub fn of(sessions: &[Session]) -> Self {
        let mut statistic = ChangeStatistic::default();
        for session in sessions {
            if session.change_is_canceled {
                statistic.canceled_sessions_count += 1;
            } else if session.change_is_new {
                statistic.new_sessions_count += 1;
            } else if session.is_changed() {
                statistic.changed_sessions_count += 1;
            }
            if session.is_highlight && session.has_any_change() {
                statistic.changed_favorites_count += 1;
            }
        }
        debug!(
            "Changes: {} changed, {} new, {} canceled, {} favorites changed",
            statistic.changed_sessions_count,
            statistic.new_sessions_count,
            statistic.canceled_sessions_count,
            statistic.changed_favorites_count
        );
        statistic
    }

    pub fn total(&self) -> usize {
        self.changed_sessions_count + self.new_sessions_count + self.canceled_sessions_count
    }
}

/// Published after a successful parse when the user has not acknowledged the changes yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleChangesParameter {
    pub schedule_version: String,
    pub change_statistic: ChangeStatistic,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        Session {
            session_id: id.to_string(),
            title: format!("Talk {}", id),
            day: 1,
            date_utc: 1_700_000_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_change_statistic_counts_each_category() {
        let mut changed = session("1");
        changed.change_room = true;
        let mut new = session("2");
        new.change_is_new = true;
        let mut canceled = session("3");
        canceled.change_is_canceled = true;
        canceled.change_time = true;
        let mut favorite = session("4");
        favorite.change_title = true;
        favorite.is_highlight = true;
        let untouched = session("5");

        let statistic = ChangeStatistic::of(&[changed, new, canceled, favorite, untouched]);

        assert_eq!(statistic.changed_sessions_count, 2);
        assert_eq!(statistic.new_sessions_count, 1);
        assert_eq!(statistic.canceled_sessions_count, 1);
        assert_eq!(statistic.changed_favorites_count, 1);
        assert_eq!(statistic.total(), 4);
    }

    #[test]
    fn test_change_statistic_of_nothing_is_empty() {
        assert_eq!(ChangeStatistic::of(&[]), ChangeStatistic::default());
    }

    #[test]
    fn test_session_to_schedulable_alarm() {
        let s = session("42");
        let alarm = s.to_schedulable_alarm();
        assert_eq!(alarm.session_id, "42");
        assert_eq!(alarm.day, 1);
        assert_eq!(alarm.session_title, "Talk 42");
        assert_eq!(alarm.start_time, 1_700_000_000_000);
        assert_eq!(s.start_time().map(|t| t.timestamp()), Some(1_700_000_000));
    }
}
