// src/alarms/mod.rs

//! Session reminders and the auto-update wake-up, registered with a timer service

pub mod timer;

use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use std::fmt;
use std::sync::Arc;

pub use timer::{RecordingTimerService, TokioTimerService};

/// Identifies a session for which a reminder can be scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulableAlarm {
    pub session_id: String,
    pub day: i32,
    pub session_title: String,
    /// Epoch milliseconds (UTC) at which the reminder fires.
    pub start_time: i64,
}

impl SchedulableAlarm {
    pub fn start_time_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.start_time).single()
    }
}

/// What the receiver of a trigger is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerAction {
    Add,
    Delete,
    AutoUpdate,
}

impl TriggerAction {
    /// Fixed tag prefixed to the identity key of a trigger.
    pub fn tag(self) -> &'static str {
        match self {
            TriggerAction::Add => "add",
            TriggerAction::Delete => "delete",
            TriggerAction::AutoUpdate => "update",
        }
    }
}

/// The registration slot of a trigger. Two triggers with the same identity
/// replace each other in the timer service regardless of their action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TriggerIdentity {
    Session {
        session_id: String,
        day: i32,
        title: String,
        start_time: i64,
    },
    AutoUpdate,
}

impl TriggerIdentity {
    /// Stable key of the registration slot, without the action tag.
    pub fn key(&self) -> String {
        match self {
            TriggerIdentity::Session { session_id, day, title, start_time } => {
                format!("session:{}:{}:{}:{}", session_id, day, start_time, title)
            }
            TriggerIdentity::AutoUpdate => "auto-update".to_string(),
        }
    }
}

impl fmt::Display for TriggerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub action: TriggerAction,
    pub identity: TriggerIdentity,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl Trigger {
    /// Tagged key, e.g. `add:session:7001:2:1703500000000:Opening`. Add and
    /// delete keys for one alarm differ only in the tag, so both resolve to the
    /// slot of [`TriggerIdentity::key`].
    pub fn key(&self) -> String {
        format!("{}:{}", self.action.tag(), self.identity.key())
    }

    fn for_session(action: TriggerAction, alarm: &SchedulableAlarm) -> Self {
        Trigger {
            action,
            identity: TriggerIdentity::Session {
                session_id: alarm.session_id.clone(),
                day: alarm.day,
                title: alarm.session_title.clone(),
                start_time: alarm.start_time,
            },
        }
    }

    pub fn session_add(alarm: &SchedulableAlarm) -> Self {
        Self::for_session(TriggerAction::Add, alarm)
    }

    pub fn session_delete(alarm: &SchedulableAlarm) -> Self {
        Self::for_session(TriggerAction::Delete, alarm)
    }

    pub fn auto_update() -> Self {
        Trigger { action: TriggerAction::AutoUpdate, identity: TriggerIdentity::AutoUpdate }
    }
}

/// A wake-capable timer. Registrations are keyed by [`TriggerIdentity`]; setting
/// an identity that is already registered replaces it. Neither call reports
/// failure and cancelling an unknown identity is ignored.
pub trait TimerService: Send + Sync {
    fn set_exact_wakeup(&self, trigger_at_millis: i64, trigger: &Trigger);
    fn cancel(&self, trigger: &Trigger);
}

/// Schedules and discards alarms through a [`TimerService`].
#[derive(Clone)]
pub struct AlarmServices {
    timer: Arc<dyn TimerService>,
}

impl AlarmServices {
    pub fn new(timer: Arc<dyn TimerService>) -> Self {
        Self { timer }
    }

    /// Schedules the given alarm. Existing alarms for the same session are
    /// discarded first if `discard_existing` is set.
    pub fn schedule_session_alarm(&self, alarm: &SchedulableAlarm, discard_existing: bool) {
        let trigger = Trigger::session_add(alarm);
        debug!(
            "Alarms: Scheduling '{}' at {} (discard existing: {})",
            trigger, alarm.start_time, discard_existing
        );
        if discard_existing {
            self.timer.cancel(&trigger);
        }
        self.timer.set_exact_wakeup(alarm.start_time, &trigger);
    }

    pub fn discard_session_alarm(&self, alarm: &SchedulableAlarm) {
        let trigger = Trigger::session_delete(alarm);
        debug!("Alarms: Discarding '{}'", trigger);
        self.timer.cancel(&trigger);
    }

    /// Registers the internal wake-up which drives automatic schedule updates.
    pub fn schedule_auto_update_alarm(&self, trigger_at_millis: i64) {
        debug!("Alarms: Scheduling auto update at {}", trigger_at_millis);
        self.timer.set_exact_wakeup(trigger_at_millis, &Trigger::auto_update());
    }

    pub fn discard_auto_update_alarm(&self) {
        debug!("Alarms: Discarding auto update");
        self.timer.cancel(&Trigger::auto_update());
    }
}
