// src/alarms/timer.rs

//! Timer service implementations: a tokio-backed one which actually fires, and
//! a recording one used for dry runs and tests

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{TimerService, Trigger, TriggerIdentity};
use crate::sync::utils::lock_unpoisoned;

type PendingTriggers = Arc<Mutex<HashMap<TriggerIdentity, (u64, JoinHandle<()>)>>>;

/// Fires triggers from sleeping tokio tasks, one task per identity.
/// Fired triggers are delivered on the receiver returned by [`TokioTimerService::new`].
pub struct TokioTimerService {
    runtime: Handle,
    pending: PendingTriggers,
    generation: AtomicU64,
    fired_tx: mpsc::UnboundedSender<Trigger>,
}

impl TokioTimerService {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<Trigger>)> {
        let runtime = Handle::try_current().context("Timer service needs a tokio runtime")?;
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let service = Self {
            runtime,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            fired_tx,
        };
        Ok((service, fired_rx))
    }

    pub fn pending_count(&self) -> usize {
        lock_unpoisoned(&self.pending).len()
    }
}

/// Removes the registration of `identity` if it still belongs to `generation`.
/// A task which woke up after being replaced or cancelled gets `false`.
fn take_if_current(
    pending: &Mutex<HashMap<TriggerIdentity, (u64, JoinHandle<()>)>>,
    identity: &TriggerIdentity,
    generation: u64,
) -> bool {
    let mut pending = lock_unpoisoned(pending);
    match pending.get(identity) {
        Some((current, _)) if *current == generation => {
            pending.remove(identity);
            true
        }
        _ => false,
    }
}

impl TimerService for TokioTimerService {
    fn set_exact_wakeup(&self, trigger_at_millis: i64, trigger: &Trigger) {
        let delay_millis = (trigger_at_millis - Utc::now().timestamp_millis()).max(0) as u64;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let fired_tx = self.fired_tx.clone();
        let fired = trigger.clone();

        let mut guard = lock_unpoisoned(&self.pending);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_millis)).await;
            if !take_if_current(&pending, &fired.identity, generation) {
                debug!("Timer: '{}' was replaced or cancelled, not firing", fired);
                return;
            }
            info!("Timer: Firing '{}'", fired);
            if let Err(e) = fired_tx.send(fired) {
                debug!("Timer: Nobody listening for fired trigger: {}", e);
            }
        });

        if let Some((_, previous)) = guard.insert(trigger.identity.clone(), (generation, task)) {
            debug!("Timer: Replacing pending '{}'", trigger);
            previous.abort();
        }
        debug!("Timer: '{}' fires in {} ms", trigger, delay_millis);
    }

    fn cancel(&self, trigger: &Trigger) {
        if let Some((_, task)) = lock_unpoisoned(&self.pending).remove(&trigger.identity) {
            debug!("Timer: Cancelled '{}'", trigger);
            task.abort();
        }
    }
}

impl Drop for TokioTimerService {
    fn drop(&mut self) {
        for (_, (_, task)) in lock_unpoisoned(&self.pending).drain() {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub trigger: Trigger,
    pub trigger_at_millis: i64,
}

/// Keeps registrations in memory and never fires.
#[derive(Default)]
pub struct RecordingTimerService {
    registrations: Mutex<HashMap<TriggerIdentity, Registration>>,
}

impl RecordingTimerService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        lock_unpoisoned(&self.registrations).len()
    }

    pub fn trigger_time(&self, identity: &TriggerIdentity) -> Option<i64> {
        lock_unpoisoned(&self.registrations)
            .get(identity)
            .map(|r| r.trigger_at_millis)
    }

    pub fn registrations(&self) -> Vec<Registration> {
        let mut all: Vec<Registration> =
            lock_unpoisoned(&self.registrations).values().cloned().collect();
        all.sort_by_key(|r| r.trigger_at_millis);
        all
    }
}

impl TimerService for RecordingTimerService {
    fn set_exact_wakeup(&self, trigger_at_millis: i64, trigger: &Trigger) {
        info!("Timer: Registered '{}' at {}", trigger, trigger_at_millis);
        lock_unpoisoned(&self.registrations).insert(
            trigger.identity.clone(),
            Registration { trigger: trigger.clone(), trigger_at_millis },
        );
    }

    fn cancel(&self, trigger: &Trigger) {
        if lock_unpoisoned(&self.registrations).remove(&trigger.identity).is_some() {
            info!("Timer: Cancelled '{}'", trigger);
        }
    }
}
