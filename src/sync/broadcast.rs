// src/sync/broadcast.rs

//! Live multicast of sync statuses and schedule change summaries.
//!
//! Subscribers only see values published after they subscribed. There is no
//! replay: a subscriber joining after an attempt finished sees nothing of it.
//! Publishing never waits for subscribers; one that falls more than the channel
//! capacity behind misses the oldest values.

use log::{debug, warn};
use once_cell::sync::OnceCell;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::status::SyncStatus;
use super::types::SyncConfig;

static GLOBAL_STATUS: OnceCell<Broadcaster<SyncStatus>> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct Broadcaster<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Broadcaster<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Forwards `value` to current subscribers. Dropped if there are none.
    pub fn publish(&self, value: T) {
        if self.tx.send(value).is_err() {
            debug!("Broadcast: No subscribers, value dropped");
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription { rx: self.tx.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Broadcaster<SyncStatus> {
    /// The process-wide status channel, created on first use.
    pub fn global() -> &'static Broadcaster<SyncStatus> {
        Self::global_with_capacity(SyncConfig::default().status_channel_capacity)
    }

    /// Like [`Broadcaster::global`], but sizes the channel with `capacity` if
    /// this call creates it. Later calls get the existing channel unchanged.
    pub fn global_with_capacity(capacity: usize) -> &'static Broadcaster<SyncStatus> {
        GLOBAL_STATUS.get_or_init(|| {
            debug!("Broadcast: Creating status channel with capacity {}", capacity);
            Broadcaster::new(capacity)
        })
    }
}

pub struct Subscription<T: Clone> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Waits for the next value. Returns `None` once the broadcaster is gone.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(RecvError::Lagged(n)) => {
                    warn!("Broadcast: Subscriber lagged, skipped {} values", n);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already published value without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Lagged(n)) => {
                    warn!("Broadcast: Subscriber lagged, skipped {} values", n);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Everything published so far that has not been read yet.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
