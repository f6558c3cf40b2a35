// src/sync/utils.rs

//! Utility functions for sync operations

use std::error::Error;
use std::sync::{Mutex, MutexGuard};

/// Locks the mutex, recovering the data if another thread panicked while holding it.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Iterates over an error and all of its sources, outermost first.
pub fn error_chain<'a>(
    error: &'a (dyn Error + 'static),
) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(error), |&e| e.source())
}

/// Message of the error nested at most `max_depth` sources deep, preferring the deepest.
pub fn deepest_message(error: &(dyn Error + 'static), max_depth: usize) -> String {
    error_chain(error)
        .take(max_depth + 1)
        .last()
        .map(|e| e.to_string())
        .unwrap_or_default()
}
