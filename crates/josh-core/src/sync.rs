// SPDX-License-Identifier: Apache-2.0
//! Poison-tolerant locking.
//!
//! A poisoned mutex means a worker thread panicked mid-substep; the stepper
//! already surfaces that as the step's failure, so later lock holders take
//! the inner value rather than double-reporting.
use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
