//! Instrumented mutual exclusion for the shared connection.
//!
//! [`GuardedLock`] wraps `std::sync::Mutex` with poison recovery and two
//! counters: lifetime acquisitions, and callers currently queued or holding
//! the lock. The counters exist for contention visibility only — correctness
//! never depends on them. Timed acquisition is a try-lock spin-wait;
//! `std::sync::Mutex` has no native `try_lock_for`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Sleep between try-lock attempts while waiting for the mutex.
const SPIN_SLEEP: Duration = Duration::from_millis(1);

/// Snapshot of lock contention counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    /// Lifetime number of successful acquisitions.
    pub acquired: u64,
    /// Callers currently waiting for or holding the lock.
    pub queued: u64,
}

/// Mutex wrapper with acquisition counters and bounded-timeout acquire.
#[derive(Debug)]
pub struct GuardedLock<T> {
    inner: Mutex<T>,
    acquired_total: AtomicU64,
    queued: AtomicU64,
}

/// Scoped guard; releases the lock and settles the queued counter on drop.
#[derive(Debug)]
pub struct LockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    queued: &'a AtomicU64,
}

impl<T> std::ops::Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<T> GuardedLock<T> {
    /// Wraps a value in a guarded lock.
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            acquired_total: AtomicU64::new(0),
            queued: AtomicU64::new(0),
        }
    }

    /// Acquires the lock, blocking without bound.
    ///
    /// If the mutex is poisoned (a panic in a previous critical section), we
    /// recover the inner value and log a warning. The connection state is
    /// still valid; refusing to hand it out would cascade the failure.
    pub fn lock(&self) -> LockGuard<'_, T> {
        self.queued.fetch_add(1, Ordering::Relaxed);
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("connection mutex was poisoned, recovering");
                metrics::counter!("connection_lock_poison_recovery_total").increment(1);
                poisoned.into_inner()
            },
        };
        self.acquired_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("connection_lock_acquired_total").increment(1);
        LockGuard {
            guard,
            queued: &self.queued,
        }
    }

    /// Acquires the lock, waiting at most `timeout`.
    ///
    /// The queued counter is incremented optimistically before the wait and
    /// settled back down if the wait fails, so the gauge reflects callers in
    /// line as well as the holder. A timeout leaves the protected value
    /// untouched and surfaces as [`Error::LockTimeout`].
    pub fn lock_timeout(&self, operation: &str, timeout: Duration) -> Result<LockGuard<'_, T>> {
        self.queued.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("connection_lock_waiting").set(f64::from(
            u32::try_from(self.queued.load(Ordering::Relaxed)).unwrap_or(u32::MAX),
        ));

        let start = Instant::now();
        loop {
            match self.inner.try_lock() {
                Ok(guard) => {
                    self.acquired_total.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("connection_lock_acquired_total").increment(1);
                    return Ok(LockGuard {
                        guard,
                        queued: &self.queued,
                    });
                },
                Err(TryLockError::Poisoned(poisoned)) => {
                    tracing::warn!("connection mutex was poisoned, recovering");
                    metrics::counter!("connection_lock_poison_recovery_total").increment(1);
                    self.acquired_total.fetch_add(1, Ordering::Relaxed);
                    return Ok(LockGuard {
                        guard: poisoned.into_inner(),
                        queued: &self.queued,
                    });
                },
                Err(TryLockError::WouldBlock) => {
                    if start.elapsed() > timeout {
                        self.queued.fetch_sub(1, Ordering::Relaxed);
                        metrics::counter!("connection_lock_timeouts_total").increment(1);
                        return Err(Error::LockTimeout {
                            operation: operation.to_string(),
                            timeout,
                        });
                    }
                    std::thread::sleep(SPIN_SLEEP);
                },
            }
        }
    }

    /// Whether the lock is currently held by anyone.
    pub fn is_locked(&self) -> bool {
        match self.inner.try_lock() {
            Ok(_guard) => false,
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(_)) => false,
        }
    }

    /// Snapshot of the contention counters.
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquired: self.acquired_total.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
        }
    }
}
