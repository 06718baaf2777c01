//! The background reaper thread.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::database::DatabaseCore;

/// Shutdown flag paired with a condvar so a sleeping reaper wakes
/// immediately when asked to stop.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    /// Sleeps for `interval` or until signalled. Returns whether to stop.
    fn wait(&self, interval: Duration) -> bool {
        let guard = match self.stopped.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (guard, _timeout) = match self.condvar.wait_timeout(guard, interval) {
            Ok(pair) => pair,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard
    }

    fn stop(&self) {
        let mut guard = match self.stopped.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = true;
        drop(guard);
        self.condvar.notify_all();
    }
}

/// Handle to the background sweep thread.
///
/// Holds a `Weak` to the database core: the reaper never keeps the database
/// alive, and a sweep that cannot upgrade the weak reference ends the loop.
#[derive(Debug)]
pub(crate) struct Reaper {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Starts the sweep loop on a named thread.
    pub(crate) fn spawn(core: Weak<DatabaseCore>, interval: Duration) -> Self {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let spawned = std::thread::Builder::new()
            .name("rowstash-reaper".to_string())
            .spawn(move || {
                loop {
                    if thread_signal.wait(interval) {
                        break;
                    }
                    let Some(core) = core.upgrade() else { break };
                    if core.is_closed() {
                        break;
                    }
                    core.sweep();
                }
                tracing::debug!("reaper thread exiting");
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(error) => {
                tracing::error!(%error, "failed to spawn reaper thread, sweeps disabled");
                None
            },
        };
        Self { signal, handle }
    }

    /// Stops the thread and waits for it to finish.
    pub(crate) fn stop(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("reaper thread panicked during shutdown");
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}
