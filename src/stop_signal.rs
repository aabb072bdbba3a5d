//! A shared, cloneable stop flag that blocking code can sleep on.

use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

/// Cooperative cancellation for the monitor. Cloning a [`StopSignal`] gives
/// another handle to the same flag; once [`StopSignal::stop`] is called every
/// clone reports stopped and every sleeper in [`StopSignal::wait`] wakes up.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    /// A fresh signal that has not been stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake everybody waiting on it.
    pub fn stop(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    /// Whether [`StopSignal::stop`] has been called on any clone.
    pub fn is_stopped(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration`, returning early if the signal is raised.
    /// Returns `true` when the signal was (or already is) stopped.
    pub fn wait(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
