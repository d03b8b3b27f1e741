//! Cooperative cancellation for the scheduler loop

use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

/// Cloneable cancellation flag
///
/// Cancelling never interrupts a job in flight. The scheduler checks the
/// flag between jobs and while sleeping until the next tick.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter
    pub fn cancel(&self) {
        let (cancelled, condvar) = &*self.inner;
        *cancelled.lock().unwrap() = true;
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Block until `deadline` or cancellation, whichever comes first.
    ///
    /// Returns `true` if cancelled.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let (cancelled, condvar) = &*self.inner;
        let mut guard = cancelled.lock().unwrap();

        while !*guard {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            guard = condvar.wait_timeout(guard, deadline - now).unwrap().0;
        }

        *guard
    }
}
