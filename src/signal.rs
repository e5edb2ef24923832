//! Manual-reset signal for worker coordination.
//!
//! Used for the shutdown request, the first-frame-ready latch, and the
//! worker-finished notification. Once set, the signal stays set for late
//! waiters until explicitly cleared. `wait_timeout` makes paced sleeps and
//! reconnect backoffs interruptible, so a stop request is honored immediately
//! instead of after a full frame interval.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub struct Signal {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Set the signal and wake every waiter. Idempotent.
    pub fn set(&self) {
        let mut state = self.state.lock();
        if !*state {
            *state = true;
            self.cond.notify_all();
        }
    }

    /// Reset to the unsignaled state.
    pub fn clear(&self) {
        *self.state.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Wait until the signal is set or the timeout elapses.
    ///
    /// Returns true when the signal was set (including before the call).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if *state {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        while !*state {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return *state;
            }
        }
        true
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
