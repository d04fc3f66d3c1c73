//! Tick-driven protocol timers
//! 
//! Timers do not own a thread. The owner advances them with
//! [`RlcTimer::tick`] from its periodic tick, which must run at a finer
//! resolution than the shortest configured timer.

use tracing::trace;

/// Single-shot, restartable timer counted in milliseconds
#[derive(Debug, Clone)]
pub struct RlcTimer {
    name: &'static str,
    duration_ms: u32,
    remaining_ms: u32,
    running: bool,
}

impl RlcTimer {
    pub fn new(name: &'static str, duration_ms: u32) -> Self {
        Self {
            name,
            duration_ms,
            remaining_ms: 0,
            running: false,
        }
    }

    /// (Re)start with the full duration
    pub fn start(&mut self) {
        trace!("{} started ({} ms)", self.name, self.duration_ms);
        self.remaining_ms = self.duration_ms;
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.remaining_ms = 0;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Advance by `elapsed_ms`. Returns true exactly once, on expiry.
    pub fn tick(&mut self, elapsed_ms: u32) -> bool {
        if !self.running {
            return false;
        }
        self.remaining_ms = self.remaining_ms.saturating_sub(elapsed_ms);
        if self.remaining_ms > 0 {
            return false;
        }
        self.running = false;
        trace!("{} expired", self.name);
        true
    }
}
