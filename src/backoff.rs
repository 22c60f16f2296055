//! Linear backoff calculator for generator retry logic.
//!
//! Tracks the current delay and attempt count. The delay grows by the
//! initial step after each failure, capped at `max_delay`. Calling `reset()`
//! returns the delay to `initial_delay`.

use std::time::Duration;

pub struct Backoff {
    initial_delay: Duration,
    max_delay: Duration,
    current_delay: Duration,
    /// Number of consecutive attempts (resets on `reset()`).
    pub attempt: u32,
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            current_delay: initial_delay,
            attempt: 0,
        }
    }

    /// Returns the current delay and advances the state.
    /// The delay grows by one step (up to `max_delay`) for the next call.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        self.attempt += 1;
        self.current_delay = (self.current_delay + self.initial_delay).min(self.max_delay);
        delay
    }

    /// Resets the backoff to initial state.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns true if the consecutive attempt count has reached `max`.
    pub fn exceeded_max_attempts(&self, max: u32) -> bool {
        self.attempt >= max
    }
}
