//! Per-component simulated time with a resynchronisation quantum.

use crate::{Time, UNIT_TIME};
use std::fmt;
use std::fmt::{Display, Formatter};

/// Local time of one component.
///
/// Time never regresses: [`set`](Self::set) to an earlier value is a no-op. Once the component's
/// time is past `T`, every message it emits carries a timestamp `>= T`, which is what lets peers
/// advance without waiting any further for it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalTime {
    time: Time,
    quantum: Time,
    /// Time at which the component last sent a message.
    last_sync: Time,
}

impl LocalTime {
    /// # Panics
    ///
    /// Panics if `quantum` is zero.
    pub fn new(quantum: Time) -> Self {
        assert!(quantum > 0, "a zero quantum would require syncing on every cycle");
        Self {
            time: 0,
            quantum,
            last_sync: 0,
        }
    }

    pub fn get(&self) -> Time {
        self.time
    }

    /// Advances to `max(current, time)`.
    pub fn set(&mut self, time: Time) {
        if time > self.time {
            self.time = time;
        }
    }

    /// Advances by `delta` time units.
    pub fn add(&mut self, delta: Time) {
        self.time = self.time.saturating_add(delta);
    }

    /// Advances by one simulation cycle.
    pub fn tick(&mut self) {
        self.add(UNIT_TIME);
    }

    /// Restarts the quantum countdown, to be called whenever a message is sent.
    pub fn reset_sync(&mut self) {
        self.last_sync = self.time;
    }

    /// Returns `true` once a full quantum has elapsed since the last sent message.
    pub fn need_sync(&self) -> bool {
        self.time - self.last_sync >= self.quantum
    }

    pub fn quantum(&self) -> Time {
        self.quantum
    }

    /// Time elapsed since the last sent message.
    pub fn since_sync(&self) -> Time {
        self.time - self.last_sync
    }
}

impl Default for LocalTime {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_QUANTUM)
    }
}

impl Display for LocalTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "t={} (q={}, synced at {})", self.time, self.quantum, self.last_sync)
    }
}
