//! Resettable idle alarm
//!
//! The UDP proxy loops wake up every few seconds to poll their sockets;
//! the alarm tells them whether the flow has been idle long enough to tear
//! down. Any successful transfer pushes the deadline out again.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A deadline that moves forward on every [`reset`](Alarm::reset).
///
/// Cheap to share between the two directions of a proxy loop.
#[derive(Debug)]
pub struct Alarm {
    duration: Duration,
    deadline: Mutex<Instant>,
}

impl Alarm {
    /// Create an alarm that expires `duration` after the last reset.
    pub fn new(duration: Duration) -> Self {
        Alarm {
            duration,
            deadline: Mutex::new(Instant::now() + duration),
        }
    }

    /// Push the deadline out by the full duration.
    pub fn reset(&self) {
        let mut deadline = self.deadline.lock().unwrap();
        *deadline = Instant::now() + self.duration;
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        let deadline = self.deadline.lock().unwrap();
        Instant::now() >= *deadline
    }
}
