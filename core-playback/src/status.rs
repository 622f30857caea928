//! # Engine Status
//!
//! The engine's status cell: written only by the playback thread, read and
//! waited on by the control thread.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::error;

/// Engine status. Exactly one value at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    /// A long-running command (open, search, precache) is in flight.
    Busy,
    /// A source is open (or playback ran off the end); nothing is rendering.
    Stopped,
    Playing,
    Paused,
    /// Terminal for the current source; recover with a new open or quit.
    Error,
}

/// Outcome of a blocking status wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWait {
    /// The requested status was observed.
    Reached,
    /// The engine reported an error, or the wait timed out outright.
    Failed,
    /// The wait timed out while the engine was legitimately busy.
    StillBusy,
}

/// Status cell shared between the two threads.
///
/// The playback thread is the only writer. Waits use a condvar with a
/// deadline rather than spinning, but keep the bounded-wait failure
/// semantics: a timeout is a protocol failure unless the engine is Busy.
pub struct StatusCell {
    inner: Mutex<PlayerStatus>,
    changed: Condvar,
}

impl StatusCell {
    pub fn new(initial: PlayerStatus) -> Self {
        Self {
            inner: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> PlayerStatus {
        *self.inner.lock()
    }

    /// Playback side: publish a new status and wake any waiter.
    pub fn set(&self, status: PlayerStatus) {
        *self.inner.lock() = status;
        self.changed.notify_all();
    }

    /// Control side: block until the status becomes `target`.
    ///
    /// Returns [`StatusWait::Failed`] as soon as Error is observed, and
    /// [`StatusWait::StillBusy`] if the deadline passes while the engine is
    /// Busy (the operation is simply taking a while).
    pub fn wait_for(&self, target: PlayerStatus, timeout: Duration) -> StatusWait {
        let deadline = Instant::now() + timeout;
        let mut current = self.inner.lock();
        loop {
            if *current == target {
                return StatusWait::Reached;
            }
            if *current == PlayerStatus::Error {
                return StatusWait::Failed;
            }
            if self.changed.wait_until(&mut current, deadline).timed_out() {
                return if *current == target {
                    StatusWait::Reached
                } else if *current == PlayerStatus::Busy {
                    StatusWait::StillBusy
                } else {
                    error!(expected = ?target, actual = ?*current, "timed out waiting for engine status");
                    StatusWait::Failed
                };
            }
        }
    }
}
