//! # Command Register
//!
//! Lock-free single-producer/single-consumer command delivery between the
//! control thread and the playback thread.
//!
//! One `AtomicU8` slot carries the command code in its high nibble and a
//! rolling 4-bit sequence counter in its low nibble. The control thread is
//! the only writer of the slot; the playback thread detects a new command by
//! comparing the byte against the last one it acknowledged, so staleness is
//! decided without taking a lock on the hot path. Command arguments travel in
//! a mutex-held struct the playback thread copies out at the ack boundary;
//! the control thread may legally overwrite them as soon as it issues the
//! next command.
//!
//! Delivery is latest-wins by design: rapid issues without intermediate acks
//! leave only the merged newest state visible, and superseded commands are
//! never observed.

use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::error;

/// Command codes carried in the high nibble of the slot byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    None = 0x0,
    Open = 0x1,
    Search = 0x2,
    Play = 0x3,
    Pause = 0x4,
    StepForward = 0x5,
    /// Reserved; dispatched but never issued by the public API.
    Stop = 0x6,
    Quit = 0x7,
    SpeedChange = 0x8,
    Lock = 0x9,
    Unlock = 0xA,
    Skip = 0xB,
    Precache = 0xC,
}

impl CommandCode {
    fn from_nibble(nibble: u8) -> CommandCode {
        match nibble {
            0x1 => CommandCode::Open,
            0x2 => CommandCode::Search,
            0x3 => CommandCode::Play,
            0x4 => CommandCode::Pause,
            0x5 => CommandCode::StepForward,
            0x6 => CommandCode::Stop,
            0x7 => CommandCode::Quit,
            0x8 => CommandCode::SpeedChange,
            0x9 => CommandCode::Lock,
            0xA => CommandCode::Unlock,
            0xB => CommandCode::Skip,
            0xC => CommandCode::Precache,
            _ => CommandCode::None,
        }
    }
}

/// Arguments staged by the control thread before a command is published.
///
/// Fields persist between commands; each command reads only the fields it
/// cares about.
#[derive(Debug, Clone, Default)]
pub struct CommandArgs {
    /// Source file; also keys the on-disk frame index cache.
    pub file: PathBuf,
    /// Frame to search or skip to.
    pub frame: u16,
    /// Minimum time a search must appear to take (simulated seek latency).
    pub min_seek_ms: u32,
    /// Timer reference playback starts from.
    pub timer: u32,
    /// Whether `precache_index` selects the source instead of `file`.
    pub use_precached: bool,
    /// Precache entry to open when `use_precached` is set.
    pub precache_index: usize,
    /// Frames to skip per shown frame (2X-style playback).
    pub skip_per_frame: u32,
    /// Frames to stall per shown frame (1/2X-style playback).
    pub stall_per_frame: u32,
}

/// The shared command register.
pub struct CommandChannel {
    slot: AtomicU8,
    args: Mutex<CommandArgs>,
    ack: Mutex<u64>,
    ack_changed: Condvar,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self {
            slot: AtomicU8::new(0),
            args: Mutex::new(CommandArgs::default()),
            ack: Mutex::new(0),
            ack_changed: Condvar::new(),
        }
    }

    /// Control side: stage argument fields for the next command.
    pub fn stage<F: FnOnce(&mut CommandArgs)>(&self, f: F) {
        f(&mut self.args.lock());
    }

    /// Control side: publish `code` and wait for the playback thread to
    /// acknowledge it.
    ///
    /// Returns `true` once the ack counter moves past `last_ack` (which is
    /// updated in place), `false` on timeout. A timeout means "no response":
    /// the published slot is not rolled back, so the command may still be
    /// picked up later.
    pub fn issue(&self, code: CommandCode, last_ack: &mut u64, timeout: Duration) -> bool {
        let current = self.slot.load(Ordering::Relaxed);
        let next = ((code as u8) << 4) | (current.wrapping_add(1) & 0x0F);
        self.slot.store(next, Ordering::Release);

        let deadline = Instant::now() + timeout;
        let mut ack = self.ack.lock();
        while *ack == *last_ack {
            if self.ack_changed.wait_until(&mut ack, deadline).timed_out() {
                break;
            }
        }

        if *ack != *last_ack {
            *last_ack = *ack;
            true
        } else {
            error!(
                command = ?code,
                "timed out waiting for the playback thread to accept command"
            );
            false
        }
    }

    /// Playback side: the pending command, if the slot has changed since the
    /// byte recorded in `last_observed`.
    ///
    /// Does not consume the command; call [`acknowledge`](Self::acknowledge)
    /// once its arguments have been copied.
    pub fn peek(&self, last_observed: u8) -> Option<CommandCode> {
        let current = self.slot.load(Ordering::Acquire);
        if current != last_observed {
            Some(CommandCode::from_nibble(current >> 4))
        } else {
            None
        }
    }

    /// Playback side: copy the staged arguments.
    pub fn args(&self) -> CommandArgs {
        self.args.lock().clone()
    }

    /// Playback side: record the current slot byte into `last_observed` and
    /// bump the ack counter.
    pub fn acknowledge(&self, last_observed: &mut u8) {
        *last_observed = self.slot.load(Ordering::Acquire);
        let mut ack = self.ack.lock();
        *ack += 1;
        self.ack_changed.notify_all();
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fresh_channel_has_no_pending_command() {
        let channel = CommandChannel::new();
        assert_eq!(channel.peek(0), None);
    }

    #[test]
    fn issue_is_acknowledged_by_reader_thread() {
        let channel = Arc::new(CommandChannel::new());
        let reader = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                let mut last_observed = 0u8;
                loop {
                    if let Some(code) = channel.peek(last_observed) {
                        channel.acknowledge(&mut last_observed);
                        return code;
                    }
                    thread::yield_now();
                }
            })
        };

        let mut last_ack = 0u64;
        assert!(channel.issue(CommandCode::Play, &mut last_ack, Duration::from_secs(5)));
        assert_eq!(reader.join().unwrap(), CommandCode::Play);
    }

    #[test]
    fn rapid_issues_coalesce_to_the_latest_command() {
        let channel = CommandChannel::new();
        let mut last_ack = 0u64;

        // No reader is running, so each issue times out immediately; the
        // writes themselves still land.
        channel.issue(CommandCode::Pause, &mut last_ack, Duration::ZERO);
        channel.issue(CommandCode::Search, &mut last_ack, Duration::ZERO);
        channel.issue(CommandCode::Play, &mut last_ack, Duration::ZERO);

        let mut last_observed = 0u8;
        assert_eq!(channel.peek(last_observed), Some(CommandCode::Play));
        channel.acknowledge(&mut last_observed);

        // The superseded commands are gone for good.
        assert_eq!(channel.peek(last_observed), None);
    }

    #[test]
    fn acknowledge_increments_exactly_once_per_command() {
        let channel = CommandChannel::new();
        let mut last_observed = 0u8;
        let mut last_ack = 0u64;

        channel.issue(CommandCode::Pause, &mut last_ack, Duration::ZERO);
        assert!(channel.peek(last_observed).is_some());
        channel.acknowledge(&mut last_observed);
        assert_eq!(*channel.ack.lock(), 1);

        // Acking leaves the slot untouched; only a new issue revives it.
        assert_eq!(channel.peek(last_observed), None);
        channel.issue(CommandCode::Pause, &mut last_ack, Duration::ZERO);
        assert_eq!(channel.peek(last_observed), Some(CommandCode::Pause));
    }

    #[test]
    fn sequence_counter_rolls_over_within_four_bits() {
        let channel = CommandChannel::new();
        let mut last_ack = 0u64;
        let mut last_observed = 0u8;

        for _ in 0..40 {
            channel.issue(CommandCode::Pause, &mut last_ack, Duration::ZERO);
            assert_eq!(channel.peek(last_observed), Some(CommandCode::Pause));
            channel.acknowledge(&mut last_observed);
        }
    }

    #[test]
    fn args_are_copied_not_shared() {
        let channel = CommandChannel::new();
        channel.stage(|args| {
            args.frame = 55;
            args.min_seek_ms = 100;
        });
        let copied = channel.args();

        channel.stage(|args| args.frame = 99);
        assert_eq!(copied.frame, 55);
        assert_eq!(copied.min_seek_ms, 100);
        assert_eq!(channel.args().frame, 99);
    }

    #[test]
    fn timeout_reports_failure_without_undoing_the_write() {
        let channel = CommandChannel::new();
        let mut last_ack = 0u64;
        assert!(!channel.issue(CommandCode::Quit, &mut last_ack, Duration::from_millis(5)));

        // The command is still there for a late reader.
        assert_eq!(channel.peek(0), Some(CommandCode::Quit));
    }
}
