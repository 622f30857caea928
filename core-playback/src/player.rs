//! # Player Control Handle
//!
//! The control-side surface of the engine. `Player::spawn` starts the
//! dedicated playback thread; every operation here publishes a command into
//! the shared register and, where the contract calls for it, blocks until a
//! status is observed.
//!
//! Fire-and-forget operations return `bool` (the command was acknowledged);
//! the blocking helpers return [`StatusWait`] so callers can tell an error
//! from an operation that is simply still busy.

use crate::command::CommandCode;
use crate::config::PlayerConfig;
use crate::engine::{Engine, Shared, NO_CACHED_INDEX};
use crate::error::{PlayerError, Result};
use crate::status::{PlayerStatus, StatusWait};
use bridge_traits::decoder::StreamDecoder;
use bridge_traits::time::TickSource;
use bridge_traits::video::VideoHost;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Control-side handle to a running playback engine.
///
/// One `Player` owns one playback thread. Commands must come from a single
/// control thread at a time; the register is single-producer by contract.
pub struct Player {
    shared: Arc<Shared>,
    last_ack: Mutex<u64>,
    timeout: Duration,
    thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Spawn the playback thread and return its control handle.
    pub fn spawn(
        decoder: Box<dyn StreamDecoder>,
        host: Arc<dyn VideoHost>,
        ticks: Arc<dyn TickSource>,
        config: PlayerConfig,
    ) -> Result<Self> {
        config.validate().map_err(PlayerError::Config)?;

        let shared = Arc::new(Shared::new());
        let timeout = Duration::from_millis(config.command_timeout_ms);
        let engine = Engine::new(Arc::clone(&shared), decoder, host, ticks, config);

        let thread = thread::Builder::new()
            .name("playback-engine".into())
            .spawn(move || engine.run())?;

        info!("playback engine spawned");
        Ok(Self {
            shared,
            last_ack: Mutex::new(0),
            timeout,
            thread: Some(thread),
        })
    }

    // ========================================================================
    // Readable state
    // ========================================================================

    pub fn status(&self) -> PlayerStatus {
        self.shared.status.get()
    }

    /// The frame currently shown (or paused on).
    pub fn current_frame(&self) -> u32 {
        self.shared.current_frame.load(Ordering::Relaxed)
    }

    /// Frame rate of the open stream, in frames per kilosecond.
    pub fn frames_per_kilosecond(&self) -> u32 {
        self.shared.fpks.load(Ordering::Relaxed)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (
            self.shared.width.load(Ordering::Relaxed),
            self.shared.height.load(Ordering::Relaxed),
        )
    }

    /// Whether the open stream uses field framing (two entries per frame).
    pub fn uses_fields(&self) -> bool {
        self.shared.uses_fields.load(Ordering::Relaxed)
    }

    /// Index assigned by the most recent successful precache.
    pub fn last_cached_index(&self) -> Option<u32> {
        match self.shared.last_cached_index.load(Ordering::Relaxed) {
            NO_CACHED_INDEX => None,
            index => Some(index),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Request that a file-backed source be opened.
    ///
    /// Returns as soon as the command is acknowledged; the source is not
    /// usable until the status reaches Stopped.
    pub fn open(&self, file: impl AsRef<Path>) -> bool {
        let file = file.as_ref();
        if !file.is_file() {
            error!("cannot open {}: not a readable file", file.display());
            return false;
        }
        self.shared.channel.stage(|args| {
            args.file = file.to_path_buf();
            args.use_precached = false;
        });
        self.issue(CommandCode::Open)
    }

    /// Open a source and block until it is ready (or failed).
    pub fn open_and_block(&self, file: impl AsRef<Path>) -> bool {
        if !self.open(file) {
            return false;
        }
        loop {
            match self.wait_for_status(PlayerStatus::Stopped) {
                StatusWait::StillBusy => continue,
                StatusWait::Reached => return true,
                StatusWait::Failed => return false,
            }
        }
    }

    /// Open a previously precached source.
    ///
    /// `file` is still required: it keys the on-disk frame index cache.
    pub fn open_precached(&self, index: usize, file: impl AsRef<Path>) -> bool {
        self.shared.channel.stage(|args| {
            args.file = file.as_ref().to_path_buf();
            args.precache_index = index;
            args.use_precached = true;
        });
        self.issue(CommandCode::Open)
    }

    /// Load a file fully into engine memory for later `open_precached` use.
    pub fn precache(&self, file: impl AsRef<Path>) -> bool {
        self.shared.channel.stage(|args| {
            args.file = file.as_ref().to_path_buf();
        });
        self.issue(CommandCode::Precache)
    }

    /// Start playback against the given timer reference and wait for the
    /// engine to be playing.
    pub fn play(&self, timer_ref: u32) -> StatusWait {
        self.shared.channel.stage(|args| args.timer = timer_ref);
        if !self.issue(CommandCode::Play) {
            return StatusWait::Failed;
        }
        // playing can still fail, e.g. when the source just hit end of
        // stream
        self.wait_for_status(PlayerStatus::Playing)
    }

    /// Seek to `frame`, taking at least `min_delay_ms` of simulated seek
    /// latency. Completion is signalled by the Paused status.
    pub fn search(&self, frame: u16, min_delay_ms: u32) -> bool {
        self.shared.channel.stage(|args| {
            args.frame = frame;
            args.min_seek_ms = min_delay_ms;
        });
        self.issue(CommandCode::Search)
    }

    /// Seek and block until the engine settles on the target frame.
    pub fn search_and_block(&self, frame: u16, min_delay_ms: u32) -> StatusWait {
        if !self.search(frame, min_delay_ms) {
            return StatusWait::Failed;
        }
        self.wait_for_status(PlayerStatus::Paused)
    }

    /// Jump to `frame` without interrupting playback timing. Only valid
    /// while Playing.
    pub fn skip(&self, frame: u16) -> bool {
        if self.status() != PlayerStatus::Playing {
            warn!("skip requested while not playing");
            return false;
        }
        self.shared.channel.stage(|args| {
            args.frame = frame;
            // a skip must never inherit a search's artificial delay
            args.min_seek_ms = 0;
        });
        self.issue(CommandCode::Skip)
    }

    pub fn pause(&self) -> bool {
        self.issue(CommandCode::Pause)
    }

    /// Advance exactly one frame, ending paused.
    pub fn step_forward(&self) -> bool {
        self.issue(CommandCode::StepForward)
    }

    /// Reserved. The engine never implemented stop; this is a no-op that
    /// always fails.
    pub fn stop(&self) -> bool {
        false
    }

    /// Change playback speed: `skip_per_frame` extra frames advanced per
    /// shown frame (faster), `stall_per_frame` repeats per shown frame
    /// (slower). Only meaningful while Playing.
    pub fn speed_change(&self, skip_per_frame: u32, stall_per_frame: u32) -> bool {
        self.shared.channel.stage(|args| {
            args.skip_per_frame = skip_per_frame;
            args.stall_per_frame = stall_per_frame;
        });
        self.issue(CommandCode::SpeedChange)
    }

    /// Park the engine so engine-owned state can be inspected without it
    /// changing underneath. Unlock promptly: the engine does nothing at all
    /// while locked.
    pub fn lock(&self, timeout_ms: u32) -> bool {
        self.issue_with_timeout(CommandCode::Lock, Duration::from_millis(u64::from(timeout_ms)))
    }

    pub fn unlock(&self, timeout_ms: u32) -> bool {
        self.issue_with_timeout(
            CommandCode::Unlock,
            Duration::from_millis(u64::from(timeout_ms)),
        )
    }

    /// Quit the engine and join its thread. Also runs on drop.
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            if !self.issue(CommandCode::Quit) {
                warn!("engine did not acknowledge quit; joining anyway");
            }
            if thread.join().is_err() {
                error!("playback thread panicked");
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn issue(&self, code: CommandCode) -> bool {
        self.issue_with_timeout(code, self.timeout)
    }

    fn issue_with_timeout(&self, code: CommandCode, timeout: Duration) -> bool {
        let mut last_ack = self.last_ack.lock();
        if self.shared.channel.issue(code, &mut last_ack, timeout) {
            true
        } else {
            let e = PlayerError::ProtocolTimeout(timeout.as_millis() as u64);
            error!(command = ?code, "{}", e);
            false
        }
    }

    fn wait_for_status(&self, target: PlayerStatus) -> StatusWait {
        self.shared.status.wait_for(target, self.timeout)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}
