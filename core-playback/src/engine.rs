//! # Playback Engine Thread
//!
//! The dedicated playback thread: an idle loop that dispatches commands from
//! the register, command handlers for open/precache/play/search/skip, the
//! render loop that feeds the decoder, and the frame pacing logic that keeps
//! displayed frames in lockstep with the millisecond timer.
//!
//! All pacing arithmetic is integer-only. Elapsed time is compared in
//! wrapping u32 milliseconds; the expected-time product uses a 64-bit
//! intermediate because `frames_shown * 1_000_000` overflows 32 bits a
//! couple of minutes into playback.

use crate::command::{CommandArgs, CommandChannel, CommandCode};
use crate::config::PlayerConfig;
use crate::error::{PlayerError, Result};
use crate::index::{self, FrameIndex};
use crate::io::MediaIo;
use crate::seek;
use crate::status::{PlayerStatus, StatusCell};
use crate::stream;
use bridge_traits::decoder::StreamDecoder;
use bridge_traits::time::TickSource;
use bridge_traits::video::VideoHost;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Extra frame periods the currently shown frame is held for when playback
/// starts; hardware players keep the still up for one more frame before
/// moving on.
const PLAY_FRAME_STALL: u32 = 1;

/// Pending-skip sentinel: frame 0 can never be a skip target.
const NO_PENDING_SKIP: u32 = 0;

/// Sentinel for "nothing precached yet".
pub(crate) const NO_CACHED_INDEX: u32 = u32::MAX;

/// Engine-owned state the control thread reads.
///
/// Every field here has exactly one writer (the playback thread) except the
/// command register, which the control thread writes and the playback
/// thread reads.
pub(crate) struct Shared {
    pub channel: CommandChannel,
    pub status: StatusCell,
    pub current_frame: AtomicU32,
    pub fpks: AtomicU32,
    pub width: AtomicU32,
    pub height: AtomicU32,
    pub uses_fields: AtomicBool,
    pub last_cached_index: AtomicU32,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            channel: CommandChannel::new(),
            status: StatusCell::new(PlayerStatus::Stopped),
            current_frame: AtomicU32::new(0),
            fpks: AtomicU32::new(0),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            uses_fields: AtomicBool::new(false),
            last_cached_index: AtomicU32::new(NO_CACHED_INDEX),
        }
    }
}

/// Pacing state owned exclusively by the playback thread; reset on every
/// play and search transition.
#[derive(Default)]
struct PaceState {
    paused: bool,
    step_forward: bool,
    /// Drain mode: discard every frame until the render loop can hand
    /// control back to the idle loop.
    skip_all: bool,
    /// Frames still to discard before the next shown frame (soft skip after
    /// a seek, or multi-speed skipping).
    frames_to_skip: u32,
    /// Of those, how many advance the frame counter (multi-speed only).
    frames_to_skip_with_inc: u32,
    /// Timer reference the frame count is measured against.
    epoch_ms: u32,
    /// One-shot extra delay consumed by the next pacing decision
    /// (simulated seek latency).
    extra_delay_ms: u32,
    /// Frames shown since the epoch.
    frames_shown: u32,
    /// Skip destination adopted when its frame actually renders.
    pending_skip_frame: u32,
    skip_per_frame: u32,
    stall_per_frame: u32,
}

pub(crate) struct Engine {
    shared: Arc<Shared>,
    io: MediaIo,
    index: FrameIndex,
    decoder: Box<dyn StreamDecoder>,
    host: Arc<dyn VideoHost>,
    ticks: Arc<dyn TickSource>,
    config: PlayerConfig,
    pace: PaceState,
    /// Slot byte of the last acknowledged command.
    last_observed: u8,
    /// Leading stream bytes up to the first group start code, replayed into
    /// the decoder before every seek.
    header_cache: Vec<u8>,
    fpks: u32,
    /// Pacing window: two field intervals in milliseconds.
    window_ms: u32,
}

impl Engine {
    pub fn new(
        shared: Arc<Shared>,
        decoder: Box<dyn StreamDecoder>,
        host: Arc<dyn VideoHost>,
        ticks: Arc<dyn TickSource>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            shared,
            io: MediaIo::new(config.max_precache_entries),
            index: FrameIndex::empty(),
            decoder,
            host,
            ticks,
            config,
            pace: PaceState::default(),
            last_observed: 0,
            header_cache: Vec::new(),
            fpks: 1000,
            window_ms: 2000,
        }
    }

    /// The playback thread's main loop. Returns only on Quit.
    pub fn run(mut self) {
        info!("playback thread started");
        let mut done = false;

        while !done {
            // drain every pending command before sleeping, so skips are
            // never delayed by the idle wait
            while let Some(code) = self.shared.channel.peek(self.last_observed) {
                match code {
                    CommandCode::Quit => {
                        self.handle_quit();
                        done = true;
                    }
                    CommandCode::Open => self.handle_open(),
                    CommandCode::Precache => self.handle_precache(),
                    CommandCode::Play => self.handle_play(),
                    CommandCode::Search => self.handle_search(false),
                    CommandCode::Skip => self.handle_search(true),
                    CommandCode::Pause | CommandCode::Stop => {
                        // nothing is rendering, so there is nothing to pause
                        warn!(command = ?code, "command is invalid while idle");
                        self.shared.status.set(PlayerStatus::Error);
                        self.acknowledge();
                    }
                    CommandCode::Lock => self.lock_handler(),
                    other => {
                        warn!(command = ?other, "idle loop ignoring command");
                        self.acknowledge();
                    }
                }
                if done {
                    break;
                }
            }
            if done {
                break;
            }

            // keep the overlay alive even with no video playing
            self.host.render_blank_frame();
            self.ticks.sleep_ms(self.config.idle_delay_ms);
        }

        info!("playback thread terminated");
    }

    fn acknowledge(&mut self) {
        self.shared.channel.acknowledge(&mut self.last_observed);
    }

    fn handle_quit(&mut self) {
        self.io.close();
        self.shared.status.set(PlayerStatus::Error);
        self.io.clear_precache();
        self.acknowledge();
    }

    // ========================================================================
    // Open / precache
    // ========================================================================

    fn handle_open(&mut self) {
        let args = self.shared.channel.args();

        // Busy must be published before the ack, or a blocking open on the
        // control side could read a stale Error status and give up.
        self.shared.status.set(PlayerStatus::Busy);
        self.acknowledge();

        self.decoder.reset();

        if self.io.is_open() {
            self.io.close();
            // the overlay is double buffered; blank both buffers to avoid a
            // flicker of the previous stream
            self.host.render_blank_frame();
            self.host.render_blank_frame();
        }

        match self.open_source(&args) {
            Ok(()) => {
                info!(
                    source = %args.file.display(),
                    precached = args.use_precached,
                    frames = self.index.frame_count(),
                    fpks = self.fpks,
                    "source opened"
                );
                self.shared.status.set(PlayerStatus::Stopped);
            }
            Err(e) => {
                error!("open failed: {}", e);
                self.io.close();
                self.shared.status.set(PlayerStatus::Error);
            }
        }
    }

    fn open_source(&mut self, args: &CommandArgs) -> Result<()> {
        if args.use_precached {
            self.io.open_precached(args.precache_index)?;
        } else {
            self.io.open(&args.file)?;
        }

        // the first 8 bytes reveal everything the pacing loop needs
        let mut probe = [0u8; 8];
        if self.io.read(&mut probe)? < probe.len() {
            return Err(PlayerError::FormatMismatch);
        }
        let info = stream::probe_header(&probe)?;
        self.fpks = info.fpks;
        self.window_ms = 2_000_000 / info.fpks;
        self.shared.fpks.store(info.fpks, Ordering::Relaxed);
        self.shared.width.store(info.width, Ordering::Relaxed);
        self.shared.height.store(info.height, Ordering::Relaxed);

        self.io.seek(0)?;
        let index = index::load_or_build(&mut self.io, &args.file, &self.config, &mut |f| {
            self.host.report_parse_progress(f)
        })?;
        self.shared
            .uses_fields
            .store(index.uses_fields(), Ordering::Relaxed);
        self.index = index;

        // the overlay can only be sized once the offsets are in, since
        // parsing may have drawn progress to the screen
        self.host.report_dimensions(info.width, info.height);

        self.cache_sequence_header()?;
        self.io.seek(0)?;
        Ok(())
    }

    /// Cache the stream's leading bytes up to the first group start code so
    /// seeks can replay them instead of rewinding the source.
    fn cache_sequence_header(&mut self) -> Result<()> {
        self.io.seek(0)?;
        let mut buf = vec![0u8; self.config.header_probe_bytes];
        let got = self.io.read(&mut buf)?;
        buf.truncate(got);

        let mut value = 0u32;
        for (i, byte) in buf.iter().enumerate() {
            value = (value << 8) | u32::from(*byte);
            if value == stream::GROUP_START {
                // back off the four code bytes themselves
                self.header_cache = buf[..i + 1 - 4].to_vec();
                return Ok(());
            }
        }

        warn!(
            "no group start code within the first {} bytes; seeks will replay nothing",
            buf.len()
        );
        self.header_cache.clear();
        Ok(())
    }

    fn handle_precache(&mut self) {
        let args = self.shared.channel.args();

        self.shared.status.set(PlayerStatus::Busy);
        self.acknowledge();

        let result = self.io.precache(
            &args.file,
            self.config.precache_chunk_bytes,
            &mut |f| self.host.report_parse_progress(f),
        );
        match result {
            Ok(idx) => {
                info!(index = idx, source = %args.file.display(), "precache complete");
                self.shared
                    .last_cached_index
                    .store(idx as u32, Ordering::Relaxed);
                self.shared.status.set(PlayerStatus::Stopped);
            }
            Err(e) => {
                error!("precache failed: {}", e);
                self.shared.status.set(PlayerStatus::Error);
            }
        }
    }

    // ========================================================================
    // Play / search / skip
    // ========================================================================

    fn handle_play(&mut self) {
        self.respond_play();
        self.render();
    }

    fn respond_play(&mut self) {
        let args = self.shared.channel.args();
        self.pace.epoch_ms = args.timer;
        // show the current still one more frame before advancing
        self.pace.frames_shown = PLAY_FRAME_STALL;
        self.shared.status.set(PlayerStatus::Playing);
        self.acknowledge();
        self.pace.paused = false;
        self.pace.frames_to_skip = 0;
        self.pace.frames_to_skip_with_inc = 0;
    }

    /// Search (`skip == false`) pauses on the target frame with a fresh
    /// timing epoch; skip (`skip == true`) jumps mid-playback without
    /// touching the timer, leaving the destination pending until rendered.
    fn handle_search(&mut self, skip: bool) {
        let args = self.shared.channel.args();

        if !skip {
            self.shared.status.set(PlayerStatus::Busy);
        } else {
            // Re-derive the shown-frame count from the wall clock before
            // acking: on a lagging system the counter can fall behind, and
            // the timer only holds still relative to our epoch until the
            // command is acknowledged.
            let elapsed = u64::from(self.ticks.ticks().wrapping_sub(self.pace.epoch_ms));
            self.pace.frames_shown =
                ((elapsed * u64::from(self.fpks)) / 1_000_000) as u32 + PLAY_FRAME_STALL;
        }
        self.acknowledge();

        self.decoder.reset();
        if !self.header_cache.is_empty() {
            // decoders need the sequence header before entering mid-stream
            self.decoder.feed(&self.header_cache);
        }

        if !skip {
            self.pace.paused = true;
            self.pace.frames_shown = 0;
            self.pace.extra_delay_ms = args.min_seek_ms;
            if self.config.blank_during_searches {
                self.host.render_blank_frame();
            }
        } else {
            self.pace.paused = false;
            if self.config.blank_during_skips {
                self.host.render_blank_frame();
            }
        }

        match seek::resolve(&self.index, u32::from(args.frame)) {
            Ok(target) => {
                self.pace.frames_to_skip = target.soft_skip;
                self.pace.frames_to_skip_with_inc = 0;

                if let Err(e) = self.io.seek(target.byte_offset) {
                    error!("seek to byte {} failed: {}", target.byte_offset, e);
                    self.shared.status.set(PlayerStatus::Error);
                    return;
                }

                if !skip {
                    // paused playback will not advance the counter, so the
                    // frame number can change right now
                    self.shared
                        .current_frame
                        .store(u32::from(args.frame), Ordering::Relaxed);
                    self.pace.pending_skip_frame = NO_PENDING_SKIP;
                } else {
                    // consistent with hardware behavior, the frame number
                    // holds until the destination actually renders
                    self.pace.pending_skip_frame = u32::from(args.frame);
                }

                self.render();
            }
            Err(e) => {
                error!("search failed: {}", e);
                self.shared.status.set(PlayerStatus::Error);
            }
        }
    }

    // ========================================================================
    // Render loop
    // ========================================================================

    /// Read the stream and pace frames until end of stream or a disruptive
    /// command. Handles both moving video and the still frame a search
    /// settles on.
    fn render(&mut self) {
        self.pace.skip_all = false;

        if !self.io.is_open() {
            error!("render requested but no source is open");
            self.shared.status.set(PlayerStatus::Error);
            return;
        }

        let mut buf = vec![0u8; self.config.render_chunk_bytes];
        let mut finished = false;

        while !finished {
            let got = match self.io.read(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    error!("stream read failed during render: {}", e);
                    self.shared.status.set(PlayerStatus::Error);
                    return;
                }
            };

            let frames = self.decoder.feed(&buf[..got]);
            for _ in 0..frames {
                self.pace_frame();
            }

            if got < buf.len() {
                // end of stream: a single rewind, never a loop
                self.shared.status.set(PlayerStatus::Stopped);
                finished = true;
                self.decoder.reset();
                if let Err(e) = self.io.seek(0) {
                    error!("rewind after end of stream failed: {}", e);
                }
                self.shared.current_frame.store(0, Ordering::Relaxed);
            }

            if let Some(code) = self.shared.channel.peek(self.last_observed) {
                match code {
                    CommandCode::Quit
                    | CommandCode::Open
                    | CommandCode::Search
                    | CommandCode::Stop => {
                        self.shared.status.set(PlayerStatus::Busy);
                        finished = true;
                    }
                    CommandCode::Skip => {
                        // skips are supposed to be instant; leave the
                        // playing status alone
                        finished = true;
                    }
                    _ => {}
                }
            }
        }
    }

    /// Pace one decoded frame: show it on time, stall, drop it to catch up,
    /// or discard it as a skip. Loops in place while paused or stalling.
    fn pace_frame(&mut self) {
        let mut stall_frames = 0u32;

        if self.pace.frames_to_skip == 0 && !self.pace.skip_all {
            loop {
                // set when a disruptive command arrives mid-wait: the frame
                // is withheld and all bookkeeping for it is skipped
                let mut withheld = false;

                let expected_ms = (i64::from(self.pace.frames_shown) * 1_000_000)
                    / i64::from(self.fpks)
                    + i64::from(self.pace.extra_delay_ms);
                let actual_ms =
                    i64::from(self.ticks.ticks().wrapping_sub(self.pace.epoch_ms) as i32);

                // the extra delay models seek latency and must only ever be
                // charged once
                self.pace.extra_delay_ms = 0;

                if actual_ms < expected_ms + i64::from(self.window_ms) {
                    // ahead of schedule: hold the frame until its time
                    // arrives, watching for commands the whole while
                    while (i64::from(
                        self.ticks.ticks().wrapping_sub(self.pace.epoch_ms) as i32
                    )) < expected_ms
                        && !withheld
                    {
                        // sleep before polling so a command that lands here
                        // is seen without waiting out the frame
                        self.ticks.sleep_ms(1);
                        if let Some(code) = self.shared.channel.peek(self.last_observed) {
                            match code {
                                CommandCode::Pause | CommandCode::StepForward => {
                                    self.respond_pause_or_step(code)
                                }
                                CommandCode::SpeedChange => self.respond_speedchange(),
                                CommandCode::None => {}
                                _ => withheld = true,
                            }
                        }
                    }
                    if !withheld {
                        self.host.present_frame();
                    }
                }
                // else: behind schedule, the draw is dropped to catch up

                if !withheld {
                    // shown or dropped, the count must reflect it; this has
                    // to precede the handlers since pausing rewrites it
                    self.pace.frames_shown += 1;
                }

                if self.pace.paused {
                    self.paused_handler();
                } else {
                    self.play_handler();

                    // only advance if the handler did not just pause us
                    if !self.pace.paused {
                        if stall_frames == 0 {
                            if self.pace.pending_skip_frame == NO_PENDING_SKIP {
                                if !withheld {
                                    self.shared.current_frame.fetch_add(1, Ordering::Relaxed);

                                    if self.pace.stall_per_frame > 0 {
                                        stall_frames = self.pace.stall_per_frame;
                                    }
                                    if self.pace.skip_per_frame > 0 {
                                        self.pace.frames_to_skip = self.pace.skip_per_frame;
                                        self.pace.frames_to_skip_with_inc =
                                            self.pace.skip_per_frame;
                                    }
                                }
                            } else {
                                // the skip destination has now rendered
                                self.shared
                                    .current_frame
                                    .store(self.pace.pending_skip_frame, Ordering::Relaxed);
                                self.pace.pending_skip_frame = NO_PENDING_SKIP;
                            }
                        } else {
                            stall_frames -= 1;
                        }
                    }
                }

                // keep looping while paused or stalling so the still frame
                // keeps getting redrawn
                let keep_looping = (self.pace.paused || stall_frames > 0)
                    && !self.pace.skip_all
                    && !self.pace.step_forward;
                if !keep_looping {
                    break;
                }
            }

            // the single-frame advance has happened by now
            self.pace.step_forward = false;
        } else if self.pace.frames_to_skip > 0 {
            self.pace.frames_to_skip -= 1;
            if self.pace.frames_to_skip_with_inc > 0 {
                self.pace.frames_to_skip_with_inc -= 1;
                self.shared.current_frame.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // ========================================================================
    // In-loop command handlers
    // ========================================================================

    /// Runs once per pacing iteration while paused.
    fn paused_handler(&mut self) {
        if self.shared.status.get() != PlayerStatus::Paused {
            self.shared.status.set(PlayerStatus::Paused);
            // the still frame just rendered; refresh the epoch so playback
            // does not try to catch up when it resumes
            self.pace.epoch_ms = self.ticks.ticks();
            self.pace.frames_shown = 1;
        }

        if let Some(code) = self.shared.channel.peek(self.last_observed) {
            match code {
                CommandCode::Play => self.respond_play(),
                CommandCode::Stop
                | CommandCode::Quit
                | CommandCode::Open
                | CommandCode::Search => {
                    // drain buffered frames and let the idle loop handle it
                    self.pace.skip_all = true;
                }
                CommandCode::StepForward => {
                    // paused before, paused after; no status change
                    self.acknowledge();
                    self.pace.step_forward = true;
                }
                CommandCode::Lock => self.lock_handler(),
                other => {
                    // redundant or invalid here (e.g. pause while paused):
                    // acknowledged without a state change
                    warn!(command = ?other, "pause handler ignoring command");
                    self.acknowledge();
                }
            }
        }
    }

    /// Runs once per pacing iteration while playing.
    fn play_handler(&mut self) {
        if let Some(code) = self.shared.channel.peek(self.last_observed) {
            match code {
                CommandCode::None => {}
                CommandCode::Pause | CommandCode::StepForward => self.respond_pause_or_step(code),
                CommandCode::SpeedChange => self.respond_speedchange(),
                CommandCode::Stop
                | CommandCode::Quit
                | CommandCode::Open
                | CommandCode::Search
                | CommandCode::Skip => {
                    self.pace.skip_all = true;
                }
                CommandCode::Lock => self.lock_handler(),
                other => {
                    self.acknowledge();
                    warn!(command = ?other, "play handler ignoring command");
                }
            }
        }
    }

    fn respond_pause_or_step(&mut self, code: CommandCode) {
        if code == CommandCode::StepForward {
            self.pace.step_forward = true;
        }
        // the status flips only when the paused handler next runs
        self.acknowledge();
        self.pace.paused = true;
    }

    fn respond_speedchange(&mut self) {
        let args = self.shared.channel.args();
        self.pace.skip_per_frame = args.skip_per_frame;
        self.pace.stall_per_frame = args.stall_per_frame;
        debug!(
            skip_per_frame = args.skip_per_frame,
            stall_per_frame = args.stall_per_frame,
            "speed changed"
        );
        self.acknowledge();
    }

    /// Cooperative critical section: after the Lock ack, the engine does no
    /// work at all until the control thread unlocks it.
    fn lock_handler(&mut self) {
        self.acknowledge();
        loop {
            self.ticks.sleep_ms(1);
            if let Some(code) = self.shared.channel.peek(self.last_observed) {
                match code {
                    CommandCode::Unlock => {
                        self.acknowledge();
                        return;
                    }
                    other => {
                        warn!(command = ?other, "lock handler received a command that is not unlock");
                    }
                }
            }
        }
    }
}
