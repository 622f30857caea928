//! Shared helpers for the integration suites.

use bridge_traits::decoder::StreamDecoder;
use bridge_traits::video::VideoHost;
use core_playback::stream::PICTURE_START;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::{Duration, Instant};

/// Decoder that counts picture start codes in whatever it is fed. One
/// counted picture equals one presentable frame.
pub struct PictureCounter {
    window: u32,
}

impl PictureCounter {
    pub fn new() -> Self {
        Self { window: u32::MAX }
    }
}

impl StreamDecoder for PictureCounter {
    fn reset(&mut self) {
        self.window = u32::MAX;
    }

    fn feed(&mut self, data: &[u8]) -> usize {
        let mut frames = 0;
        for &byte in data {
            self.window = (self.window << 8) | u32::from(byte);
            if self.window == PICTURE_START {
                frames += 1;
            }
        }
        frames
    }
}

/// Host that tallies callback traffic.
#[derive(Default)]
pub struct CountingHost {
    pub presented: AtomicUsize,
    pub blanked: AtomicUsize,
    pub progress: Mutex<Vec<f64>>,
    pub dimensions: Mutex<Option<(u32, u32)>>,
}

impl CountingHost {
    pub fn presented(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }

    pub fn blanked(&self) -> usize {
        self.blanked.load(Ordering::SeqCst)
    }

    pub fn progress_reports(&self) -> Vec<f64> {
        self.progress.lock().unwrap().clone()
    }

    pub fn clear_progress(&self) {
        self.progress.lock().unwrap().clear();
    }
}

impl VideoHost for CountingHost {
    fn present_frame(&self) {
        self.presented.fetch_add(1, Ordering::SeqCst);
    }

    fn render_blank_frame(&self) {
        self.blanked.fetch_add(1, Ordering::SeqCst);
    }

    fn report_parse_progress(&self, fraction: f64) {
        self.progress.lock().unwrap().push(fraction);
    }

    fn report_dimensions(&self, width: u32, height: u32) {
        *self.dimensions.lock().unwrap() = Some((width, height));
    }
}

/// Synthetic elementary stream: 320x240 at rate code 5 (30 000 frames per
/// kilosecond), one group header in front of every keyframe.
pub fn stream_bytes(frames: usize, keyframe_every: usize) -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x01, 0xB3, 0x14, 0x00, 0xF0, 0x05];
    for f in 0..frames {
        if f % keyframe_every == 0 {
            data.extend([0x00, 0x00, 0x01, 0xB8, 0x00, 0x08, 0x00, 0x40]);
        }
        let coding = if f % keyframe_every == 0 { 1u8 } else { 2u8 };
        data.extend([0x00, 0x00, 0x01, 0x00, 0x00, coding << 3]);
        data.extend([0xAA; 10]);
    }
    data
}

/// Write a synthetic stream into a fresh temp directory.
pub fn write_stream(frames: usize, keyframe_every: usize) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("player-test-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("stream.m2v");
    fs::write(&path, stream_bytes(frames, keyframe_every)).unwrap();
    path
}

pub fn cleanup(media: &Path) {
    if let Some(dir) = media.parent() {
        let _ = fs::remove_dir_all(dir);
    }
}

/// Poll `predicate` with a real-time deadline; the engine runs against a
/// manual clock, so real time only bounds scheduler latency.
pub fn wait_until(predicate: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    predicate()
}

/// Wait for the engine to stop changing the frame counter.
pub fn settle(current_frame: impl Fn() -> u32) -> u32 {
    let mut last = current_frame();
    let mut stable = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
        let now = current_frame();
        if now == last {
            stable += 1;
            if stable >= 4 {
                break;
            }
        } else {
            stable = 0;
            last = now;
        }
    }
    last
}

static LOGGING: Once = Once::new();

/// Install the workspace logging stack once for the whole suite.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let config = core_runtime::logging::LoggingConfig::default()
            .with_format(core_runtime::logging::LogFormat::Compact)
            .with_filter("core_playback=warn");
        let _ = core_runtime::logging::init_logging(config);
    });
}
