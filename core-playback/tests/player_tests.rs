//! End-to-end engine tests: a real playback thread driven over the command
//! register, paced against a manually advanced clock.

mod common;

use common::{
    cleanup, init_test_logging, settle, stream_bytes, wait_until, write_stream, CountingHost,
    PictureCounter,
};
use bridge_traits::time::{ManualTicks, TickSource};
use core_playback::{Player, PlayerConfig, PlayerStatus, StatusWait};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

/// One frame period at 30 000 frames per kilosecond, rounded up so each
/// advance crosses exactly one pacing threshold.
const FRAME_MS: u32 = 34;

fn spawn_player(config: PlayerConfig) -> (Player, Arc<CountingHost>, Arc<ManualTicks>) {
    init_test_logging();
    let host = Arc::new(CountingHost::default());
    let ticks = Arc::new(ManualTicks::new());
    let player = Player::spawn(
        Box::new(PictureCounter::new()),
        Arc::clone(&host) as Arc<dyn bridge_traits::video::VideoHost>,
        Arc::clone(&ticks) as Arc<dyn TickSource>,
        config,
    )
    .expect("engine spawn");
    (player, host, ticks)
}

/// Small render chunks keep the render loop genuinely chunked even for the
/// tiny synthetic streams these tests play.
fn test_config() -> PlayerConfig {
    PlayerConfig {
        render_chunk_bytes: 256,
        ..Default::default()
    }
}

fn default_player() -> (Player, Arc<CountingHost>, Arc<ManualTicks>) {
    spawn_player(test_config())
}

#[test]
fn open_reports_stream_info_and_reuses_the_index() {
    let media = write_stream(100, 10);
    let (player, host, _ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert_eq!(player.status(), PlayerStatus::Stopped);
    assert_eq!(player.dimensions(), (320, 240));
    assert_eq!(player.frames_per_kilosecond(), 30_000);
    assert!(!player.uses_fields());
    assert_eq!(*host.dimensions.lock().unwrap(), Some((320, 240)));

    // first open builds the index: the progress contract must hold
    let reports = host.progress_reports();
    assert_eq!(reports.first(), Some(&-1.0));
    assert_eq!(reports.last(), Some(&1.0));

    // second open of the same source reuses the cache with no rescan
    host.clear_progress();
    assert!(player.open_and_block(&media));
    assert!(
        host.progress_reports().is_empty(),
        "a valid cache reload must not rescan the stream"
    );

    cleanup(&media);
}

#[test]
fn open_rejects_a_stream_without_the_expected_header() {
    let dir = std::env::temp_dir().join(format!("player-test-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    let bad = dir.join("noise.m2v");
    fs::write(&bad, [0x42u8; 64]).unwrap();

    let (player, _host, _ticks) = default_player();
    assert!(!player.open_and_block(&bad));
    assert_eq!(player.status(), PlayerStatus::Error);

    // Error is terminal for the source, not the engine: a good open recovers
    let good = dir.join("stream.m2v");
    fs::write(&good, stream_bytes(20, 10)).unwrap();
    assert!(player.open_and_block(&good));
    assert_eq!(player.status(), PlayerStatus::Stopped);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn open_of_a_missing_file_fails_on_the_control_side() {
    let (player, _host, _ticks) = default_player();
    assert!(!player.open("/does/not/exist.m2v"));
    assert_eq!(player.status(), PlayerStatus::Stopped);
}

#[test]
fn search_lands_paused_on_the_exact_frame() {
    let media = write_stream(100, 10);
    let (player, host, _ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert_eq!(player.search_and_block(55, 0), StatusWait::Reached);
    assert_eq!(player.status(), PlayerStatus::Paused);
    assert_eq!(player.current_frame(), 55);
    assert!(host.presented() >= 1, "the still frame must have rendered");

    // searching again from paused re-resolves cleanly
    assert_eq!(player.search_and_block(23, 0), StatusWait::Reached);
    assert_eq!(player.current_frame(), 23);

    cleanup(&media);
}

#[test]
fn search_beyond_the_frame_count_is_an_error() {
    let media = write_stream(100, 10);
    let (player, _host, _ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert_eq!(player.search_and_block(150, 0), StatusWait::Failed);
    assert_eq!(player.status(), PlayerStatus::Error);

    cleanup(&media);
}

#[test]
fn simulated_seek_latency_applies_exactly_once() {
    let media = write_stream(100, 10);
    let (player, _host, ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert!(player.search(55, 500));

    // the still frame may not render until the artificial delay elapses
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(player.status(), PlayerStatus::Busy);

    ticks.advance(600);
    assert!(wait_until(
        || player.status() == PlayerStatus::Paused,
        Duration::from_secs(5)
    ));
    assert_eq!(player.current_frame(), 55);

    cleanup(&media);
}

#[test]
fn playback_advances_one_frame_per_period() {
    let media = write_stream(100, 10);
    let (player, host, ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert_eq!(player.play(ticks.ticks()), StatusWait::Reached);
    assert_eq!(player.status(), PlayerStatus::Playing);

    let presented_before = host.presented();
    for _ in 0..5 {
        ticks.advance(FRAME_MS);
        settle(|| player.current_frame());
    }

    assert_eq!(player.current_frame(), 5);
    assert_eq!(host.presented() - presented_before, 5);
    assert_eq!(player.status(), PlayerStatus::Playing);

    cleanup(&media);
}

#[test]
fn end_of_stream_rewinds_and_stops_without_error() {
    let media = write_stream(100, 10);
    let (player, _host, ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert_eq!(player.play(ticks.ticks()), StatusWait::Reached);

    // run the clock far past the stream's duration; the engine drops frames
    // to catch up and runs off the end
    ticks.advance(10_000);
    assert!(wait_until(
        || player.status() == PlayerStatus::Stopped,
        Duration::from_secs(5)
    ));
    assert_eq!(player.current_frame(), 0);

    cleanup(&media);
}

#[test]
fn speed_change_advances_two_frames_per_shown_frame() {
    let media = write_stream(100, 10);
    let (player, host, ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert_eq!(player.search_and_block(20, 0), StatusWait::Reached);
    assert_eq!(player.play(ticks.ticks()), StatusWait::Reached);

    assert!(player.speed_change(1, 0));

    let frames_before = settle(|| player.current_frame());
    let presented_before = host.presented();
    for _ in 0..10 {
        ticks.advance(FRAME_MS);
        settle(|| player.current_frame());
    }
    let frame_delta = player.current_frame() - frames_before;
    let presented_delta = host.presented() - presented_before;

    // one skipped frame rides along with every shown frame
    assert_eq!(frame_delta, 2 * presented_delta as u32);
    assert!(frame_delta >= 16, "ten periods must advance ~20 frames");
    assert_eq!(player.status(), PlayerStatus::Playing);

    cleanup(&media);
}

#[test]
fn skip_jumps_forward_without_resetting_timing() {
    let media = write_stream(100, 10);
    let (player, _host, ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert_eq!(player.search_and_block(20, 0), StatusWait::Reached);

    // skip is only valid while playing
    assert!(!player.skip(57));

    assert_eq!(player.play(ticks.ticks()), StatusWait::Reached);
    for _ in 0..3 {
        ticks.advance(FRAME_MS);
        settle(|| player.current_frame());
    }

    assert!(player.skip(57));
    ticks.advance(FRAME_MS);
    assert!(wait_until(
        || player.current_frame() == 57,
        Duration::from_secs(5)
    ));
    assert_eq!(player.status(), PlayerStatus::Playing);

    cleanup(&media);
}

#[test]
fn pause_while_paused_acks_without_a_state_change() {
    let media = write_stream(100, 10);
    let (player, _host, _ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert_eq!(player.search_and_block(30, 0), StatusWait::Reached);
    assert_eq!(player.status(), PlayerStatus::Paused);

    // redundant pause: still acknowledged, nothing changes
    assert!(player.pause());
    assert_eq!(player.status(), PlayerStatus::Paused);
    assert_eq!(player.current_frame(), 30);

    cleanup(&media);
}

#[test]
fn pause_while_playing_settles_into_paused() {
    let media = write_stream(100, 10);
    let (player, _host, ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert_eq!(player.play(ticks.ticks()), StatusWait::Reached);
    ticks.advance(FRAME_MS);
    settle(|| player.current_frame());

    assert!(player.pause());
    // the paused handler runs on the next pacing iteration
    ticks.advance(FRAME_MS);
    assert!(wait_until(
        || player.status() == PlayerStatus::Paused,
        Duration::from_secs(5)
    ));

    // step forward keeps the engine paused
    assert!(player.step_forward());
    ticks.advance(FRAME_MS);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(player.status(), PlayerStatus::Paused);

    cleanup(&media);
}

#[test]
fn pause_while_idle_is_an_error() {
    let media = write_stream(20, 10);
    let (player, _host, _ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert!(player.pause());
    assert!(wait_until(
        || player.status() == PlayerStatus::Error,
        Duration::from_secs(5)
    ));

    // recoverable by opening again
    assert!(player.open_and_block(&media));
    assert_eq!(player.status(), PlayerStatus::Stopped);

    cleanup(&media);
}

#[test]
fn precache_registers_and_plays_from_memory() {
    let media = write_stream(100, 10);
    let (player, _host, _ticks) = default_player();

    assert!(player.precache(&media));
    assert!(wait_until(
        || player.status() == PlayerStatus::Stopped,
        Duration::from_secs(5)
    ));
    assert_eq!(player.last_cached_index(), Some(0));

    assert!(player.precache(&media));
    assert!(wait_until(
        || player.last_cached_index() == Some(1),
        Duration::from_secs(5)
    ));

    // the file itself is no longer needed for reading, only for naming the
    // index cache
    fs::remove_file(&media).unwrap();

    assert!(player.open_precached(1, &media));
    assert!(wait_until(
        || player.status() == PlayerStatus::Stopped,
        Duration::from_secs(5)
    ));
    assert_eq!(player.dimensions(), (320, 240));

    assert_eq!(player.search_and_block(15, 0), StatusWait::Reached);
    assert_eq!(player.current_frame(), 15);

    cleanup(&media);
}

#[test]
fn precache_capacity_overflow_is_an_error_not_an_eviction() {
    let media = write_stream(20, 10);
    let config = PlayerConfig {
        max_precache_entries: 1,
        ..test_config()
    };
    let (player, _host, _ticks) = spawn_player(config);

    assert!(player.precache(&media));
    assert!(wait_until(
        || player.status() == PlayerStatus::Stopped,
        Duration::from_secs(5)
    ));
    assert_eq!(player.last_cached_index(), Some(0));

    assert!(player.precache(&media));
    assert!(wait_until(
        || player.status() == PlayerStatus::Error,
        Duration::from_secs(5)
    ));

    // the first entry survived
    assert!(player.open_precached(0, &media));
    assert!(wait_until(
        || player.status() == PlayerStatus::Stopped,
        Duration::from_secs(5)
    ));

    cleanup(&media);
}

#[test]
fn lock_parks_the_engine_until_unlock() {
    let media = write_stream(20, 10);
    let (player, host, _ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert!(player.lock(1000));

    // while locked the engine does nothing, not even idle blanking
    let blanked = host.blanked();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(host.blanked(), blanked);
    assert_eq!(player.status(), PlayerStatus::Stopped);

    assert!(player.unlock(1000));
    assert!(wait_until(
        || host.blanked() > blanked,
        Duration::from_secs(5)
    ));

    cleanup(&media);
}

#[test]
fn stop_remains_a_reserved_noop() {
    let media = write_stream(20, 10);
    let (player, _host, _ticks) = default_player();

    assert!(player.open_and_block(&media));
    assert!(!player.stop());
    assert_eq!(player.status(), PlayerStatus::Stopped);

    cleanup(&media);
}

#[test]
fn shutdown_joins_the_engine_thread() {
    let media = write_stream(20, 10);
    let (mut player, _host, _ticks) = default_player();

    assert!(player.open_and_block(&media));
    player.shutdown();

    // terminal after quit; drop will not double-join
    assert_eq!(player.status(), PlayerStatus::Error);

    cleanup(&media);
}
