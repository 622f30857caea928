//! # Engine Configuration
//!
//! Configuration for the playback engine: protocol timeouts, table
//! capacities, and scan/read chunk sizes.

use serde::{Deserialize, Serialize};

/// Playback engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// How long a control-side call waits for the engine to acknowledge a
    /// command or reach a requested status, in milliseconds.
    ///
    /// Default: 5000 ms.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Maximum number of frame entries held by the frame index.
    ///
    /// Part of the cache-file compatibility surface; streams with more
    /// pictures than this are truncated with a logged warning and frames
    /// past the cutoff are unreachable by seek.
    ///
    /// Default: 60 000.
    #[serde(default = "default_max_frame_entries")]
    pub max_frame_entries: usize,

    /// Bytes per chunk fed to the decoder by the render loop.
    ///
    /// Default: 256 KiB.
    #[serde(default = "default_render_chunk_bytes")]
    pub render_chunk_bytes: usize,

    /// Bytes per chunk scanned while building the frame index.
    ///
    /// Default: 200 000.
    #[serde(default = "default_parse_chunk_bytes")]
    pub parse_chunk_bytes: usize,

    /// Bytes per read while precaching a file into memory.
    ///
    /// Default: 1 MiB.
    #[serde(default = "default_precache_chunk_bytes")]
    pub precache_chunk_bytes: usize,

    /// Maximum number of precached files held at once.
    ///
    /// Exceeding this is an error, never an eviction.
    ///
    /// Default: 300.
    #[serde(default = "default_max_precache_entries")]
    pub max_precache_entries: usize,

    /// Probe window, in bytes, for caching the leading sequence header that
    /// is replayed into the decoder before every seek.
    ///
    /// Default: 200.
    #[serde(default = "default_header_probe_bytes")]
    pub header_probe_bytes: usize,

    /// Blank the overlay while a search is in flight.
    #[serde(default)]
    pub blank_during_searches: bool,

    /// Blank the overlay while an in-playback skip is in flight.
    #[serde(default)]
    pub blank_during_skips: bool,

    /// Idle-loop delay between blank renders, in milliseconds.
    ///
    /// Roughly one field interval; keeps the idle loop from spinning.
    ///
    /// Default: 16 ms.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            max_frame_entries: default_max_frame_entries(),
            render_chunk_bytes: default_render_chunk_bytes(),
            parse_chunk_bytes: default_parse_chunk_bytes(),
            precache_chunk_bytes: default_precache_chunk_bytes(),
            max_precache_entries: default_max_precache_entries(),
            header_probe_bytes: default_header_probe_bytes(),
            blank_during_searches: false,
            blank_during_skips: false,
            idle_delay_ms: default_idle_delay_ms(),
        }
    }
}

impl PlayerConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.command_timeout_ms == 0 {
            return Err("command timeout must be greater than 0 ms".to_string());
        }

        if self.max_frame_entries == 0 {
            return Err("frame index capacity must be greater than 0".to_string());
        }

        if self.render_chunk_bytes == 0
            || self.parse_chunk_bytes == 0
            || self.precache_chunk_bytes == 0
        {
            return Err("chunk sizes must be greater than 0 bytes".to_string());
        }

        if self.max_precache_entries == 0 {
            return Err("precache capacity must be greater than 0".to_string());
        }

        // The stream probe alone needs 8 bytes.
        if self.header_probe_bytes < 8 {
            return Err("header probe window must be at least 8 bytes".to_string());
        }

        Ok(())
    }
}

fn default_command_timeout_ms() -> u64 {
    5000
}

fn default_max_frame_entries() -> usize {
    60_000
}

fn default_render_chunk_bytes() -> usize {
    262_144
}

fn default_parse_chunk_bytes() -> usize {
    200_000
}

fn default_precache_chunk_bytes() -> usize {
    1_048_576
}

fn default_max_precache_entries() -> usize {
    300
}

fn default_header_probe_bytes() -> usize {
    200
}

fn default_idle_delay_ms() -> u32 {
    16
}
