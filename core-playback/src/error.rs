//! # Playback Error Types
//!
//! Error types for the playback engine. Most of these park the engine in the
//! terminal `Error` status for the current source; a caller observing that
//! status must open a new source (or quit) to recover.

use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlayerError {
    /// A command was published but the engine did not acknowledge it in time.
    ///
    /// Fatal to the issuing call only: the command register is not rolled
    /// back, so the command may still execute later.
    #[error("engine did not acknowledge command within {0} ms")]
    ProtocolTimeout(u64),

    /// The media source could not be opened.
    #[error("failed to open media source: {0}")]
    SourceOpen(String),

    /// The stream does not begin with the expected sequence header.
    #[error("expected stream header not found (is the stream demultiplexed?)")]
    FormatMismatch,

    /// Building the frame index failed; any partial cache file is deleted.
    #[error("frame index build failed: {0}")]
    IndexBuild(String),

    /// The requested frame lies beyond the known frame count.
    #[error("frame {0} is out of bounds")]
    OutOfBounds(u32),

    /// The precache table is full or the buffer could not be allocated.
    #[error("precache capacity exceeded")]
    CapacityExceeded,

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlayerError>;
