//! # Seek Resolution
//!
//! Converts a requested frame into a keyframe-aligned byte offset plus the
//! number of frames playback must decode and discard after the seek to land
//! on the exact frame that was asked for.

use crate::error::{PlayerError, Result};
use crate::index::FrameIndex;
use tracing::debug;

/// A resolved seek destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekTarget {
    /// Byte offset decoding starts from.
    pub byte_offset: u32,
    /// Frames to decode and discard after seeking before the requested
    /// frame is reached.
    pub soft_skip: u32,
}

// Landing too close behind a keyframe produces visible decode artifacts on
// some encodings; when both bounds hold, the walk backs up one keyframe
// further. The thresholds are empirical and must not be re-derived.
const MIN_KEYFRAMES_CROSSED: u32 = 2;
const MIN_SOFT_SKIP: u32 = 3;

/// Resolve `requested` against the index.
///
/// Field-framed content counts two entries per display frame, so the
/// requested frame number is doubled first. The walk moves backward over
/// pictures with no directly recorded offset, counting each one as a soft
/// skip, until it lands on a keyframe; the artifact guard above may then
/// push it one keyframe further back.
pub fn resolve(index: &FrameIndex, requested: u32) -> Result<SeekTarget> {
    let adjusted = if index.uses_fields() {
        requested << 1
    } else {
        requested
    };

    if adjusted >= index.frame_count() {
        return Err(PlayerError::OutOfBounds(requested));
    }

    let mut actual = adjusted;
    let mut position = index.offset(actual);
    let mut soft_skip = 0u32;
    let mut keyframes_crossed = 0u32;

    loop {
        while position.is_none() && actual > 0 {
            soft_skip += 1;
            actual -= 1;
            position = index.offset(actual);
        }
        keyframes_crossed += 1;

        if keyframes_crossed < MIN_KEYFRAMES_CROSSED && soft_skip < MIN_SOFT_SKIP && actual > 0 {
            position = None;
        } else {
            break;
        }
    }

    let target = SeekTarget {
        byte_offset: position.unwrap_or(0),
        soft_skip,
    };
    debug!(
        requested,
        adjusted,
        landed_on = actual,
        offset = target.byte_offset,
        soft_skip = target.soft_skip,
        "seek resolved"
    );
    Ok(target)
}
