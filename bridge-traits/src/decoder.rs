//! Stream decoder seam.
//!
//! The engine reads the raw stream and hands byte ranges to a decoder; the
//! decoder reports how many complete frames became presentable so the pacing
//! loop can time each one. Decoding correctness is entirely the decoder's
//! concern.

/// Consumes raw stream bytes and produces presentable frames.
///
/// Owned exclusively by the playback thread.
#[cfg_attr(test, mockall::automock)]
pub trait StreamDecoder: Send {
    /// Drop all decode state.
    ///
    /// Called before playback begins at a new position in the stream, so the
    /// decoder never carries reference state across a seek boundary.
    fn reset(&mut self);

    /// Consume a chunk of the raw stream.
    ///
    /// Returns the number of complete frames that became ready for
    /// presentation while consuming `data`. The engine paces exactly that
    /// many frames before feeding the next chunk.
    fn feed(&mut self, data: &[u8]) -> usize;
}

/// Decoder that discards everything it is fed.
#[derive(Debug, Default)]
pub struct NullDecoder;

impl StreamDecoder for NullDecoder {
    fn reset(&mut self) {}

    fn feed(&mut self, _data: &[u8]) -> usize {
        0
    }
}
