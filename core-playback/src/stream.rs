//! # Stream Probing & Scanning
//!
//! Byte-level helpers for the elementary stream format: probing the leading
//! sequence header for dimensions and frame rate, and scanning for picture
//! entry points while the frame index is built. Actual decoding belongs to
//! the host's decoder; this module never interprets picture payloads.

use crate::error::{PlayerError, Result};
use tracing::error;

/// Sequence header start code; every openable stream begins with one.
pub const SEQUENCE_START: u32 = 0x0000_01B3;
/// Group start code; opens an access unit a decoder can enter cold.
pub const GROUP_START: u32 = 0x0000_01B8;
/// Picture start code.
pub const PICTURE_START: u32 = 0x0000_0100;
/// Extension start code.
pub const EXTENSION_START: u32 = 0x0000_01B5;

/// Picture coding type for intra-coded (key) frames.
const CODING_INTRA: u8 = 1;

/// What the leading sequence header declares about the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Frame rate in frames per kilosecond.
    pub fpks: u32,
}

/// Parse the first 8 bytes of a stream.
///
/// The stream must open with [`SEQUENCE_START`]; width, height and the
/// frame-rate code unpack from the following four bytes.
pub fn probe_header(bytes: &[u8; 8]) -> Result<StreamInfo> {
    let code = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if code != SEQUENCE_START {
        return Err(PlayerError::FormatMismatch);
    }

    let width = (u32::from(bytes[4]) << 4) | (u32::from(bytes[5]) >> 4);
    let height = ((u32::from(bytes[5]) & 0x0F) << 8) | u32::from(bytes[6]);
    Ok(StreamInfo {
        width,
        height,
        fpks: fpks_from_rate_code(bytes[7] & 0x0F),
    })
}

/// Map a frame-rate code to frames per kilosecond.
///
/// Invalid codes fall back to 1000 so downstream pacing arithmetic never
/// divides by zero.
pub fn fpks_from_rate_code(code: u8) -> u32 {
    match code {
        1 => 23_976,
        2 => 24_000,
        3 => 25_000,
        4 => 29_970,
        5 => 30_000,
        6 => 50_000,
        7 => 59_940,
        8 => 60_000,
        _ => {
            error!(code, "invalid frame rate code");
            1000
        }
    }
}

/// Bytes a start code may need past its own four bytes before it can be
/// interpreted (picture coding type, extension payload).
const LOOKAHEAD: usize = 6;

/// Incremental scanner that locates picture entry points in a stream fed to
/// it in arbitrary chunks.
///
/// Emits one entry per coded picture, in stream order: the byte offset a
/// decoder can start from for keyframes (the sequence or group header that
/// opened the access unit, falling back to the picture itself), `None`
/// otherwise. Field-coded pictures set the [`uses_fields`](Self::uses_fields)
/// flag; with field framing every display frame produces two entries.
pub struct FrameScanner {
    carry: Vec<u8>,
    base: u32,
    anchor: Option<u32>,
    uses_fields: bool,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self {
            carry: Vec::new(),
            base: 0,
            anchor: None,
            uses_fields: false,
        }
    }

    /// Feed the next chunk, invoking `entry` once per completed picture.
    pub fn push(&mut self, chunk: &[u8], entry: &mut dyn FnMut(Option<u32>)) {
        self.carry.extend_from_slice(chunk);
        let cut = self.carry.len().saturating_sub(LOOKAHEAD);
        Self::scan(
            &self.carry,
            self.base,
            cut,
            &mut self.anchor,
            &mut self.uses_fields,
            entry,
        );
        self.carry.drain(..cut);
        self.base = self.base.wrapping_add(cut as u32);
    }

    /// Flush the tail bytes held back for lookahead at end of stream.
    pub fn finish(&mut self, entry: &mut dyn FnMut(Option<u32>)) {
        let len = self.carry.len();
        Self::scan(
            &self.carry,
            self.base,
            len,
            &mut self.anchor,
            &mut self.uses_fields,
            entry,
        );
        self.base = self.base.wrapping_add(len as u32);
        self.carry.clear();
    }

    pub fn uses_fields(&self) -> bool {
        self.uses_fields
    }

    fn scan(
        carry: &[u8],
        base: u32,
        end: usize,
        anchor: &mut Option<u32>,
        uses_fields: &mut bool,
        entry: &mut dyn FnMut(Option<u32>),
    ) {
        let mut i = 0;
        while i < end {
            if carry[i] != 0x00 || i + 3 >= carry.len() {
                i += 1;
                continue;
            }
            if carry[i + 1] != 0x00 || carry[i + 2] != 0x01 {
                i += 1;
                continue;
            }

            let offset = base.wrapping_add(i as u32);
            match carry[i + 3] {
                0xB3 | 0xB8 => {
                    // sequence/group header: the earliest one since the last
                    // picture anchors the next access unit
                    if anchor.is_none() {
                        *anchor = Some(offset);
                    }
                }
                0x00 => {
                    // picture start; coding type sits in the second byte
                    // after the code
                    if i + 5 < carry.len() {
                        let coding = (carry[i + 5] >> 3) & 0x07;
                        if coding == CODING_INTRA {
                            entry(Some(anchor.take().unwrap_or(offset)));
                        } else {
                            *anchor = None;
                            entry(None);
                        }
                    }
                    // else: truncated picture header at end of stream
                }
                0xB5 => {
                    // picture coding extension carries picture_structure;
                    // anything but a frame picture means field framing
                    if i + 6 < carry.len() && carry[i + 4] >> 4 == 8 && carry[i + 6] & 0x03 != 0x03
                    {
                        *uses_fields = true;
                    }
                }
                _ => {}
            }
            i += 4;
        }
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}
