//! # Frame Index Cache
//!
//! Builds and persists the mapping from frame number to the byte offset a
//! decoder can begin parsing from. The index is built once per distinct
//! source by scanning the stream, written to disk next to the media file,
//! and reused on later opens when its header still matches the source.
//!
//! ## On-disk layout
//!
//! A fixed header (version: 4 bytes LE, finished flag: 1 byte, uses-fields
//! flag: 1 byte, source length: 4 bytes LE) followed by one
//! 4-byte LE entry per coded picture in stream order: a keyframe's entry
//! offset, or [`NO_KEYFRAME`] for pictures a decoder cannot enter cold.
//! This layout is a compatibility surface; bump [`INDEX_VERSION`] whenever
//! it changes, and engines refuse to reuse a file whose version disagrees.

use crate::config::PlayerConfig;
use crate::error::{PlayerError, Result};
use crate::io::SourceRead;
use crate::stream::FrameScanner;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current cache file format version.
pub const INDEX_VERSION: u32 = 2;

/// Extension the cache file name swaps in for the media file's extension.
pub const INDEX_SUFFIX: &str = "idx";

/// Sentinel entry for pictures with no directly seekable offset.
pub const NO_KEYFRAME: u32 = u32::MAX;

const HEADER_BYTES: usize = 10;

/// The in-memory frame index for the currently open source.
pub struct FrameIndex {
    offsets: Vec<u32>,
    uses_fields: bool,
}

impl FrameIndex {
    pub fn empty() -> Self {
        Self {
            offsets: Vec::new(),
            uses_fields: false,
        }
    }

    /// Assemble an index from raw entries ([`NO_KEYFRAME`] marks
    /// non-seekable pictures).
    pub fn from_parts(offsets: Vec<u32>, uses_fields: bool) -> Self {
        Self {
            offsets,
            uses_fields,
        }
    }

    /// Number of indexed pictures (fields count individually when the
    /// stream uses field framing).
    pub fn frame_count(&self) -> u32 {
        self.offsets.len() as u32
    }

    /// The directly recorded entry offset for a picture, if it has one.
    pub fn offset(&self, frame: u32) -> Option<u32> {
        match self.offsets.get(frame as usize) {
            Some(&NO_KEYFRAME) | None => None,
            Some(&offset) => Some(offset),
        }
    }

    pub fn uses_fields(&self) -> bool {
        self.uses_fields
    }
}

/// Cache file path for a media file: the final extension becomes
/// [`INDEX_SUFFIX`].
pub fn index_path_for(media: &Path) -> PathBuf {
    media.with_extension(INDEX_SUFFIX)
}

struct IndexHeader {
    version: u32,
    finished: u8,
    uses_fields: u8,
    source_len: u32,
}

impl IndexHeader {
    fn to_bytes(&self) -> [u8; HEADER_BYTES] {
        let mut raw = [0u8; HEADER_BYTES];
        raw[..4].copy_from_slice(&self.version.to_le_bytes());
        raw[4] = self.finished;
        raw[5] = self.uses_fields;
        raw[6..].copy_from_slice(&self.source_len.to_le_bytes());
        raw
    }

    fn from_bytes(raw: &[u8; HEADER_BYTES]) -> Self {
        Self {
            version: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            finished: raw[4],
            uses_fields: raw[5],
            source_len: u32::from_le_bytes([raw[6], raw[7], raw[8], raw[9]]),
        }
    }
}

/// Load the frame index for `media_path`, rebuilding the cache file when it
/// is missing or stale.
///
/// A reused cache is read without touching `source` beyond its length. A
/// stale cache is deleted before the rebuild starts, so a crash mid-rebuild
/// cannot leave an inconsistent file that passes validation on the next
/// open.
pub fn load_or_build(
    source: &mut dyn SourceRead,
    media_path: &Path,
    config: &PlayerConfig,
    progress: &mut dyn FnMut(f64),
) -> Result<FrameIndex> {
    let cache_path = index_path_for(media_path);
    let source_len = source.len();

    // worst case: stale file deleted, rebuilt, then read back
    for _ in 0..3 {
        match File::open(&cache_path) {
            Ok(mut file) => match validate_header(&mut file, source_len) {
                Ok(header) => {
                    debug!("reusing frame index cache {}", cache_path.display());
                    return read_entries(file, &header, config);
                }
                Err(reason) => {
                    info!(
                        "frame index cache {} is stale ({}); rebuilding",
                        cache_path.display(),
                        reason
                    );
                    drop(file);
                    fs::remove_file(&cache_path).map_err(|e| {
                        PlayerError::IndexBuild(format!(
                            "could not delete stale cache {}: {}",
                            cache_path.display(),
                            e
                        ))
                    })?;
                }
            },
            Err(_) => build(source, &cache_path, source_len, config, progress)?,
        }
    }

    Err(PlayerError::IndexBuild(format!(
        "cache {} did not validate after a rebuild",
        cache_path.display()
    )))
}

fn validate_header(file: &mut File, source_len: u32) -> std::result::Result<IndexHeader, String> {
    let mut raw = [0u8; HEADER_BYTES];
    if file.read_exact(&mut raw).is_err() {
        return Err("truncated header".to_string());
    }
    let header = IndexHeader::from_bytes(&raw);

    if header.version != INDEX_VERSION {
        return Err(format!(
            "version {} does not match current {}",
            header.version, INDEX_VERSION
        ));
    }
    if header.finished != 1 {
        return Err("build never finished".to_string());
    }
    if header.source_len != source_len {
        return Err(format!(
            "recorded source length {} does not match actual {}",
            header.source_len, source_len
        ));
    }
    Ok(header)
}

fn read_entries(file: File, header: &IndexHeader, config: &PlayerConfig) -> Result<FrameIndex> {
    let mut reader = BufReader::new(file);
    let mut offsets = Vec::new();
    let mut raw = [0u8; 4];

    loop {
        match reader.read_exact(&mut raw) {
            Ok(()) => {
                if offsets.len() >= config.max_frame_entries {
                    warn!(
                        "stream has more frames than the table holds; ignoring entries above {}",
                        config.max_frame_entries
                    );
                    break;
                }
                offsets.push(u32::from_le_bytes(raw));
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(PlayerError::IndexBuild(format!("cache read failed: {}", e)));
            }
        }
    }

    debug!(
        frames = offsets.len(),
        uses_fields = header.uses_fields == 1,
        "frame index loaded"
    );
    Ok(FrameIndex {
        offsets,
        uses_fields: header.uses_fields == 1,
    })
}

fn build(
    source: &mut dyn SourceRead,
    cache_path: &Path,
    source_len: u32,
    config: &PlayerConfig,
    progress: &mut dyn FnMut(f64),
) -> Result<()> {
    info!("building frame index cache {}", cache_path.display());
    let result = build_inner(source, cache_path, source_len, config, progress);
    if result.is_err() {
        // never leave a partial file behind
        let _ = fs::remove_file(cache_path);
    }
    result
}

fn build_inner(
    source: &mut dyn SourceRead,
    cache_path: &Path,
    source_len: u32,
    config: &PlayerConfig,
    progress: &mut dyn FnMut(f64),
) -> Result<()> {
    let mut file = File::create(cache_path).map_err(|e| {
        PlayerError::IndexBuild(format!("could not create {}: {}", cache_path.display(), e))
    })?;

    // the unfinished header goes in first, so an interrupted build is
    // recognizably invalid
    let header = IndexHeader {
        version: INDEX_VERSION,
        finished: 0,
        uses_fields: 0,
        source_len,
    };
    file.write_all(&header.to_bytes())?;

    source.seek(0)?;
    progress(-1.0);

    let mut scanner = FrameScanner::new();
    let mut writer = EntryWriter {
        file: &mut file,
        written: 0,
        limit: config.max_frame_entries,
        truncated: false,
        error: None,
    };
    let mut buf = vec![0u8; config.parse_chunk_bytes];
    let mut scanned: u64 = 0;
    let mut chunks = 0u32;
    let mut last_fraction = 0.0f64;

    loop {
        let got = source.read(&mut buf)?;
        if got == 0 {
            break;
        }
        scanned += got as u64;
        scanner.push(&buf[..got], &mut |offset| writer.push(offset));

        if writer.truncated {
            warn!(
                "frame table capacity {} reached; frames past it are unreachable by seek",
                config.max_frame_entries
            );
            break;
        }

        chunks += 1;
        if chunks % 11 == 0 && source_len > 0 {
            let fraction = scanned as f64 / f64::from(source_len);
            if fraction > last_fraction && fraction < 1.0 {
                progress(fraction);
                last_fraction = fraction;
            }
        }

        if got < buf.len() {
            break;
        }
    }

    if !writer.truncated {
        scanner.finish(&mut |offset| writer.push(offset));
    }
    if let Some(e) = writer.error.take() {
        return Err(PlayerError::IndexBuild(format!("cache write failed: {}", e)));
    }
    let frames = writer.written;

    progress(1.0);

    let header = IndexHeader {
        version: INDEX_VERSION,
        finished: 1,
        uses_fields: u8::from(scanner.uses_fields()),
        source_len,
    };
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.to_bytes())?;

    info!(
        frames,
        uses_fields = scanner.uses_fields(),
        "frame index built"
    );
    Ok(())
}

struct EntryWriter<'a> {
    file: &'a mut File,
    written: usize,
    limit: usize,
    truncated: bool,
    error: Option<std::io::Error>,
}

impl EntryWriter<'_> {
    fn push(&mut self, offset: Option<u32>) {
        if self.error.is_some() || self.truncated {
            return;
        }
        if self.written >= self.limit {
            self.truncated = true;
            return;
        }
        match self.file.write_all(&offset.unwrap_or(NO_KEYFRAME).to_le_bytes()) {
            Ok(()) => self.written += 1,
            Err(e) => self.error = Some(e),
        }
    }
}
