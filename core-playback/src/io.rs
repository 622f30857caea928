//! # Media I/O Adapter
//!
//! A single open stream over either a live file handle or an in-memory
//! precached buffer, plus the precache table itself. Exactly one backing is
//! active at a time; opening a new source requires the previous one to be
//! closed first.

use crate::error::{PlayerError, Result};
use bytes::Bytes;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Byte source the frame index builder can scan.
///
/// Lets tests substitute in-memory sources, and lets a reload-validation
/// test assert that a valid cache is reused without touching the stream.
pub trait SourceRead {
    /// Fill as much of `buf` as the source allows. Returns the number of
    /// bytes read; anything short of `buf.len()` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Reposition to an absolute byte offset.
    fn seek(&mut self, pos: u32) -> Result<()>;

    /// Total byte length of the source.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One fully precached file. The read position belongs to the entry so a
/// precached source can be reopened and rewound like a file.
struct PrecacheEntry {
    data: Bytes,
    pos: usize,
}

enum Backing {
    File { handle: File, len: u32 },
    Precached(usize),
}

/// The engine's open stream and precache table.
pub struct MediaIo {
    backing: Option<Backing>,
    entries: Vec<PrecacheEntry>,
    max_entries: usize,
}

impl MediaIo {
    pub fn new(max_entries: usize) -> Self {
        Self {
            backing: None,
            entries: Vec::new(),
            max_entries,
        }
    }

    /// Open a file-backed source. Fails if a source is already open.
    pub fn open(&mut self, path: &Path) -> Result<()> {
        if self.backing.is_some() {
            return Err(PlayerError::SourceOpen(
                "a source is already open".to_string(),
            ));
        }
        let handle = File::open(path)
            .map_err(|e| PlayerError::SourceOpen(format!("{}: {}", path.display(), e)))?;
        let len = handle
            .metadata()
            .map_err(|e| PlayerError::SourceOpen(format!("{}: {}", path.display(), e)))?
            .len() as u32;
        self.backing = Some(Backing::File { handle, len });
        Ok(())
    }

    /// Open a precached source by table index, rewound to the beginning.
    pub fn open_precached(&mut self, index: usize) -> Result<()> {
        if self.backing.is_some() {
            return Err(PlayerError::SourceOpen(
                "a source is already open".to_string(),
            ));
        }
        let entry = self
            .entries
            .get_mut(index)
            .ok_or_else(|| PlayerError::SourceOpen(format!("no precache entry {}", index)))?;
        entry.pos = 0;
        self.backing = Some(Backing::Precached(index));
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.backing.is_some()
    }

    pub fn close(&mut self) {
        self.backing = None;
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.backing.as_mut() {
            Some(Backing::File { handle, .. }) => {
                let mut total = 0;
                while total < buf.len() {
                    let n = handle.read(&mut buf[total..])?;
                    if n == 0 {
                        break;
                    }
                    total += n;
                }
                Ok(total)
            }
            Some(Backing::Precached(index)) => {
                let entry = &mut self.entries[*index];
                let left = entry.data.len() - entry.pos;
                let take = left.min(buf.len());
                buf[..take].copy_from_slice(&entry.data[entry.pos..entry.pos + take]);
                entry.pos += take;
                Ok(take)
            }
            None => Err(PlayerError::SourceOpen("no source is open".to_string())),
        }
    }

    pub fn seek(&mut self, pos: u32) -> Result<()> {
        match self.backing.as_mut() {
            Some(Backing::File { handle, .. }) => {
                handle.seek(SeekFrom::Start(u64::from(pos)))?;
                Ok(())
            }
            Some(Backing::Precached(index)) => {
                let entry = &mut self.entries[*index];
                if (pos as usize) < entry.data.len() {
                    entry.pos = pos as usize;
                    Ok(())
                } else {
                    Err(PlayerError::SourceOpen(format!(
                        "seek to {} is past the end of the precached buffer",
                        pos
                    )))
                }
            }
            None => Err(PlayerError::SourceOpen("no source is open".to_string())),
        }
    }

    pub fn len(&self) -> u32 {
        match self.backing.as_ref() {
            Some(Backing::File { len, .. }) => *len,
            Some(Backing::Precached(index)) => self.entries[*index].data.len() as u32,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load `path` fully into memory and register it in the precache table.
    ///
    /// Reads in `chunk_bytes` slices, reporting via the standard progress
    /// contract. On any failure nothing is registered. Returns the new
    /// entry's index.
    pub fn precache(
        &mut self,
        path: &Path,
        chunk_bytes: usize,
        progress: &mut dyn FnMut(f64),
    ) -> Result<usize> {
        if self.entries.len() >= self.max_entries {
            return Err(PlayerError::CapacityExceeded);
        }

        let mut file = File::open(path)
            .map_err(|e| PlayerError::SourceOpen(format!("{}: {}", path.display(), e)))?;
        let len = file.metadata()?.len() as usize;

        let mut data: Vec<u8> = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| PlayerError::CapacityExceeded)?;

        progress(-1.0);
        let mut buf = vec![0u8; chunk_bytes];
        while data.len() < len {
            let want = chunk_bytes.min(len - data.len());
            let got = file.read(&mut buf[..want])?;
            if got == 0 {
                return Err(PlayerError::SourceOpen(format!(
                    "{} shrank while being precached",
                    path.display()
                )));
            }
            data.extend_from_slice(&buf[..got]);
            if data.len() < len {
                progress(data.len() as f64 / len as f64);
            }
        }
        progress(1.0);

        let index = self.entries.len();
        self.entries.push(PrecacheEntry {
            data: Bytes::from(data),
            pos: 0,
        });
        debug!(index, bytes = len, "precached {}", path.display());
        Ok(index)
    }

    pub fn precache_count(&self) -> usize {
        self.entries.len()
    }

    /// Release every precached buffer. Only valid once nothing is open.
    pub fn clear_precache(&mut self) {
        self.backing = None;
        self.entries.clear();
    }
}

impl SourceRead for MediaIo {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        MediaIo::read(self, buf)
    }

    fn seek(&mut self, pos: u32) -> Result<()> {
        MediaIo::seek(self, pos)
    }

    fn len(&self) -> u32 {
        MediaIo::len(self)
    }
}
