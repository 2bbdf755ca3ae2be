//! # WAL - Write-Ahead Log
//!
//! Crash durability for the StrataKV store.
//!
//! Every mutation is appended to the WAL **before** it is applied to the
//! memtable. On restart the log is replayed to rebuild the memtable, so an
//! acknowledged write survives a crash. Once every memtable the log covers has
//! been written out as an SSTable the store truncates the log with
//! [`WalWriter::reset`].
//!
//! ## Binary Format
//!
//! The file is a plain sequence of frames:
//!
//! ```text
//! [op: u8][record: HEADER_SIZE + key_size + value_size bytes]
//! ```
//!
//! `op` is one of [`Op::Put`] (0), [`Op::Get`] (1), [`Op::Delete`] (2). The
//! record carries its own CRC32, so the frame needs no extra checksum.
//!
//! ## Durability
//!
//! [`Durability::Sync`] writes and fsyncs each frame before `append` returns.
//! [`Durability::Batched`] collects frames in memory and writes them once the
//! batch reaches its threshold; a crash loses at most the pending batch.
//!
//! ## Example
//!
//! ```rust,no_run
//! use config::Durability;
//! use record::Record;
//! use wal::{Op, WalReader, WalWriter};
//!
//! let mut w = WalWriter::create("wal.log", Durability::Sync).unwrap();
//! w.append(Op::Put, &Record::new("hello", "world", 1)).unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("wal.log").unwrap();
//! r.replay(|op, rec| println!("{:?} {:?}", op, rec)).unwrap();
//! ```

use byteorder::ReadBytesExt;
use config::Durability;
use record::{Record, RecordError};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Operation tag stored in front of every WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Put = 0,
    Get = 1,
    Delete = 2,
}

impl TryFrom<u8> for Op {
    type Error = WalError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Op::Put),
            1 => Ok(Op::Get),
            2 => Ok(Op::Delete),
            other => Err(WalError::UnknownOp(other)),
        }
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed to decode (bad checksum, bad tombstone byte, ...).
    #[error("corrupt record: {0}")]
    Record(#[from] RecordError),

    #[error("unknown wal op tag {0}")]
    UnknownOp(u8),
}

/// Append-only WAL writer.
///
/// Frames are encoded into an internal buffer. Under [`Durability::Sync`] the
/// buffer is written and fsynced on every append; under
/// [`Durability::Batched`] only once it reaches the batch threshold.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    durability: Durability,
    /// Encoded frames not yet written to the file.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    pub fn create<P: AsRef<Path>>(path: P, durability: Durability) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let capacity = match durability {
            Durability::Sync => 256,
            Durability::Batched { threshold_bytes } => threshold_bytes.min(4 * 1024 * 1024),
        };
        Ok(Self {
            file,
            path,
            durability,
            buf: Vec::with_capacity(capacity),
        })
    }

    /// Appends `(op, record)` to the log.
    pub fn append(&mut self, op: Op, record: &Record) -> Result<(), WalError> {
        self.buf.push(op as u8);
        record.encode_into(&mut self.buf);

        let due = match self.durability {
            Durability::Sync => true,
            Durability::Batched { threshold_bytes } => self.buf.len() >= threshold_bytes,
        };
        if due {
            self.write_pending()?;
        }
        Ok(())
    }

    /// Writes any pending batch and fsyncs the file.
    pub fn sync(&mut self) -> Result<(), WalError> {
        if self.buf.is_empty() {
            self.file.sync_all()?;
            return Ok(());
        }
        self.write_pending()
    }

    /// Truncates the log to zero bytes and discards the pending batch.
    ///
    /// Only call this once every record in the log is durable elsewhere.
    pub fn reset(&mut self) -> Result<(), WalError> {
        self.buf.clear();
        self.file.set_len(0)?;
        self.file.sync_all()?;
        debug!(path = %self.path.display(), "wal truncated");
        Ok(())
    }

    /// Bytes appended but not yet written to the file.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn durability(&self) -> Durability {
        self.durability
    }

    fn write_pending(&mut self) -> Result<(), WalError> {
        if let Err(e) = self.file.write_all(&self.buf) {
            // Part of the batch may already be in the file; never rewrite it.
            self.buf.clear();
            return Err(e.into());
        }
        self.buf.clear();
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            if let Err(e) = self.write_pending() {
                warn!(path = %self.path.display(), error = %e, "failed to write pending wal batch on drop");
            }
        }
    }
}

/// Sequential WAL reader.
///
/// Generic over any `Read` implementor so tests can replay in-memory buffers.
/// A truncated tail frame (crash mid-write) ends the replay cleanly; every
/// complete frame before it is still delivered.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
    valid_len: u64,
}

impl WalReader<File> {
    /// Opens an existing WAL file for sequential replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader::from_reader(f))
    }
}

impl<R: Read> WalReader<R> {
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
            valid_len: 0,
        }
    }

    /// Bytes covered by the complete frames replayed so far. Anything past
    /// this offset is a torn tail.
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Replays every complete frame, calling `apply` for each one, and
    /// returns how many frames were applied.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** -> `Ok(n)`.
    /// - **Truncated tail** -> `Ok(n)` after all complete frames.
    /// - **Unknown op tag** -> `Err(WalError::UnknownOp)`.
    /// - **Checksum mismatch / malformed record** -> `Err(WalError::Record)`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<usize, WalError>
    where
        F: FnMut(Op, Record),
    {
        let mut applied = 0usize;
        loop {
            let tag = match self.rdr.read_u8() {
                Ok(t) => t,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(applied),
                Err(e) => return Err(WalError::Io(e)),
            };
            let op = Op::try_from(tag)?;

            match Record::read_from(&mut self.rdr) {
                Ok(Some(rec)) => {
                    self.valid_len += 1 + rec.size() as u64;
                    apply(op, rec);
                    applied += 1;
                }
                Ok(None) | Err(RecordError::Truncated { .. }) => {
                    warn!(applied, "wal ends with a truncated frame; ignoring tail");
                    return Ok(applied);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Cuts the log at `path` back to `valid_len` bytes, dropping a torn tail
/// so later appends start on a frame boundary. Returns whether anything was
/// removed.
pub fn discard_tail<P: AsRef<Path>>(path: P, valid_len: u64) -> Result<bool, WalError> {
    let path = path.as_ref();
    let file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len();
    if len <= valid_len {
        return Ok(false);
    }
    file.set_len(valid_len)?;
    file.sync_all()?;
    warn!(path = %path.display(), kept = valid_len, dropped = len - valid_len, "discarded torn wal tail");
    Ok(true)
}
