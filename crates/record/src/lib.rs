//! # Record - the unit of storage
//!
//! Every key-value pair StrataKV stores, whether it sits in the memtable, the
//! write-ahead log, or an SSTable data file, is a [`Record`]. A record is a
//! fixed-size [`Header`] followed by the raw key and value bytes.
//!
//! ## Binary Layout
//!
//! ```text
//! ┌──────────┬───────────┬───────────┬──────────┬────────────┬─────┬───────┐
//! │ checksum │ tombstone │ timestamp │ key_size │ value_size │ key │ value │
//! │ u32 LE   │ u8        │ u32 LE    │ u32 LE   │ u32 LE     │     │       │
//! └──────────┴───────────┴───────────┴──────────┴────────────┴─────┴───────┘
//!  <──────────────────── HEADER_SIZE = 17 bytes ─────────────────>
//! ```
//!
//! The checksum is a CRC32 (IEEE) over every field after it: tombstone,
//! timestamp, key size, value size, key and value. It is verified whenever a
//! record is decoded.
//!
//! ## Example
//!
//! ```rust
//! use record::Record;
//!
//! let rec = Record::new("user:1", "alice", 1_700_000_000);
//! let bytes = rec.to_bytes();
//! let back = Record::decode(&bytes).unwrap();
//! assert_eq!(back, rec);
//! ```

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use std::io::{self, Read};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Encoded size of a [`Header`] in bytes.
pub const HEADER_SIZE: usize = 17;

/// Maximum key size accepted by the decoder (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;

/// Maximum value size accepted by the decoder (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// Errors produced while encoding or decoding records.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The buffer or stream ended before the full record was available.
    #[error("record truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// The tombstone byte was neither 0 nor 1.
    #[error("invalid tombstone flag {0:#04x}")]
    InvalidTombstone(u8),

    /// Key or value bytes are not valid UTF-8.
    #[error("record {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// Stored checksum does not match the recomputed one.
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    /// Header sizes disagree with the supplied key or value.
    #[error("{field} size mismatch: header says {header}, got {actual}")]
    SizeMismatch {
        field: &'static str,
        header: u32,
        actual: usize,
    },

    /// Key or value exceeds the decoder's allocation cap.
    #[error("{field} size {size} exceeds maximum {max}")]
    TooLarge {
        field: &'static str,
        size: usize,
        max: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Fixed-size metadata preceding every key/value payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub checksum: u32,
    pub tombstone: bool,
    /// Creation time in unix seconds.
    pub timestamp: u32,
    pub key_size: u32,
    pub value_size: u32,
}

impl Header {
    /// Encodes the header into its 17-byte little-endian form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut out[0..4], self.checksum);
        out[4] = u8::from(self.tombstone);
        LittleEndian::write_u32(&mut out[5..9], self.timestamp);
        LittleEndian::write_u32(&mut out[9..13], self.key_size);
        LittleEndian::write_u32(&mut out[13..17], self.value_size);
        out
    }

    /// Decodes a header from the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        if buf.len() < HEADER_SIZE {
            return Err(RecordError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }
        let tombstone = match buf[4] {
            0 => false,
            1 => true,
            other => return Err(RecordError::InvalidTombstone(other)),
        };
        Ok(Self {
            checksum: LittleEndian::read_u32(&buf[0..4]),
            tombstone,
            timestamp: LittleEndian::read_u32(&buf[5..9]),
            key_size: LittleEndian::read_u32(&buf[9..13]),
            value_size: LittleEndian::read_u32(&buf[13..17]),
        })
    }

    /// Total encoded size of the record this header describes.
    #[must_use]
    pub fn record_size(&self) -> usize {
        HEADER_SIZE + self.key_size as usize + self.value_size as usize
    }
}

/// An immutable, checksummed key-value record.
///
/// Fields are private so that `header.key_size`, `header.value_size` and
/// `header.checksum` always agree with the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    header: Header,
    key: String,
    value: String,
}

impl Record {
    /// Builds a live record. Callers are expected to have bounded the key and
    /// value lengths (see [`MAX_KEY_SIZE`], [`MAX_VALUE_SIZE`]).
    pub fn new(key: impl Into<String>, value: impl Into<String>, timestamp: u32) -> Self {
        Self::build(key.into(), value.into(), timestamp, false)
    }

    /// Builds a tombstone record marking `key` as deleted.
    pub fn tombstone(key: impl Into<String>, timestamp: u32) -> Self {
        Self::build(key.into(), String::new(), timestamp, true)
    }

    fn build(key: String, value: String, timestamp: u32, tombstone: bool) -> Self {
        debug_assert!(key.len() <= u32::MAX as usize && value.len() <= u32::MAX as usize);
        let mut header = Header {
            checksum: 0,
            tombstone,
            timestamp,
            key_size: key.len() as u32,
            value_size: value.len() as u32,
        };
        header.checksum = checksum_of(&header, key.as_bytes(), value.as_bytes());
        Self { header, key, value }
    }

    /// Reassembles a record received from elsewhere (e.g. another node),
    /// verifying that the header sizes and checksum match the payload.
    pub fn from_parts(header: Header, key: String, value: String) -> Result<Self, RecordError> {
        if header.key_size as usize != key.len() {
            return Err(RecordError::SizeMismatch {
                field: "key",
                header: header.key_size,
                actual: key.len(),
            });
        }
        if header.value_size as usize != value.len() {
            return Err(RecordError::SizeMismatch {
                field: "value",
                header: header.value_size,
                actual: value.len(),
            });
        }
        let rec = Self { header, key, value };
        rec.verify_checksum()?;
        Ok(rec)
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.header.tombstone
    }

    /// Encoded size: `HEADER_SIZE + key_size + value_size`.
    #[must_use]
    pub fn size(&self) -> usize {
        self.header.record_size()
    }

    /// CRC32 over every header field except the checksum, then key and value.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        checksum_of(&self.header, self.key.as_bytes(), self.value.as_bytes())
    }

    /// Fails with [`RecordError::ChecksumMismatch`] if the stored checksum is stale.
    pub fn verify_checksum(&self) -> Result<(), RecordError> {
        let computed = self.compute_checksum();
        if computed != self.header.checksum {
            return Err(RecordError::ChecksumMismatch {
                stored: self.header.checksum,
                computed,
            });
        }
        Ok(())
    }

    /// Appends the encoded record (header, key, value) to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.size());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(self.value.as_bytes());
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes one record from the front of `buf`. Trailing bytes are ignored;
    /// use [`Record::size`] on the result to advance past it.
    pub fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let header = Header::decode(buf)?;
        let needed = header.record_size();
        if buf.len() < needed {
            return Err(RecordError::Truncated {
                needed,
                available: buf.len(),
            });
        }
        let key_end = HEADER_SIZE + header.key_size as usize;
        let key = std::str::from_utf8(&buf[HEADER_SIZE..key_end])
            .map_err(|_| RecordError::InvalidUtf8 { field: "key" })?;
        let value = std::str::from_utf8(&buf[key_end..needed])
            .map_err(|_| RecordError::InvalidUtf8 { field: "value" })?;
        let rec = Self {
            header,
            key: key.to_owned(),
            value: value.to_owned(),
        };
        rec.verify_checksum()?;
        Ok(rec)
    }

    /// Reads the next record from a stream.
    ///
    /// Returns `Ok(None)` on a clean end-of-stream at a record boundary and
    /// [`RecordError::Truncated`] if the stream ends inside a record.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Self>, RecordError> {
        let mut head = [0u8; HEADER_SIZE];
        let got = read_full(r, &mut head)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            return Err(RecordError::Truncated {
                needed: HEADER_SIZE,
                available: got,
            });
        }
        let header = Header::decode(&head)?;
        check_cap("key", header.key_size as usize, MAX_KEY_SIZE)?;
        check_cap("value", header.value_size as usize, MAX_VALUE_SIZE)?;

        let mut payload = vec![0u8; header.key_size as usize + header.value_size as usize];
        let got = read_full(r, &mut payload)?;
        if got < payload.len() {
            return Err(RecordError::Truncated {
                needed: header.record_size(),
                available: HEADER_SIZE + got,
            });
        }
        let value = payload.split_off(header.key_size as usize);
        let key = String::from_utf8(payload).map_err(|_| RecordError::InvalidUtf8 { field: "key" })?;
        let value =
            String::from_utf8(value).map_err(|_| RecordError::InvalidUtf8 { field: "value" })?;

        let rec = Self { header, key, value };
        rec.verify_checksum()?;
        Ok(Some(rec))
    }
}

/// Current wall-clock time in unix seconds, saturating at `u32::MAX`.
#[must_use]
pub fn unix_timestamp() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

fn checksum_of(header: &Header, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(&[u8::from(header.tombstone)]);
    hasher.update(&header.timestamp.to_le_bytes());
    hasher.update(&header.key_size.to_le_bytes());
    hasher.update(&header.value_size.to_le_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

fn check_cap(field: &'static str, size: usize, max: usize) -> Result<(), RecordError> {
    if size > max {
        return Err(RecordError::TooLarge { field, size, max });
    }
    Ok(())
}

/// Like `read_exact`, but reports how many bytes were read before EOF
/// instead of failing.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
