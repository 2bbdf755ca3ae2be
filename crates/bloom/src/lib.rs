//! # Bloom Filter
//!
//! Per-table membership filter. A table whose filter rejects a key is never
//! read for it; a filter that accepts a key is wrong at roughly the configured
//! false-positive rate. There are no false negatives.
//!
//! ## Sizing
//!
//! For `n` expected keys and target rate `p`:
//!
//! ```text
//! m = ceil(-n * ln(p) / ln(2)^2)      (bits, at least 8)
//! k = ceil((m / n) * ln(2))           (probes per key, at least 1)
//! ```
//!
//! ## On-disk form
//!
//! Each table persists its filter to `sst_<id>.bloom` as one byte per bit
//! position (`0x00` or `0x01`), so the file length equals `m`. `k` is not
//! stored; [`BloomFilter::read_from`] re-derives it from `m` and the table's
//! record count.
//!
//! ## Example
//!
//! ```rust
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"hello");
//! assert!(bf.may_contain(b"hello"));
//! ```
use std::io::{self, Read, Write};

/// Largest filter accepted from disk, in bits (and bytes): 512 MiB.
const MAX_ENCODED_LEN: usize = 512 * 1024 * 1024;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
/// Basis of the second hash; any odd constant distinct from `FNV_OFFSET`.
const SECOND_BASIS: u64 = 0x517c_c1b7_2722_0a95;

/// Bit set of `m` bits probed `k` times per key.
///
/// Probe `i` of a key lands on `(a + i * b) mod m`, where `a` and `b` are two
/// FNV-1a hashes of the key with different bases.
pub struct BloomFilter {
    words: Vec<u64>,
    bit_len: u64,
    hash_count: u32,
}

impl BloomFilter {
    /// A filter for `expected_items` keys at `false_positive_rate`.
    ///
    /// # Panics
    ///
    /// If `expected_items` is zero or the rate lies outside `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "bloom filter needs at least one expected item");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "bloom false-positive rate must lie in (0, 1)"
        );

        let n = expected_items as f64;
        let ln2 = std::f64::consts::LN_2;
        let bit_len = ((-n * false_positive_rate.ln()) / (ln2 * ln2)).ceil() as u64;
        Self::empty(bit_len.max(8), expected_items)
    }

    fn empty(bit_len: u64, expected_items: usize) -> Self {
        Self {
            words: vec![0; bit_len.div_ceil(64) as usize],
            bit_len,
            hash_count: hash_count_for(bit_len, expected_items),
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        for bit in self.probes(key) {
            self.words[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    /// `false` means `key` was never inserted.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.probes(key).all(|bit| self.is_set(bit))
    }

    /// Number of bits, `m`.
    #[must_use]
    pub fn bit_len(&self) -> u64 {
        self.bit_len
    }

    /// Probes per key, `k`.
    #[must_use]
    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    /// Length of the byte-per-bit encoding.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.bit_len as usize
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let encoded: Vec<u8> = (0..self.bit_len).map(|bit| u8::from(self.is_set(bit))).collect();
        w.write_all(&encoded)
    }

    /// Decodes a filter written by [`write_to`](Self::write_to) for a table of
    /// `expected_items` records.
    ///
    /// Errors with `InvalidData` if the input is empty, longer than the
    /// accepted maximum, or holds a byte other than `0x00`/`0x01`.
    pub fn read_from<R: Read>(r: &mut R, expected_items: usize) -> io::Result<Self> {
        let mut encoded = Vec::new();
        r.take(MAX_ENCODED_LEN as u64 + 1).read_to_end(&mut encoded)?;
        if encoded.is_empty() || encoded.len() > MAX_ENCODED_LEN {
            return Err(invalid(format!("bloom filter length {} out of range", encoded.len())));
        }

        let mut filter = Self::empty(encoded.len() as u64, expected_items.max(1));
        for (pos, &byte) in encoded.iter().enumerate() {
            match byte {
                0 => {}
                1 => filter.words[pos / 64] |= 1 << (pos % 64),
                other => return Err(invalid(format!("bloom byte {other:#04x} at {pos}"))),
            }
        }
        Ok(filter)
    }

    fn is_set(&self, bit: u64) -> bool {
        self.words[(bit / 64) as usize] & (1 << (bit % 64)) != 0
    }

    fn probes(&self, key: &[u8]) -> Probes {
        Probes {
            next: fnv1a(key, FNV_OFFSET),
            step: fnv1a(key, SECOND_BASIS),
            modulus: self.bit_len,
            left: self.hash_count,
        }
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("bit_len", &self.bit_len)
            .field("hash_count", &self.hash_count)
            .field("ones", &self.words.iter().map(|w| w.count_ones()).sum::<u32>())
            .finish()
    }
}

/// Bit positions probed for one key.
struct Probes {
    next: u64,
    step: u64,
    modulus: u64,
    left: u32,
}

impl Iterator for Probes {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        let bit = self.next % self.modulus;
        self.next = self.next.wrapping_add(self.step);
        Some(bit)
    }
}

fn hash_count_for(bit_len: u64, expected_items: usize) -> u32 {
    let k = (bit_len as f64 / expected_items as f64 * std::f64::consts::LN_2).ceil() as u32;
    k.max(1)
}

fn fnv1a(data: &[u8], basis: u64) -> u64 {
    data.iter()
        .fold(basis, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
