//! File naming and the sparse index encoding.
//!
//! A table with id `N` lives in three sibling files:
//!
//! ```text
//! sst_N.data    concatenated records, ascending by key
//! sst_N.index   [key_size: u32 LE][key][offset: u32 LE] per sampled record
//! sst_N.bloom   one byte (0x00 / 0x01) per bloom bit
//! ```
//!
//! Files are first written as `sst_N.<ext>.tmp` and renamed into place.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use record::MAX_KEY_SIZE;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SsTableError};

pub const FILE_PREFIX: &str = "sst_";
pub const TMP_SUFFIX: &str = ".tmp";

/// Which of a table's three files a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Data,
    Index,
    Bloom,
}

impl FileKind {
    pub const ALL: [FileKind; 3] = [FileKind::Data, FileKind::Index, FileKind::Bloom];

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Data => "data",
            FileKind::Index => "index",
            FileKind::Bloom => "bloom",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        FileKind::ALL.into_iter().find(|k| k.extension() == ext)
    }
}

/// Paths of the three files backing one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePaths {
    pub data: PathBuf,
    pub index: PathBuf,
    pub bloom: PathBuf,
}

impl TablePaths {
    pub fn new(dir: &Path, id: u64) -> Self {
        let file = |kind: FileKind| dir.join(format!("{FILE_PREFIX}{id}.{}", kind.extension()));
        Self {
            data: file(FileKind::Data),
            index: file(FileKind::Index),
            bloom: file(FileKind::Bloom),
        }
    }

    #[must_use]
    pub fn get(&self, kind: FileKind) -> &Path {
        match kind {
            FileKind::Data => &self.data,
            FileKind::Index => &self.index,
            FileKind::Bloom => &self.bloom,
        }
    }

    #[must_use]
    pub fn all_exist(&self) -> bool {
        FileKind::ALL.iter().all(|&k| self.get(k).exists())
    }
}

/// Temporary sibling used while a file is being written.
#[must_use]
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(TMP_SUFFIX);
    PathBuf::from(s)
}

/// Parses `sst_<id>.<ext>` into its id and file kind. Anything else
/// (including `.tmp` leftovers) yields `None`.
#[must_use]
pub fn parse_table_file(file_name: &str) -> Option<(u64, FileKind)> {
    let rest = file_name.strip_prefix(FILE_PREFIX)?;
    let (id, ext) = rest.split_once('.')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((id.parse().ok()?, FileKind::from_extension(ext)?))
}

/// One sampled `(key, byte offset)` pair of the sparse index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseEntry {
    pub key: String,
    pub offset: u32,
}

pub fn write_sparse_entry<W: Write>(w: &mut W, key: &str, offset: u32) -> io::Result<()> {
    w.write_u32::<LittleEndian>(key.len() as u32)?;
    w.write_all(key.as_bytes())?;
    w.write_u32::<LittleEndian>(offset)
}

/// Decodes a whole sparse index file. `id` is only used for error context.
pub fn read_sparse_index<R: Read>(r: &mut R, id: u64) -> Result<Vec<SparseEntry>> {
    let corrupt = |reason: String| SsTableError::Corrupt { id, reason };
    let mut entries = Vec::new();

    loop {
        let key_size = match r.read_u32::<LittleEndian>() {
            Ok(n) => n as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if key_size > MAX_KEY_SIZE {
            return Err(corrupt(format!(
                "index key size {} exceeds maximum {}",
                key_size, MAX_KEY_SIZE
            )));
        }
        let mut key = vec![0u8; key_size];
        r.read_exact(&mut key)
            .map_err(|e| corrupt(format!("truncated index entry: {e}")))?;
        let offset = r
            .read_u32::<LittleEndian>()
            .map_err(|e| corrupt(format!("truncated index entry: {e}")))?;
        let key = String::from_utf8(key).map_err(|_| corrupt("index key is not UTF-8".into()))?;

        if let Some(prev) = entries.last() {
            let prev: &SparseEntry = prev;
            if prev.key >= key || prev.offset >= offset {
                return Err(corrupt(format!("index out of order at key {:?}", key)));
            }
        }
        entries.push(SparseEntry { key, offset });
    }

    Ok(entries)
}
