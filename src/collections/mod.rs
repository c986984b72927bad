//! Spill Collections
//!
//! Disk-backed structures used by operators that must buffer a whole
//! upstream result:
//!
//! | Structure | Used by |
//! |-----------|---------|
//! | [`BigHashSet`] | Distinct, Intersection, Difference |
//! | [`Sorter`] | Order |
//!
//! Both keep up to `memory_threshold` entries in memory and move the rest
//! into anonymous temp files, encoded with bincode. Both are internally
//! locked, so concurrent producers may share one instance, and both accept
//! `close()` any number of times.

mod big_hash_set;
mod sorter;

pub use big_hash_set::BigHashSet;
pub use sorter::{SortedEntries, Sorter};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Spill structure errors
#[derive(Debug, thiserror::Error)]
pub enum SpillError {
    /// Temp file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Entry could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Structure used after `close()`
    #[error("Spill structure is closed")]
    Closed,
}

/// Result type for spill operations
pub type SpillResult<T> = Result<T, SpillError>;

/// Where and when spill structures move entries to disk
#[derive(Debug, Clone)]
pub struct SpillOptions {
    /// Entries kept in memory before spilling
    pub memory_threshold: usize,
    /// Directory for temp files (system default when `None`)
    pub temp_dir: Option<PathBuf>,
}

impl Default for SpillOptions {
    fn default() -> Self {
        SpillOptions {
            memory_threshold: 10_000,
            temp_dir: None,
        }
    }
}

fn create_temp(dir: Option<&Path>) -> io::Result<File> {
    match dir {
        Some(dir) => tempfile::tempfile_in(dir),
        None => tempfile::tempfile(),
    }
}

/// Append-only file of bincode records addressed by offset
struct SpillFile {
    file: File,
    len: u64,
    records: u64,
}

impl SpillFile {
    fn create(dir: Option<&Path>) -> SpillResult<Self> {
        Ok(SpillFile {
            file: create_temp(dir)?,
            len: 0,
            records: 0,
        })
    }

    /// Append one record, returning its `(offset, length)`
    fn append<T: Serialize>(&mut self, item: &T) -> SpillResult<(u64, u32)> {
        let bytes = bincode::serialize(item)?;
        let offset = self.len;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&bytes)?;
        self.len += bytes.len() as u64;
        self.records += 1;
        Ok((offset, bytes.len() as u32))
    }

    fn read_at<T: DeserializeOwned>(&mut self, offset: u64, len: u32) -> SpillResult<T> {
        let mut buf = vec![0u8; len as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(bincode::deserialize(&buf)?)
    }

    /// Visit every record in append order until `visit` returns true
    fn scan<T, F>(&mut self, mut visit: F) -> SpillResult<bool>
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> bool,
    {
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut self.file);
        for _ in 0..self.records {
            let item: T = bincode::deserialize_from(&mut reader)?;
            if visit(&item) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Sorted run written in one go and read back sequentially
struct RunFile {
    reader: BufReader<File>,
    remaining: u64,
}

impl RunFile {
    fn write<'a, T, I>(dir: Option<&Path>, entries: I) -> SpillResult<Self>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = (&'a T, &'a u64)>,
    {
        let mut writer = BufWriter::new(create_temp(dir)?);
        let mut count = 0u64;
        for entry in entries {
            bincode::serialize_into(&mut writer, &entry)?;
            count += 1;
        }
        let mut file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(RunFile {
            reader: BufReader::new(file),
            remaining: count,
        })
    }

    fn next_entry<T: DeserializeOwned>(&mut self) -> SpillResult<Option<(T, u64)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(bincode::deserialize_from(&mut self.reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spill_file_roundtrip_by_offset() {
        let mut file = SpillFile::create(None).unwrap();
        let (o1, l1) = file.append(&"first".to_string()).unwrap();
        let (o2, l2) = file.append(&"second".to_string()).unwrap();
        assert_eq!(file.read_at::<String>(o2, l2).unwrap(), "second");
        assert_eq!(file.read_at::<String>(o1, l1).unwrap(), "first");
    }

    #[test]
    fn test_spill_file_scan_stops_early() {
        let mut file = SpillFile::create(None).unwrap();
        for i in 0..5u32 {
            file.append(&i).unwrap();
        }
        let mut visited = Vec::new();
        let found = file
            .scan::<u32, _>(|i| {
                visited.push(*i);
                *i == 2
            })
            .unwrap();
        assert!(found);
        assert_eq!(visited, vec![0, 1, 2]);
    }

    #[test]
    fn test_run_file_sequential_read() {
        let entries = vec![(1u32, 2u64), (5, 1)];
        let mut run = RunFile::write(None, entries.iter().map(|(k, c)| (k, c))).unwrap();
        assert_eq!(run.next_entry::<u32>().unwrap(), Some((1, 2)));
        assert_eq!(run.next_entry::<u32>().unwrap(), Some((5, 1)));
        assert_eq!(run.next_entry::<u32>().unwrap(), None);
    }

    #[test]
    fn test_spill_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = SpillFile::create(Some(dir.path())).unwrap();
        file.append(&1u8).unwrap();
        assert_eq!(file.records, 1);
    }
}
