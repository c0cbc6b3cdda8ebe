//! Append-only record log.
//!
//! Every mutation of a collection is appended as one framed [`LogEntry`]
//! before it becomes visible. Replaying the log from the start rebuilds
//! the collection. A torn or corrupt tail (crash mid-write) ends replay and
//! is cut off before new entries are appended.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: framed LogEntry]
//! [ENTRY 2: framed LogEntry]
//! ...
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{CrudModel, Record, RecordId};

use super::codec;

/// One logged mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
#[serde(bound(serialize = "T: CrudModel", deserialize = "T: CrudModel"))]
pub enum LogEntry<T> {
    /// The full record after a create, put, or patch.
    Upsert { record: Record<T> },
    Delete { uid: RecordId },
}

/// State rebuilt from a log file.
#[derive(Debug)]
pub struct Replayed<T> {
    pub records: BTreeMap<RecordId, Record<T>>,
    /// Entries applied.
    pub entries: u64,
    /// Byte offset just past the last valid entry.
    pub valid_len: u64,
}

/// Replays `path` into an index. A missing or empty file replays as empty.
///
/// # Errors
///
/// Fails if the file cannot be read or its header is not a record log.
pub fn replay<T: CrudModel>(path: &Path) -> IoResult<Replayed<T>> {
    let mut replayed = Replayed {
        records: BTreeMap::new(),
        entries: 0,
        valid_len: 0,
    };

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(replayed),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    if file_len < codec::HEADER_LEN {
        return Ok(replayed);
    }

    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;
    replayed.valid_len = codec::HEADER_LEN;

    while replayed.valid_len < file_len {
        match codec::decode::<LogEntry<T>>(&mut reader) {
            Ok(entry) => {
                match entry {
                    LogEntry::Upsert { record } => {
                        replayed.records.insert(record.uid, record);
                    }
                    LogEntry::Delete { uid } => {
                        replayed.records.remove(&uid);
                    }
                }
                replayed.entries += 1;
                // Frame boundaries are only known after a successful decode.
                replayed.valid_len = reader.stream_position()?;
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    offset = replayed.valid_len,
                    error = %e,
                    "record log has a damaged tail; discarding it"
                );
                break;
            }
        }
    }

    Ok(replayed)
}

/// Writable handle on a record log.
///
/// `size` always equals the length of the committed prefix of the file. A
/// failed append is cut back to that length before the error is returned;
/// if even that fails the log refuses further writes.
#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    writer: BufWriter<File>,
    sync_on_write: bool,
    size: u64,
    poisoned: bool,
}

impl RecordLog {
    /// Opens `path` for appending, keeping only its first `valid_len` bytes.
    ///
    /// A log shorter than its header is recreated with a fresh header.
    pub fn open(path: &Path, valid_len: u64, sync_on_write: bool) -> IoResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = if valid_len < codec::HEADER_LEN {
            file.set_len(0)?;
            codec::write_header(&mut file)?;
            codec::HEADER_LEN
        } else {
            if file.metadata()?.len() > valid_len {
                file.set_len(valid_len)?;
            }
            valid_len
        };
        file.sync_all()?;
        drop(file);

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            sync_on_write,
            size,
            poisoned: false,
        })
    }

    /// Appends one entry and makes it durable per `sync_on_write`.
    ///
    /// On error nothing of the entry remains in the file or the buffer.
    pub fn append<T: CrudModel>(&mut self, entry: &LogEntry<T>) -> IoResult<()> {
        if self.poisoned {
            return Err(IoError::other(format!(
                "record log {} is unusable after a failed rollback",
                self.path.display()
            )));
        }
        let encoded = codec::encode(entry)?;
        if let Err(e) = self.write_frame(&encoded) {
            self.rollback();
            return Err(e);
        }
        self.size += encoded.len() as u64;
        Ok(())
    }

    fn write_frame(&mut self, encoded: &[u8]) -> IoResult<()> {
        self.writer.write_all(encoded)?;
        self.writer.flush()?;
        if self.sync_on_write {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Drops buffered bytes of a failed frame and truncates the file to the
    /// committed size.
    fn rollback(&mut self) {
        let restored = OpenOptions::new().append(true).open(&self.path).and_then(|file| {
            // into_parts hands back the buffer instead of flushing it on drop.
            let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
            let (_old, _unwritten) = stale.into_parts();
            let file = self.writer.get_ref();
            file.set_len(self.size)?;
            file.sync_all()
        });
        if let Err(e) = restored {
            warn!(path = %self.path.display(), error = %e, "record log rollback failed; refusing further writes");
            self.poisoned = true;
        }
    }

    /// Current file size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a failed rollback has disabled further appends.
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Rewrites the log so it holds exactly one upsert per live record.
    ///
    /// The new log is written and opened beside the old one, then renamed
    /// over it. Any failure before the rename leaves the old log and its
    /// handle in use.
    pub fn compact<'a, T, I>(&mut self, records: I) -> IoResult<()>
    where
        T: CrudModel,
        I: IntoIterator<Item = &'a Record<T>>,
    {
        self.writer.flush()?;

        let tmp_path = self.path.with_extension("log.compact");
        let written = Self::write_snapshot(&tmp_path, records).and_then(|size| {
            let handle = OpenOptions::new().append(true).open(&tmp_path)?;
            fs::rename(&tmp_path, &self.path)?;
            Ok((size, handle))
        });
        let (size, handle) = match written {
            Ok(done) => done,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        // The handle was opened on the new inode, so it follows the rename.
        self.writer = BufWriter::new(handle);
        self.size = size;
        sync_parent_dir(&self.path)
    }

    fn write_snapshot<'a, T, I>(tmp_path: &Path, records: I) -> IoResult<u64>
    where
        T: CrudModel,
        I: IntoIterator<Item = &'a Record<T>>,
    {
        let mut size = codec::HEADER_LEN;
        let mut tmp = BufWriter::new(File::create(tmp_path)?);
        codec::write_header(&mut tmp)?;
        for record in records {
            let encoded = codec::encode(&LogEntry::Upsert {
                record: record.clone(),
            })?;
            tmp.write_all(&encoded)?;
            size += encoded.len() as u64;
        }
        tmp.flush()?;
        tmp.get_ref().sync_all()?;
        Ok(size)
    }

    /// Flushes buffered bytes and syncs the file.
    pub fn close(mut self) -> IoResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

/// Makes a rename in `path`'s directory durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> IoResult<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> IoResult<()> {
    Ok(())
}
