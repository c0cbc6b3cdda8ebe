//! Local file storage backend.
//!
//! One collection is one directory entry pair:
//!
//! ```text
//! <base_dir>/<collection>.lock   exclusive lock while started
//! <base_dir>/<collection>.log    append-only record log
//! ```
//!
//! `start` takes the lock and replays the log into an in-memory index;
//! every mutation is appended to the log before the index changes; `stop`
//! syncs the log and releases the lock. The log is compacted in place once
//! it grows past `max_log_size`.

mod codec;
mod lock;
mod log;

pub use lock::CollectionLock;
pub use log::{LogEntry, RecordLog};

use std::collections::BTreeMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::error::{CrudError, CrudResult, ValidationError};
use crate::filter::Filter;
use crate::model::{CrudModel, Patch, Record, RecordId};
use crate::storage::memory::lock_err;
use crate::storage::options::StorageOptions;
use crate::storage::traits::Storage;

/// Configuration for the local backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    /// Directory holding the collection files.
    pub base_dir: PathBuf,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
    /// Log size that triggers compaction (bytes).
    pub max_log_size: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data"),
            sync_on_write: true,
            max_log_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl LocalConfig {
    const MIN_LOG_SIZE: u64 = 4 * 1024; // below this compaction would run on nearly every write

    /// Option keys understood by [`LocalConfig::from_options`].
    pub const OPTIONS: [&'static str; 3] = ["base_dir", "sync_on_write", "max_log_size"];

    #[must_use]
    pub fn in_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Reads `base_dir`, `sync_on_write` and `max_log_size`; missing keys
    /// keep their defaults.
    ///
    /// # Errors
    ///
    /// Unknown keys, malformed values, or a config that fails [`validate`](Self::validate).
    pub fn from_options(options: &StorageOptions) -> Result<Self, ValidationError> {
        options.ensure_known(&Self::OPTIONS)?;
        let mut config = Self::default();
        if let Some(dir) = options.get_path("base_dir") {
            config.base_dir = dir;
        }
        if let Some(sync) = options.get_bool("sync_on_write")? {
            config.sync_on_write = sync;
        }
        if let Some(size) = options.get_u64("max_log_size")? {
            config.max_log_size = size;
        }
        config.validate()
    }

    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_log_size < Self::MIN_LOG_SIZE {
            return Err(ValidationError::InvalidOption {
                key: "max_log_size".to_string(),
                value: self.max_log_size.to_string(),
                reason: format!("must be at least {} bytes", Self::MIN_LOG_SIZE),
            });
        }
        if self.base_dir.as_os_str().is_empty() {
            return Err(ValidationError::InvalidOption {
                key: "base_dir".to_string(),
                value: String::new(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(self)
    }
}

struct OpenCollection<T> {
    _lock: CollectionLock,
    log: RecordLog,
    records: BTreeMap<RecordId, Record<T>>,
}

/// File-backed record store for one collection.
pub struct LocalStorage<T> {
    collection: String,
    config: LocalConfig,
    state: RwLock<Option<OpenCollection<T>>>,
    _model: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for LocalStorage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage")
            .field("collection", &self.collection)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: CrudModel> LocalStorage<T> {
    /// A stopped store for `T`'s collection under `config.base_dir`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the config is invalid.
    pub fn new(config: LocalConfig) -> CrudResult<Self> {
        Self::named(T::collection(), config)
    }

    pub fn named(collection: impl Into<String>, config: LocalConfig) -> CrudResult<Self> {
        let collection = collection.into();
        if collection.is_empty()
            || collection.contains(|c: char| c == '/' || c == '\\' || c == '.')
        {
            return Err(ValidationError::InvalidOption {
                key: "collection".to_string(),
                value: collection,
                reason: "must be a plain file name".to_string(),
            }
            .into());
        }
        Ok(Self {
            collection,
            config: config.validate()?,
            state: RwLock::new(None),
            _model: PhantomData,
        })
    }

    /// Builds a store from named options (see [`LocalConfig::OPTIONS`]).
    pub fn from_options(collection: impl Into<String>, options: &StorageOptions) -> CrudResult<Self> {
        Self::named(collection, LocalConfig::from_options(options)?)
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub const fn config(&self) -> &LocalConfig {
        &self.config
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.config.base_dir.join(format!("{}.log", self.collection))
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.config.base_dir.join(format!("{}.lock", self.collection))
    }

    /// Whether `start` has run without a matching `stop`.
    pub fn is_started(&self) -> CrudResult<bool> {
        Ok(self.state.read().map_err(|_| lock_err("local.is_started"))?.is_some())
    }

    /// Forces a compaction of the record log.
    pub fn compact(&self) -> CrudResult<()> {
        let mut guard = self.write_guard("local.compact")?;
        let open = self.opened_mut(&mut guard)?;
        self.compact_open(open)
    }

    fn read_guard(&self, context: &'static str) -> CrudResult<RwLockReadGuard<'_, Option<OpenCollection<T>>>> {
        self.state.read().map_err(|_| lock_err(context))
    }

    fn write_guard(&self, context: &'static str) -> CrudResult<RwLockWriteGuard<'_, Option<OpenCollection<T>>>> {
        self.state.write().map_err(|_| lock_err(context))
    }

    fn not_started(&self) -> CrudError {
        CrudError::unavailable(format!("collection '{}' is not started", self.collection))
    }

    fn opened<'a>(&self, state: &'a Option<OpenCollection<T>>) -> CrudResult<&'a OpenCollection<T>> {
        state.as_ref().ok_or_else(|| self.not_started())
    }

    fn opened_mut<'a>(
        &self,
        state: &'a mut Option<OpenCollection<T>>,
    ) -> CrudResult<&'a mut OpenCollection<T>> {
        state.as_mut().ok_or_else(|| self.not_started())
    }

    fn io_err(&self, action: &str, err: &std::io::Error) -> CrudError {
        CrudError::unavailable(format!("{action} for collection '{}': {err}", self.collection))
    }

    /// Logs `entry`, then applies it to the index, then compacts if due.
    fn commit(&self, open: &mut OpenCollection<T>, entry: LogEntry<T>) -> CrudResult<()> {
        open.log
            .append(&entry)
            .map_err(|e| self.io_err("failed to append to record log", &e))?;
        match entry {
            LogEntry::Upsert { record } => {
                open.records.insert(record.uid, record);
            }
            LogEntry::Delete { uid } => {
                open.records.remove(&uid);
            }
        }

        if open.log.size() > self.config.max_log_size {
            // The write above is already durable; a failed compaction only
            // means the log stays long until the next attempt.
            if let Err(e) = self.compact_open(open) {
                warn!(collection = %self.collection, error = %e, "record log compaction failed");
            }
        }
        Ok(())
    }

    fn compact_open(&self, open: &mut OpenCollection<T>) -> CrudResult<()> {
        let before = open.log.size();
        open.log
            .compact(open.records.values())
            .map_err(|e| self.io_err("failed to compact record log", &e))?;
        info!(
            collection = %self.collection,
            before,
            after = open.log.size(),
            records = open.records.len(),
            "record log compacted"
        );
        Ok(())
    }

    fn open_collection(&self) -> CrudResult<OpenCollection<T>> {
        let dir: &Path = &self.config.base_dir;
        fs::create_dir_all(dir).map_err(|e| self.io_err("failed to create base directory", &e))?;

        let lock = CollectionLock::acquire(&self.lock_path())
            .map_err(|e| self.io_err("failed to acquire lock", &e))?;

        let path = self.log_path();
        let replayed = log::replay::<T>(&path).map_err(|e| self.io_err("failed to replay record log", &e))?;
        let log = RecordLog::open(&path, replayed.valid_len, self.config.sync_on_write)
            .map_err(|e| self.io_err("failed to open record log", &e))?;

        info!(
            collection = %self.collection,
            path = %path.display(),
            entries = replayed.entries,
            records = replayed.records.len(),
            "local storage started"
        );

        Ok(OpenCollection {
            _lock: lock,
            log,
            records: replayed.records,
        })
    }
}

impl<T: CrudModel> Storage<T> for LocalStorage<T> {
    fn start(&self) -> CrudResult<()> {
        let mut guard = self.write_guard("local.start")?;
        if guard.is_some() {
            debug!(collection = %self.collection, "local storage already started");
            return Ok(());
        }
        *guard = Some(self.open_collection()?);
        Ok(())
    }

    fn stop(&self) -> CrudResult<()> {
        let mut guard = self.write_guard("local.stop")?;
        let Some(open) = guard.take() else {
            return Ok(());
        };
        let OpenCollection { _lock: lock, log, .. } = open;
        log.close().map_err(|e| self.io_err("failed to sync record log", &e))?;
        drop(lock);
        info!(collection = %self.collection, "local storage stopped");
        Ok(())
    }

    fn get(&self, id: RecordId) -> CrudResult<Record<T>> {
        let guard = self.read_guard("local.get")?;
        let open = self.opened(&guard)?;
        open.records.get(&id).cloned().ok_or(CrudError::NotFound { id })
    }

    fn get_many(&self, filter: &Filter) -> CrudResult<Vec<Record<T>>> {
        let guard = self.read_guard("local.get_many")?;
        let open = self.opened(&guard)?;
        let mut out = Vec::new();
        for record in open.records.values() {
            if filter.matches(&record.to_json()?) {
                out.push(record.clone());
            }
        }
        Ok(out)
    }

    fn create(&self, record: Record<T>) -> CrudResult<Record<T>> {
        let mut guard = self.write_guard("local.create")?;
        let open = self.opened_mut(&mut guard)?;
        if open.records.contains_key(&record.uid) {
            return Err(CrudError::Conflict { id: record.uid });
        }
        self.commit(open, LogEntry::Upsert { record: record.clone() })?;
        Ok(record)
    }

    fn put(&self, id: RecordId, record: Record<T>) -> CrudResult<Record<T>> {
        let mut guard = self.write_guard("local.put")?;
        let open = self.opened_mut(&mut guard)?;
        let replaced = open
            .records
            .get(&id)
            .ok_or(CrudError::NotFound { id })?
            .replaced_by(record);
        self.commit(open, LogEntry::Upsert { record: replaced.clone() })?;
        Ok(replaced)
    }

    fn patch(&self, id: RecordId, patch: Patch) -> CrudResult<Record<T>> {
        let mut guard = self.write_guard("local.patch")?;
        let open = self.opened_mut(&mut guard)?;
        let next = match open.records.get(&id) {
            Some(current) => current.merged(&patch)?,
            None => patch.into_record(id)?,
        };
        self.commit(open, LogEntry::Upsert { record: next.clone() })?;
        Ok(next)
    }

    fn delete(&self, id: RecordId) -> CrudResult<Record<T>> {
        let mut guard = self.write_guard("local.delete")?;
        let open = self.opened_mut(&mut guard)?;
        let removed = open
            .records
            .get(&id)
            .cloned()
            .ok_or(CrudError::NotFound { id })?;
        self.commit(open, LogEntry::Delete { uid: id })?;
        Ok(removed)
    }
}

impl<T> Drop for LocalStorage<T> {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(open) = state.take() {
                if let Err(e) = open.log.close() {
                    warn!(collection = %self.collection, error = %e, "failed to sync record log on drop");
                }
            }
        }
    }
}
