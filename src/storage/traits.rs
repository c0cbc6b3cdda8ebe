//! Abstract storage traits.
//!
//! A backend implements either [`Storage`] (blocking calls) or
//! [`AsyncStorage`] (suspension-aware calls). The dispatcher only speaks
//! `AsyncStorage`; [`Blocking`] lifts a `Storage` into it.
//!
//! Backends own persistence, identifier uniqueness, timestamp stamping and
//! filter evaluation. Every error they return reaches the caller unchanged.

use async_trait::async_trait;

use crate::error::CrudResult;
use crate::filter::{Filter, FilterOp};
use crate::model::{CrudModel, Patch, Record, RecordId};

/// Blocking storage backend for one collection of `T` records.
///
/// # Safety Considerations
/// - All mutations should be atomic per record
/// - Implementations should handle concurrent access safely
pub trait Storage<T: CrudModel>: Send + Sync {
    /// Acquire backend resources (open files, connections). Idempotent.
    fn start(&self) -> CrudResult<()>;

    /// Release backend resources. Idempotent.
    fn stop(&self) -> CrudResult<()>;

    /// Get a record by ID. Returns `NotFound` if absent.
    fn get(&self, id: RecordId) -> CrudResult<Record<T>>;

    /// All records matching `filter`, in backend-defined order.
    ///
    /// The dispatcher only calls this with operators for which `supports`
    /// returns true and answers the rest with `InvalidOperator` itself.
    fn get_many(&self, filter: &Filter) -> CrudResult<Vec<Record<T>>>;

    /// Insert a new record. Returns `Conflict` if the ID already exists.
    fn create(&self, record: Record<T>) -> CrudResult<Record<T>>;

    /// Replace the record at `id`. Returns `NotFound` if absent.
    fn put(&self, id: RecordId, record: Record<T>) -> CrudResult<Record<T>>;

    /// Merge `patch` into the record at `id`, or create it there if absent.
    fn patch(&self, id: RecordId, patch: Patch) -> CrudResult<Record<T>>;

    /// Remove and return the record at `id`. Returns `NotFound` if absent.
    fn delete(&self, id: RecordId) -> CrudResult<Record<T>>;

    /// Whether `get_many` understands `op`. Defaults to every operator.
    fn supports(&self, op: FilterOp) -> bool {
        let _ = op;
        true
    }
}

/// Suspension-aware storage backend for one collection of `T` records.
///
/// Same contract as [`Storage`]; calls may yield at I/O boundaries.
#[async_trait]
pub trait AsyncStorage<T: CrudModel>: Send + Sync {
    async fn start(&self) -> CrudResult<()>;

    async fn stop(&self) -> CrudResult<()>;

    async fn get(&self, id: RecordId) -> CrudResult<Record<T>>;

    async fn get_many(&self, filter: &Filter) -> CrudResult<Vec<Record<T>>>;

    async fn create(&self, record: Record<T>) -> CrudResult<Record<T>>;

    async fn put(&self, id: RecordId, record: Record<T>) -> CrudResult<Record<T>>;

    async fn patch(&self, id: RecordId, patch: Patch) -> CrudResult<Record<T>>;

    async fn delete(&self, id: RecordId) -> CrudResult<Record<T>>;

    fn supports(&self, op: FilterOp) -> bool {
        let _ = op;
        true
    }
}

/// Runs a blocking [`Storage`] behind the [`AsyncStorage`] contract.
///
/// Each call completes inline without yielding, so it serializes with
/// other work on the same executor thread for its duration.
#[derive(Debug, Default)]
pub struct Blocking<S>(S);

impl<S> Blocking<S> {
    #[must_use]
    pub const fn new(storage: S) -> Self {
        Self(storage)
    }

    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> S {
        self.0
    }
}

#[async_trait]
impl<T, S> AsyncStorage<T> for Blocking<S>
where
    T: CrudModel,
    S: Storage<T>,
{
    async fn start(&self) -> CrudResult<()> {
        self.0.start()
    }

    async fn stop(&self) -> CrudResult<()> {
        self.0.stop()
    }

    async fn get(&self, id: RecordId) -> CrudResult<Record<T>> {
        self.0.get(id)
    }

    async fn get_many(&self, filter: &Filter) -> CrudResult<Vec<Record<T>>> {
        self.0.get_many(filter)
    }

    async fn create(&self, record: Record<T>) -> CrudResult<Record<T>> {
        self.0.create(record)
    }

    async fn put(&self, id: RecordId, record: Record<T>) -> CrudResult<Record<T>> {
        self.0.put(id, record)
    }

    async fn patch(&self, id: RecordId, patch: Patch) -> CrudResult<Record<T>> {
        self.0.patch(id, patch)
    }

    async fn delete(&self, id: RecordId) -> CrudResult<Record<T>> {
        self.0.delete(id)
    }

    fn supports(&self, op: FilterOp) -> bool {
        self.0.supports(op)
    }
}
