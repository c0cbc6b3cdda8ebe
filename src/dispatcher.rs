//! Generic CRUD dispatcher.
//!
//! [`Dispatcher`] maps the CRUD verbs onto an [`AsyncStorage`] backend. It
//! validates incoming records against the model, forwards, and iterates
//! for the bulk variants. Persistence, uniqueness, timestamps and filter
//! evaluation are the backend's job, and backend errors are returned
//! unchanged.
//!
//! Bulk operations run one item at a time in input order. The first error
//! stops the batch; items already applied stay applied.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::error::{CrudError, CrudResult};
use crate::filter::Filter;
use crate::model::{CrudModel, Patch, Record, RecordId};
use crate::storage::{AsyncStorage, Blocking, Storage};

/// CRUD front-end over one collection of `T` records.
///
/// # Examples
///
/// ```
/// use fastcrud::{Dispatcher, Document, MemoryStorage, Record};
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let crud = Dispatcher::blocking(MemoryStorage::<Document>::new());
/// let created = crud.create(Record::new(Document::new().with("name", "a"))).await?;
/// assert_eq!(crud.get(created.uid).await?.data.get("name").unwrap(), "a");
/// # Ok::<(), fastcrud::CrudError>(())
/// # }).unwrap();
/// ```
pub struct Dispatcher<T, S> {
    storage: Arc<S>,
    _model: PhantomData<fn() -> T>,
}

impl<T, S> Clone for Dispatcher<T, S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            _model: PhantomData,
        }
    }
}

impl<T, S> fmt::Debug for Dispatcher<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("model", &std::any::type_name::<T>())
            .field("storage", &std::any::type_name::<S>())
            .finish()
    }
}

impl<T: CrudModel, B: Storage<T>> Dispatcher<T, Blocking<B>> {
    /// Wraps a blocking backend; its calls complete without yielding.
    #[must_use]
    pub fn blocking(storage: B) -> Self {
        Self::new(Arc::new(Blocking::new(storage)))
    }
}

impl<T, S> Dispatcher<T, S>
where
    T: CrudModel,
    S: AsyncStorage<T>,
{
    /// Creates a dispatcher over a shared backend.
    #[must_use]
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            _model: PhantomData,
        }
    }

    #[must_use]
    pub const fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Acquire backend resources. Call once before serving requests.
    pub async fn start(&self) -> CrudResult<()> {
        debug!(model = T::NAME, "start");
        self.storage.start().await
    }

    /// Release backend resources. Call once after the last request.
    pub async fn stop(&self) -> CrudResult<()> {
        debug!(model = T::NAME, "stop");
        self.storage.stop().await
    }

    /// Fetch one record. Fails with `NotFound` if absent.
    pub async fn get(&self, id: RecordId) -> CrudResult<Record<T>> {
        debug!(model = T::NAME, %id, "get");
        self.storage.get(id).await
    }

    /// Records whose `filter.field` compares to `filter.value` under `filter.op`.
    ///
    /// Empty when nothing matches; `InvalidOperator`, without calling the
    /// backend, if the backend does not support the operator.
    pub async fn get_many(&self, filter: &Filter) -> CrudResult<Vec<Record<T>>> {
        debug!(model = T::NAME, field = %filter.field, op = %filter.op, "get_many");
        if !self.storage.supports(filter.op) {
            return Err(CrudError::invalid_operator(filter.op.as_str()));
        }
        self.storage.get_many(filter).await
    }

    /// Store a new record. Fails with `Conflict` if its `uid` is taken.
    pub async fn create(&self, record: Record<T>) -> CrudResult<Record<T>> {
        debug!(model = T::NAME, id = %record.uid, "create");
        record.validate()?;
        self.storage.create(record).await
    }

    pub async fn create_many(&self, records: Vec<Record<T>>) -> CrudResult<Vec<Record<T>>> {
        debug!(model = T::NAME, count = records.len(), "create_many");
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.create(record).await?);
        }
        Ok(out)
    }

    /// Replace the record at `id`. Fails with `NotFound` if absent.
    pub async fn put(&self, id: RecordId, record: Record<T>) -> CrudResult<Record<T>> {
        debug!(model = T::NAME, %id, "put");
        record.validate()?;
        self.storage.put(id, record).await
    }

    /// `put` each record at its own `uid`.
    pub async fn put_many(&self, records: Vec<Record<T>>) -> CrudResult<Vec<Record<T>>> {
        debug!(model = T::NAME, count = records.len(), "put_many");
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.put(record.uid, record).await?);
        }
        Ok(out)
    }

    /// Merge `patch` into the record at `id`, creating it there if absent.
    pub async fn patch(&self, id: RecordId, patch: Patch) -> CrudResult<Record<T>> {
        debug!(model = T::NAME, %id, fields = patch.len(), "patch");
        self.storage.patch(id, patch).await
    }

    /// `patch` each item at the `uid` it carries, or at a fresh id if it has none.
    pub async fn patch_many(&self, patches: Vec<Patch>) -> CrudResult<Vec<Record<T>>> {
        debug!(model = T::NAME, count = patches.len(), "patch_many");
        let mut out = Vec::with_capacity(patches.len());
        for patch in patches {
            let id = patch.uid()?.unwrap_or_default();
            out.push(self.patch(id, patch).await?);
        }
        Ok(out)
    }

    /// Remove the record at `id`, returning it. Fails with `NotFound` if absent.
    pub async fn delete(&self, id: RecordId) -> CrudResult<Record<T>> {
        debug!(model = T::NAME, %id, "delete");
        self.storage.delete(id).await
    }

    pub async fn delete_many(&self, ids: Vec<RecordId>) -> CrudResult<Vec<Record<T>>> {
        debug!(model = T::NAME, count = ids.len(), "delete_many");
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.delete(id).await?);
        }
        Ok(out)
    }
}
