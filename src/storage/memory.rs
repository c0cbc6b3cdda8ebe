//! In-memory storage backend.
//!
//! Thread-safe, process-local, and gone when dropped. Intended for
//! embedded usage, tests, and as a reference implementation of
//! [`Storage`].

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::error::{CrudError, CrudResult};
use crate::filter::Filter;
use crate::model::{CrudModel, Patch, Record, RecordId};
use crate::storage::options::StorageOptions;
use crate::storage::traits::Storage;

pub(crate) fn lock_err(context: &'static str) -> CrudError {
    CrudError::unavailable(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory record store.
///
/// Records are kept in identifier order, which for UUID v7 is creation
/// order, so `get_many` results are stable.
#[derive(Debug)]
pub struct MemoryStorage<T> {
    collection: String,
    records: RwLock<BTreeMap<RecordId, Record<T>>>,
    _model: PhantomData<fn() -> T>,
}

impl<T: CrudModel> Default for MemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CrudModel> MemoryStorage<T> {
    /// Create a new empty store named after the model.
    #[must_use]
    pub fn new() -> Self {
        Self::named(T::collection())
    }

    #[must_use]
    pub fn named(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            records: RwLock::new(BTreeMap::new()),
            _model: PhantomData,
        }
    }

    /// Builds a store from named options. The memory backend takes none.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for any option key.
    pub fn from_options(collection: impl Into<String>, options: &StorageOptions) -> CrudResult<Self> {
        options.ensure_known(&[])?;
        Ok(Self::named(collection))
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of stored records.
    pub fn len(&self) -> CrudResult<usize> {
        Ok(self.records.read().map_err(|_| lock_err("memory.len"))?.len())
    }

    pub fn is_empty(&self) -> CrudResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl<T: CrudModel> Storage<T> for MemoryStorage<T> {
    fn start(&self) -> CrudResult<()> {
        info!(collection = %self.collection, "memory storage started");
        Ok(())
    }

    fn stop(&self) -> CrudResult<()> {
        info!(collection = %self.collection, "memory storage stopped");
        Ok(())
    }

    fn get(&self, id: RecordId) -> CrudResult<Record<T>> {
        let records = self.records.read().map_err(|_| lock_err("memory.get"))?;
        records.get(&id).cloned().ok_or(CrudError::NotFound { id })
    }

    fn get_many(&self, filter: &Filter) -> CrudResult<Vec<Record<T>>> {
        let records = self.records.read().map_err(|_| lock_err("memory.get_many"))?;
        let mut out = Vec::new();
        for record in records.values() {
            if filter.matches(&record.to_json()?) {
                out.push(record.clone());
            }
        }
        debug!(collection = %self.collection, matched = out.len(), "memory get_many");
        Ok(out)
    }

    fn create(&self, record: Record<T>) -> CrudResult<Record<T>> {
        let mut records = self.records.write().map_err(|_| lock_err("memory.create"))?;
        if records.contains_key(&record.uid) {
            return Err(CrudError::Conflict { id: record.uid });
        }
        records.insert(record.uid, record.clone());
        Ok(record)
    }

    fn put(&self, id: RecordId, record: Record<T>) -> CrudResult<Record<T>> {
        let mut records = self.records.write().map_err(|_| lock_err("memory.put"))?;
        let current = records.get(&id).ok_or(CrudError::NotFound { id })?;
        let replaced = current.replaced_by(record);
        records.insert(id, replaced.clone());
        Ok(replaced)
    }

    fn patch(&self, id: RecordId, patch: Patch) -> CrudResult<Record<T>> {
        let mut records = self.records.write().map_err(|_| lock_err("memory.patch"))?;
        let next = match records.get(&id) {
            Some(current) => current.merged(&patch)?,
            None => patch.into_record(id)?,
        };
        records.insert(id, next.clone());
        Ok(next)
    }

    fn delete(&self, id: RecordId) -> CrudResult<Record<T>> {
        let mut records = self.records.write().map_err(|_| lock_err("memory.delete"))?;
        records.remove(&id).ok_or(CrudError::NotFound { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use crate::model::Document;

    fn doc(name: &str) -> Record<Document> {
        Record::new(Document::new().with("name", name))
    }

    #[test]
    fn test_create_get_delete() {
        let store = MemoryStorage::<Document>::new();
        let created = store.create(doc("a")).unwrap();
        assert_eq!(store.get(created.uid).unwrap(), created);

        let removed = store.delete(created.uid).unwrap();
        assert_eq!(removed.uid, created.uid);
        assert!(store.get(created.uid).unwrap_err().is_not_found());
        assert!(store.delete(created.uid).unwrap_err().is_not_found());
    }

    #[test]
    fn test_create_duplicate_id_conflicts() {
        let store = MemoryStorage::<Document>::new();
        let record = doc("a");
        store.create(record.clone()).unwrap();
        assert!(store.create(record).unwrap_err().is_conflict());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_put_requires_existing() {
        let store = MemoryStorage::<Document>::new();
        let err = store.put(RecordId::new(), doc("a")).unwrap_err();
        assert!(err.is_not_found());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_put_forces_target_id() {
        let store = MemoryStorage::<Document>::new();
        let created = store.create(doc("a")).unwrap();
        let replaced = store.put(created.uid, doc("b")).unwrap();
        assert_eq!(replaced.uid, created.uid);
        assert_eq!(replaced.created_on, created.created_on);
        assert_eq!(store.get(created.uid).unwrap().data.get("name"), Some(&serde_json::json!("b")));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_patch_upserts() {
        let store = MemoryStorage::<Document>::new();
        let id = RecordId::new();
        let created = store.patch(id, Patch::new().set("name", "a")).unwrap();
        assert_eq!(created.uid, id);

        let updated = store.patch(id, Patch::new().set("n", 2)).unwrap();
        assert_eq!(updated.data.get("name"), Some(&serde_json::json!("a")));
        assert_eq!(updated.data.get("n"), Some(&serde_json::json!(2)));
        assert!(updated.modify_on > created.modify_on);
    }

    #[test]
    fn test_get_many_in_creation_order() {
        let store = MemoryStorage::<Document>::new();
        let first = store.create(doc("a")).unwrap();
        store.create(doc("b")).unwrap();
        let third = store.create(doc("a")).unwrap();

        let found = store.get_many(&Filter::eq("name", "a")).unwrap();
        let ids: Vec<_> = found.iter().map(|r| r.uid).collect();
        assert_eq!(ids, vec![first.uid, third.uid]);

        let none = store.get_many(&Filter::new("name", "z", FilterOp::Eq)).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_from_options_rejects_keys() {
        let opts = StorageOptions::new().with("base_dir", "/tmp");
        assert!(MemoryStorage::<Document>::from_options("docs", &opts).is_err());
        let store = MemoryStorage::<Document>::from_options("docs", &StorageOptions::new()).unwrap();
        assert_eq!(store.collection(), "docs");
    }
}
