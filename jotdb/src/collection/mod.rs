//! Document collections.
//!
//! A [`Collection`] is a named partition of a database: it maps object
//! identifiers to documents through its own record store and owns the set
//! of secondary indexes defined on it. Index maintenance is synchronous
//! with every mutation, so a completed `save` or `remove` leaves store
//! and indexes consistent.
//!
//! Access follows the per-collection locking discipline: queries and
//! loads share a read lock; save, remove and index-structure changes take
//! the write lock. Writers on unrelated collections never contend.

mod options;

pub use options::CollectionOptions;

use crate::codec;
use crate::common::DOC_ID;
use crate::document::{Document, Oid, Value};
use crate::errors::{ErrorKind, JotError, JotResult};
use crate::index::{FieldIndex, IndexDescriptor, IndexOptions};
use crate::query::{Query, QueryOutcome, ResultSet};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::sync::Arc;

type MetaChangeHook = Arc<dyn Fn() -> JotResult<()> + Send + Sync>;

/// A named collection of documents.
///
/// Cloning is cheap and shares the underlying state; all clones see the
/// same records and indexes.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    name: String,
    store: crate::store::RecordStore,
    options: CollectionOptions,
    read_only: bool,
    indexes: RwLock<HashMap<String, FieldIndex>>,
    /// Per-collection reader/writer lock.
    lock: RwLock<()>,
    /// Invoked after an index-definition change so the database can
    /// persist its catalog. Set by the owning database.
    on_meta_change: RwLock<Option<MetaChangeHook>>,
}

impl Collection {
    pub(crate) fn new(
        name: &str,
        store: crate::store::RecordStore,
        options: CollectionOptions,
        read_only: bool,
    ) -> Collection {
        Collection {
            inner: Arc::new(CollectionInner {
                name: name.to_string(),
                store,
                options,
                read_only,
                indexes: RwLock::new(HashMap::new()),
                lock: RwLock::new(()),
                on_meta_change: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> CollectionOptions {
        self.inner.options
    }

    /// Number of documents currently stored.
    pub fn size(&self) -> u64 {
        self.inner.store.len()
    }

    /// Saves a document.
    ///
    /// A document without an `_id` is inserted and assigned a fresh
    /// identifier by the record store; a document carrying an `_id` is an
    /// update of that record (`NotFound` if no such record exists). The
    /// stored bytes never include `_id` itself; the identifier is
    /// reattached when a document is materialised.
    ///
    /// Unique-index conflicts are checked before the record write, so a
    /// constraint violation leaves both store and indexes untouched. If
    /// index maintenance fails after the record write, the write is
    /// rolled back and the failure reported.
    pub fn save(&self, document: Document) -> JotResult<Oid> {
        self.check_writable()?;
        let _guard = self.inner.lock.write();

        let mut document = document;
        let existing = document.oid();
        document.remove(DOC_ID);
        let bytes = codec::encode(&document)?;
        let indexes = self.index_snapshot();

        match existing {
            None => self.insert_new(&document, &bytes, &indexes),
            Some(oid) => self.update_existing(&oid, &document, &bytes, &indexes),
        }
    }

    fn insert_new(
        &self,
        document: &Document,
        bytes: &[u8],
        indexes: &[FieldIndex],
    ) -> JotResult<Oid> {
        for index in indexes {
            index.check_unique(&document.get(index.field_path()), None)?;
        }

        let oid = self.inner.store.insert(bytes)?;

        let mut applied: Vec<(&FieldIndex, Value)> = Vec::new();
        for index in indexes {
            let value = document.get(index.field_path());
            if let Err(e) = index.insert_entry(&value, &oid) {
                for (done, done_value) in &applied {
                    done.remove_entry(done_value, &oid);
                }
                let rollback = self.inner.store.remove(&oid);
                return Err(wrap_index_failure(e, rollback));
            }
            applied.push((index, value));
        }
        Ok(oid)
    }

    fn update_existing(
        &self,
        oid: &Oid,
        document: &Document,
        bytes: &[u8],
        indexes: &[FieldIndex],
    ) -> JotResult<Oid> {
        let old_bytes = self.inner.store.fetch(oid)?;

        for index in indexes {
            index.check_unique(&document.get(index.field_path()), Some(oid))?;
        }

        self.inner.store.update(oid, bytes)?;

        let mut applied: Vec<(&FieldIndex, Value, Value)> = Vec::new();
        for index in indexes {
            let old_value = codec::extract(&old_bytes, index.field_path())?.unwrap_or(Value::Null);
            let new_value = document.get(index.field_path());
            if old_value == new_value {
                continue;
            }
            index.remove_entry(&old_value, oid);
            if let Err(e) = index.insert_entry(&new_value, oid) {
                // undo this index and every previously touched one, then
                // restore the record bytes
                index.insert_entry(&old_value, oid).ok();
                for (done, done_old, done_new) in &applied {
                    done.remove_entry(done_new, oid);
                    done.insert_entry(done_old, oid).ok();
                }
                let rollback = self.inner.store.update(oid, &old_bytes);
                return Err(wrap_index_failure(e, rollback));
            }
            applied.push((index, old_value, new_value));
        }
        Ok(*oid)
    }

    /// Loads the document stored at `oid`.
    pub fn load(&self, oid: &Oid) -> JotResult<Document> {
        let _guard = self.inner.lock.read();
        self.load_locked(oid)
    }

    pub(crate) fn load_locked(&self, oid: &Oid) -> JotResult<Document> {
        let bytes = self.inner.store.fetch(oid)?;
        let mut document = codec::decode(&bytes)?;
        document.set_oid(*oid);
        Ok(document)
    }

    /// Loads the encoded form of the document at `oid`, with its `_id`
    /// reattached. This is what crosses the handle facade.
    pub fn load_raw(&self, oid: &Oid) -> JotResult<Vec<u8>> {
        codec::encode(&self.load(oid)?)
    }

    /// Removes the document at `oid` and all of its index entries.
    pub fn remove(&self, oid: &Oid) -> JotResult<()> {
        self.check_writable()?;
        let _guard = self.inner.lock.write();

        let old_bytes = self.inner.store.fetch(oid)?;
        for index in self.index_snapshot() {
            if let Some(value) = codec::extract(&old_bytes, index.field_path())? {
                index.remove_entry(&value, oid);
            }
        }
        self.inner.store.remove(oid)
    }

    /// Ensures an index exists on `field_path` with the given options.
    ///
    /// Re-issuing an identical definition is a no-op; a conflicting
    /// definition on the same path is `IndexExists`. The index is built
    /// by scanning existing records; a unique violation among them fails
    /// the build and leaves the collection without the index.
    pub fn ensure_index(&self, field_path: &str, options: IndexOptions) -> JotResult<()> {
        self.check_writable()?;
        if field_path.is_empty() {
            return Err(JotError::new(
                "Index field path must not be empty",
                ErrorKind::InvalidArgument,
            ));
        }
        let _guard = self.inner.lock.write();

        {
            let indexes = self.inner.indexes.read();
            if let Some(existing) = indexes.get(field_path) {
                if existing.options() == options {
                    return Ok(());
                }
                log::error!(
                    "Collection {} already has a conflicting {}",
                    self.inner.name,
                    existing.descriptor()
                );
                return Err(JotError::new(
                    &format!(
                        "Collection {} already has a conflicting {}",
                        self.inner.name,
                        existing.descriptor()
                    ),
                    ErrorKind::IndexExists,
                ));
            }
        }

        let index = FieldIndex::new(field_path, options);
        self.inner.store.scan(|oid, bytes| {
            if let Some(value) = codec::extract(&bytes, field_path)? {
                index.insert_entry(&value, oid)?;
            }
            Ok(())
        })?;

        self.inner
            .indexes
            .write()
            .insert(field_path.to_string(), index);
        self.notify_meta_change()
    }

    /// Rebuilds a catalogued index from the record store. Unlike
    /// [`ensure_index`](Collection::ensure_index) this works on a
    /// read-only collection and does not report a metadata change.
    pub(crate) fn rebuild_index(&self, field_path: &str, options: IndexOptions) -> JotResult<()> {
        let _guard = self.inner.lock.write();
        let index = FieldIndex::new(field_path, options);
        self.inner.store.scan(|oid, bytes| {
            if let Some(value) = codec::extract(&bytes, field_path)? {
                index.insert_entry(&value, oid)?;
            }
            Ok(())
        })?;
        self.inner
            .indexes
            .write()
            .insert(field_path.to_string(), index);
        Ok(())
    }

    /// Drops the index on `field_path`.
    pub fn drop_index(&self, field_path: &str) -> JotResult<()> {
        self.check_writable()?;
        let _guard = self.inner.lock.write();
        let removed = self.inner.indexes.write().remove(field_path);
        match removed {
            Some(_) => self.notify_meta_change(),
            None => Err(JotError::new(
                &format!(
                    "Collection {} has no index on {}",
                    self.inner.name, field_path
                ),
                ErrorKind::NotFound,
            )),
        }
    }

    /// Definitions of all indexes on this collection.
    pub fn list_indexes(&self) -> Vec<IndexDescriptor> {
        self.inner
            .indexes
            .read()
            .values()
            .map(|index| index.descriptor().clone())
            .collect()
    }

    /// Executes a query against this collection.
    pub fn execute(&self, query: &Query, flags: u32) -> JotResult<QueryOutcome> {
        crate::query::execute(self, query, flags)
    }

    /// Convenience wrapper: executes with no flags and returns the
    /// result set.
    pub fn find(&self, query: &Query) -> JotResult<ResultSet> {
        let outcome = self.execute(query, 0)?;
        outcome.into_result_set()
    }

    /// Forces pending writes of this collection to stable storage.
    pub fn sync(&self) -> JotResult<()> {
        self.inner.store.sync()
    }

    pub(crate) fn store(&self) -> &crate::store::RecordStore {
        &self.inner.store
    }

    pub(crate) fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.lock.read()
    }

    pub(crate) fn index_for(&self, field_path: &str) -> Option<FieldIndex> {
        self.inner.indexes.read().get(field_path).cloned()
    }

    pub(crate) fn index_snapshot(&self) -> Vec<FieldIndex> {
        self.inner.indexes.read().values().cloned().collect()
    }

    pub(crate) fn attach_index(&self, index: FieldIndex) {
        self.inner
            .indexes
            .write()
            .insert(index.field_path().to_string(), index);
    }

    pub(crate) fn set_meta_change_hook(&self, hook: MetaChangeHook) {
        *self.inner.on_meta_change.write() = Some(hook);
    }

    fn notify_meta_change(&self) -> JotResult<()> {
        let hook = self.inner.on_meta_change.read().clone();
        match hook {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    fn check_writable(&self) -> JotResult<()> {
        if self.inner.read_only {
            log::error!("Collection {} is read-only", self.inner.name);
            return Err(JotError::new(
                &format!("Collection {} is read-only", self.inner.name),
                ErrorKind::ReadOnly,
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("read_only", &self.inner.read_only)
            .finish()
    }
}

fn wrap_index_failure(error: JotError, rollback: JotResult<()>) -> JotError {
    match rollback {
        Ok(()) => JotError::new_with_cause(
            "Index maintenance failed; record write rolled back",
            error.kind().clone(),
            error,
        ),
        Err(rollback_err) => {
            // the record and its indexes now disagree; report it loudly
            // so the caller can rebuild
            log::error!(
                "Index maintenance failed and rollback failed: {}",
                rollback_err
            );
            JotError::new_with_cause(
                "Index maintenance failed and the record write could not be rolled back; \
                 indexes for this collection should be rebuilt",
                ErrorKind::Internal,
                error,
            )
        }
    }
}
