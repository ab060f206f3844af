//! The database: a directory of collection record stores plus a
//! catalog describing them.
//!
//! A database owns one directory. Each collection lives in its own
//! record-store file (`<name>.jdc`); the catalog file records every
//! collection together with its options and index definitions, and is
//! rewritten whenever either changes. On open the catalog is read back,
//! the stores are reopened and every listed index is rebuilt from its
//! store.
//!
//! A writable database holds an exclusive advisory lock on a lock file
//! inside the directory for its whole lifetime; read-only opens share
//! the lock. A second writer sees `Locked` instead of a corrupted
//! directory.
//!
//! # Examples
//!
//! ```rust,ignore
//! use jotdb::{doc, Database, Query, open_mode};
//!
//! let db = Database::open("/var/lib/app/db", open_mode::WRITE | open_mode::CREATE)?;
//! let people = db.collection("people", CollectionOptions::default())?;
//! people.save(doc!("name": "alice"))?;
//! db.close()?;
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use itertools::Itertools;

use crate::codec;
use crate::collection::{Collection, CollectionOptions};
use crate::common::{CATALOG_FILE, COLLECTION_EXT, FIELD_SEPARATOR, LOCK_FILE, UPSERT_KEY};
use crate::document::{Document, Value};
use crate::errors::{ErrorKind, JotError, JotResult};
use crate::index::IndexOptions;
use crate::query::{Query, QueryOutcome};
use crate::store::RecordStore;

/// Open-mode bits accepted by [`Database::open`].
pub mod open_mode {
    /// Open for reading.
    pub const READ: u32 = 0x01;
    /// Open for reading and writing.
    pub const WRITE: u32 = 0x02;
    /// Create the database directory if it does not exist. Requires
    /// [`WRITE`].
    pub const CREATE: u32 = 0x04;
    /// Discard any existing contents on open. Requires [`CREATE`].
    pub const TRUNCATE: u32 = 0x08;
}

const KNOWN_MODE_BITS: u32 =
    open_mode::READ | open_mode::WRITE | open_mode::CREATE | open_mode::TRUNCATE;

/// An embedded document database.
///
/// Cheap to clone; clones share the same underlying state. All
/// operations fail with `NotOpen` once [`close`](Database::close) has
/// run.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    path: PathBuf,
    read_only: bool,
    lock_file: File,
    collections: DashMap<String, Collection>,
    open: AtomicBool,
}

impl Database {
    /// Opens (or creates) the database at `path` with the given
    /// [`open_mode`] bits.
    pub fn open(path: &Path, mode: u32) -> JotResult<Database> {
        validate_mode(mode)?;
        let writable = mode & open_mode::WRITE != 0;

        if !path.exists() {
            if mode & open_mode::CREATE == 0 {
                log::error!("Database {} does not exist", path.display());
                return Err(JotError::new(
                    &format!("Database {} does not exist", path.display()),
                    ErrorKind::NotFound,
                ));
            }
            fs::create_dir_all(path)?;
        }

        let lock_file = acquire_lock(path, writable)?;
        if mode & open_mode::TRUNCATE != 0 {
            truncate_contents(path)?;
        }

        let database = Database {
            inner: Arc::new(DatabaseInner {
                path: path.to_path_buf(),
                read_only: !writable,
                lock_file,
                collections: DashMap::new(),
                open: AtomicBool::new(true),
            }),
        };
        database.load_catalog()?;
        log::info!(
            "Opened database {} ({})",
            path.display(),
            if writable { "read-write" } else { "read-only" }
        );
        Ok(database)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Returns the named collection, creating it (and persisting it in
    /// the catalog) if it does not exist yet.
    pub fn collection(&self, name: &str, options: CollectionOptions) -> JotResult<Collection> {
        self.check_open()?;
        validate_collection_name(name)?;

        if let Some(existing) = self.inner.collections.get(name) {
            return Ok(existing.clone());
        }
        if self.inner.read_only {
            log::error!("Cannot create collection '{}' in a read-only database", name);
            return Err(JotError::new(
                &format!("Cannot create collection '{}' in a read-only database", name),
                ErrorKind::ReadOnly,
            ));
        }

        let store = RecordStore::open(&self.collection_path(name), true, false)?;
        let collection = Collection::new(name, store, options, false);
        self.attach(collection.clone());
        self.save_catalog()?;
        Ok(collection)
    }

    /// Returns the named collection; `CollectionNotFound` if it does
    /// not exist.
    pub fn get_collection(&self, name: &str) -> JotResult<Collection> {
        self.check_open()?;
        match self.inner.collections.get(name) {
            Some(collection) => Ok(collection.clone()),
            None => Err(collection_not_found(name)),
        }
    }

    /// Drops the named collection, deleting its record store. With
    /// `prune` set the store's bytes are zeroed before the file is
    /// removed.
    pub fn drop_collection(&self, name: &str, prune: bool) -> JotResult<()> {
        self.check_open()?;
        self.check_writable()?;
        let (_, collection) = self
            .inner
            .collections
            .remove(name)
            .ok_or_else(|| collection_not_found(name))?;
        collection.store().destroy(prune)?;
        self.save_catalog()?;
        log::info!("Dropped collection '{}'", name);
        Ok(())
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        self.inner
            .collections
            .iter()
            .map(|entry| entry.key().clone())
            .sorted()
            .collect()
    }

    /// Executes a query against the named collection.
    ///
    /// A query against a missing collection matches nothing; when it
    /// carries an upsert the collection is created first and the upsert
    /// runs against it.
    pub fn execute_query(&self, name: &str, query: &Query, flags: u32) -> JotResult<QueryOutcome> {
        self.check_open()?;
        validate_collection_name(name)?;

        if let Some(collection) = self.inner.collections.get(name) {
            let collection = collection.clone();
            return collection.execute(query, flags);
        }
        if query.spec().contains_field(UPSERT_KEY) && !self.inner.read_only {
            let collection = self.collection(name, CollectionOptions::default())?;
            return collection.execute(query, flags);
        }
        Ok(QueryOutcome::empty(
            flags & crate::query::flags::COUNT_ONLY != 0,
        ))
    }

    /// Forces all collections and the catalog to stable storage.
    pub fn sync(&self) -> JotResult<()> {
        self.check_open()?;
        for entry in self.inner.collections.iter() {
            entry.value().sync()?;
        }
        Ok(())
    }

    /// Closes the database, releasing the directory lock. Closing an
    /// already-closed database is a no-op.
    pub fn close(&self) -> JotResult<()> {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if !self.inner.read_only {
            for entry in self.inner.collections.iter() {
                entry.value().sync()?;
            }
        }
        self.inner.collections.clear();
        if let Err(error) = fs2::FileExt::unlock(&self.inner.lock_file) {
            log::warn!(
                "Failed to release lock on {}: {}",
                self.inner.path.display(),
                error
            );
        }
        log::info!("Closed database {}", self.inner.path.display());
        Ok(())
    }

    fn check_open(&self) -> JotResult<()> {
        if !self.is_open() {
            log::error!("Database {} is not open", self.inner.path.display());
            return Err(JotError::new(
                &format!("Database {} is not open", self.inner.path.display()),
                ErrorKind::NotOpen,
            ));
        }
        Ok(())
    }

    fn check_writable(&self) -> JotResult<()> {
        if self.inner.read_only {
            log::error!("Database {} is read-only", self.inner.path.display());
            return Err(JotError::new(
                &format!("Database {} is read-only", self.inner.path.display()),
                ErrorKind::ReadOnly,
            ));
        }
        Ok(())
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.inner
            .path
            .join(format!("{}.{}", name, COLLECTION_EXT))
    }

    /// Registers a collection and wires its metadata hook to catalog
    /// persistence. The hook holds a weak reference so the registry
    /// does not keep the database alive through its own collections.
    fn attach(&self, collection: Collection) {
        let weak: Weak<DatabaseInner> = Arc::downgrade(&self.inner);
        collection.set_meta_change_hook(Arc::new(move || match weak.upgrade() {
            Some(inner) => save_catalog(&inner),
            None => Ok(()),
        }));
        self.inner
            .collections
            .insert(collection.name().to_string(), collection);
    }

    fn save_catalog(&self) -> JotResult<()> {
        save_catalog(&self.inner)
    }

    fn load_catalog(&self) -> JotResult<()> {
        let catalog_path = self.inner.path.join(CATALOG_FILE);
        if !catalog_path.exists() {
            return Ok(());
        }
        let bytes = fs::read(&catalog_path)?;
        let catalog = codec::decode(&bytes).map_err(|error| {
            log::error!("Catalog of {} is corrupted", self.inner.path.display());
            JotError::new_with_cause(
                &format!("Catalog of {} is corrupted", self.inner.path.display()),
                ErrorKind::Corrupted,
                error,
            )
        })?;

        let Value::Array(entries) = catalog.get("collections") else {
            return Ok(());
        };
        for entry in &entries {
            let Value::Document(entry) = entry else {
                return Err(corrupted_catalog(&self.inner.path, "non-document entry"));
            };
            self.load_collection(entry)?;
        }
        Ok(())
    }

    fn load_collection(&self, entry: &Document) -> JotResult<()> {
        let Value::String(name) = entry.get("name") else {
            return Err(corrupted_catalog(&self.inner.path, "entry without a name"));
        };
        let path = self.collection_path(&name);
        if !path.exists() {
            // the catalog can outlive a store lost to a crash between
            // destroy and rewrite; drop the entry instead of failing
            log::warn!(
                "Collection '{}' is in the catalog but {} is missing; skipping",
                name,
                path.display()
            );
            return Ok(());
        }

        let store = RecordStore::open(&path, false, self.inner.read_only)?;
        let collection = Collection::new(
            &name,
            store,
            decode_options(entry),
            self.inner.read_only,
        );

        if let Value::Array(indexes) = entry.get("indexes") {
            for index in &indexes {
                let Value::Document(index) = index else {
                    return Err(corrupted_catalog(&self.inner.path, "non-document index"));
                };
                let Value::String(field) = index.get("field") else {
                    return Err(corrupted_catalog(&self.inner.path, "index without a field"));
                };
                let Some(flags) = index.get("flags").as_i64() else {
                    return Err(corrupted_catalog(&self.inner.path, "index without flags"));
                };
                let options = IndexOptions::from_flags(flags as u32)?;
                collection.rebuild_index(&field, options)?;
            }
        }

        self.attach(collection);
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("read_only", &self.inner.read_only)
            .field("open", &self.is_open())
            .finish()
    }
}

fn validate_mode(mode: u32) -> JotResult<()> {
    let invalid = mode & !KNOWN_MODE_BITS != 0
        || mode & (open_mode::READ | open_mode::WRITE) == 0
        || (mode & open_mode::CREATE != 0 && mode & open_mode::WRITE == 0)
        || (mode & open_mode::TRUNCATE != 0 && mode & open_mode::CREATE == 0);
    if invalid {
        log::error!("Invalid open mode {:#x}", mode);
        return Err(JotError::new(
            &format!("Invalid open mode {:#x}", mode),
            ErrorKind::InvalidArgument,
        ));
    }
    Ok(())
}

fn validate_collection_name(name: &str) -> JotResult<()> {
    let invalid = name.is_empty()
        || name.contains(FIELD_SEPARATOR)
        || name.contains(std::path::is_separator);
    if invalid {
        log::error!("Invalid collection name '{}'", name);
        return Err(JotError::new(
            &format!("Invalid collection name '{}'", name),
            ErrorKind::InvalidArgument,
        ));
    }
    Ok(())
}

fn acquire_lock(path: &Path, writable: bool) -> JotResult<File> {
    let lock_path = path.join(LOCK_FILE);
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)?;
    // called through the trait: std's own File locking methods shadow
    // the fs2 names otherwise, with a different error type
    let locked = if writable {
        fs2::FileExt::try_lock_exclusive(&lock_file)
    } else {
        fs2::FileExt::try_lock_shared(&lock_file)
    };
    locked.map_err(|error| {
        log::error!("Database {} is locked by another process", path.display());
        JotError::new_with_cause(
            &format!("Database {} is locked by another process", path.display()),
            ErrorKind::Locked,
            error.into(),
        )
    })?;
    Ok(lock_file)
}

fn truncate_contents(path: &Path) -> JotResult<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let entry_path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let is_store = entry_path
            .extension()
            .map(|ext| ext == COLLECTION_EXT)
            .unwrap_or(false);
        if is_store || name == CATALOG_FILE {
            fs::remove_file(&entry_path)?;
        }
    }
    log::info!("Truncated database {}", path.display());
    Ok(())
}

/// Rewrites the catalog from the live registry, atomically via a
/// temporary file.
fn save_catalog(inner: &DatabaseInner) -> JotResult<()> {
    let mut entries = Vec::new();
    for item in inner.collections.iter() {
        let collection = item.value();
        let mut entry = Document::new();
        entry.put("name", collection.name())?;
        entry.put("options", encode_options(collection.options()))?;

        let indexes: Vec<Value> = collection
            .list_indexes()
            .iter()
            .map(|descriptor| {
                let mut index = Document::new();
                index.put("field", descriptor.field_path())?;
                index.put("flags", descriptor.options().to_flags() as i64)?;
                Ok(Value::Document(index))
            })
            .collect::<JotResult<_>>()?;
        entry.put("indexes", Value::Array(indexes))?;
        entries.push(Value::Document(entry));
    }
    // stable catalog order keeps rewrites comparable
    entries.sort_by(|a, b| match (a, b) {
        (Value::Document(a), Value::Document(b)) => a.get("name").cmp(&b.get("name")),
        _ => std::cmp::Ordering::Equal,
    });

    let mut catalog = Document::new();
    catalog.put("collections", Value::Array(entries))?;
    let bytes = codec::encode(&catalog)?;

    let final_path = inner.path.join(CATALOG_FILE);
    let tmp_path = inner.path.join(format!("{}.tmp", CATALOG_FILE));
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&bytes)?;
        // the rename must not land before the contents
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, &final_path)?;
    if let Ok(dir) = File::open(&inner.path) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn encode_options(options: CollectionOptions) -> Document {
    let mut encoded = Document::new();
    // infallible: keys are literal and values are plain scalars
    let _ = encoded.put("expected_records", options.expected_records as i64);
    let _ = encoded.put("large", options.large);
    let _ = encoded.put("compressed", options.compressed);
    encoded
}

fn decode_options(entry: &Document) -> CollectionOptions {
    let Value::Document(encoded) = entry.get("options") else {
        return CollectionOptions::default();
    };
    CollectionOptions::default()
        .expected_records(encoded.get("expected_records").as_i64().unwrap_or(0) as u64)
        .large(encoded.get("large") == Value::Bool(true))
        .compressed(encoded.get("compressed") == Value::Bool(true))
}

fn collection_not_found(name: &str) -> JotError {
    log::error!("Collection '{}' does not exist", name);
    JotError::new(
        &format!("Collection '{}' does not exist", name),
        ErrorKind::CollectionNotFound,
    )
}

fn corrupted_catalog(path: &Path, detail: &str) -> JotError {
    log::error!("Catalog of {} is corrupted: {}", path.display(), detail);
    JotError::new(
        &format!("Catalog of {} is corrupted: {}", path.display(), detail),
        ErrorKind::Corrupted,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::index::IndexKind;
    use crate::query::flags as query_flags;
    use crate::val;
    use tempfile::TempDir;

    fn open_rw(dir: &TempDir) -> Database {
        Database::open(
            dir.path(),
            open_mode::READ | open_mode::WRITE | open_mode::CREATE,
        )
        .unwrap()
    }

    #[test]
    fn test_open_requires_existing_directory_without_create() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let error = Database::open(&missing, open_mode::READ).unwrap_err();
        assert_eq!(error.kind(), &ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_modes_rejected() {
        let dir = TempDir::new().unwrap();
        for mode in [
            0,
            open_mode::CREATE,
            open_mode::READ | open_mode::CREATE,
            open_mode::WRITE | open_mode::TRUNCATE,
            0x100,
        ] {
            let error = Database::open(dir.path(), mode).unwrap_err();
            assert_eq!(error.kind(), &ErrorKind::InvalidArgument, "mode {:#x}", mode);
        }
    }

    #[test]
    fn test_collection_roundtrip_across_reopen() {
        let dir = TempDir::new().unwrap();
        let oid = {
            let db = open_rw(&dir);
            let people = db.collection("people", CollectionOptions::default()).unwrap();
            people
                .ensure_index("name", IndexOptions::new(IndexKind::String))
                .unwrap();
            let oid = people.save(doc!("name": "alice")).unwrap();
            db.close().unwrap();
            oid
        };

        let db = Database::open(dir.path(), open_mode::READ | open_mode::WRITE).unwrap();
        let people = db.get_collection("people").unwrap();
        assert_eq!(people.load(&oid).unwrap().get("name"), val!("alice"));

        // the index came back from the catalog and is queryable
        assert_eq!(people.list_indexes().len(), 1);
        let outcome = people
            .execute(
                &Query::new(doc!("name": "alice")),
                query_flags::COUNT_ONLY | query_flags::EXPLAIN,
            )
            .unwrap();
        assert_eq!(outcome.count(), 1);
        assert_eq!(outcome.explain().unwrap().get("full_scan"), val!(false));
        db.close().unwrap();
    }

    #[test]
    fn test_get_collection_missing() {
        let dir = TempDir::new().unwrap();
        let db = open_rw(&dir);
        let error = db.get_collection("ghost").unwrap_err();
        assert_eq!(error.kind(), &ErrorKind::CollectionNotFound);
        db.close().unwrap();
    }

    #[test]
    fn test_drop_collection_removes_file() {
        let dir = TempDir::new().unwrap();
        let db = open_rw(&dir);
        let people = db.collection("people", CollectionOptions::default()).unwrap();
        people.save(doc!("name": "alice")).unwrap();

        let store_path = dir.path().join("people.jdc");
        assert!(store_path.exists());
        db.drop_collection("people", true).unwrap();
        assert!(!store_path.exists());
        assert_eq!(
            db.get_collection("people").unwrap_err().kind(),
            &ErrorKind::CollectionNotFound
        );

        let error = db.drop_collection("people", false).unwrap_err();
        assert_eq!(error.kind(), &ErrorKind::CollectionNotFound);
        db.close().unwrap();
    }

    #[test]
    fn test_truncate_discards_contents() {
        let dir = TempDir::new().unwrap();
        {
            let db = open_rw(&dir);
            let people = db.collection("people", CollectionOptions::default()).unwrap();
            people.save(doc!("name": "alice")).unwrap();
            db.close().unwrap();
        }

        let db = Database::open(
            dir.path(),
            open_mode::READ | open_mode::WRITE | open_mode::CREATE | open_mode::TRUNCATE,
        )
        .unwrap();
        assert!(db.collection_names().is_empty());
        db.close().unwrap();
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let db = open_rw(&dir);
        let error =
            Database::open(dir.path(), open_mode::READ | open_mode::WRITE).unwrap_err();
        assert_eq!(error.kind(), &ErrorKind::Locked);
        db.close().unwrap();
    }

    #[test]
    fn test_read_only_database() {
        let dir = TempDir::new().unwrap();
        {
            let db = open_rw(&dir);
            let people = db.collection("people", CollectionOptions::default()).unwrap();
            people.save(doc!("name": "alice")).unwrap();
            db.close().unwrap();
        }

        let db = Database::open(dir.path(), open_mode::READ).unwrap();
        assert!(db.is_read_only());
        let people = db.get_collection("people").unwrap();
        assert_eq!(people.find(&Query::new(doc!())).unwrap().len(), 1);
        assert_eq!(
            people.save(doc!("name": "bob")).unwrap_err().kind(),
            &ErrorKind::ReadOnly
        );
        assert_eq!(
            db.collection("other", CollectionOptions::default())
                .unwrap_err()
                .kind(),
            &ErrorKind::ReadOnly
        );
        db.close().unwrap();
    }

    #[test]
    fn test_execute_query_on_missing_collection() {
        let dir = TempDir::new().unwrap();
        let db = open_rw(&dir);

        let outcome = db
            .execute_query("ghost", &Query::new(doc!("a": 1)), 0)
            .unwrap();
        assert_eq!(outcome.count(), 0);
        assert!(db.collection_names().is_empty());

        // an upsert conjures the collection
        let query = Query::new(doc!("name": "erin", "$upsert": {"name": "erin"}));
        let outcome = db.execute_query("people", &query, 0).unwrap();
        assert_eq!(outcome.count(), 1);
        assert_eq!(db.collection_names(), vec!["people".to_string()]);
        db.close().unwrap();
    }

    #[test]
    fn test_collection_names_sorted() {
        let dir = TempDir::new().unwrap();
        let db = open_rw(&dir);
        for name in ["zebra", "alpha", "mango"] {
            db.collection(name, CollectionOptions::default()).unwrap();
        }
        assert_eq!(db.collection_names(), vec!["alpha", "mango", "zebra"]);
        db.close().unwrap();
    }

    #[test]
    fn test_invalid_collection_names() {
        let dir = TempDir::new().unwrap();
        let db = open_rw(&dir);
        for name in ["", "a.b", "a/b"] {
            let error = db
                .collection(name, CollectionOptions::default())
                .unwrap_err();
            assert_eq!(error.kind(), &ErrorKind::InvalidArgument, "name '{}'", name);
        }
        db.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let dir = TempDir::new().unwrap();
        let db = open_rw(&dir);
        db.close().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert_eq!(
            db.get_collection("any").unwrap_err().kind(),
            &ErrorKind::NotOpen
        );
    }

    #[test]
    fn test_options_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let options = CollectionOptions::default()
            .expected_records(512)
            .large(true);
        {
            let db = open_rw(&dir);
            db.collection("people", options).unwrap();
            db.close().unwrap();
        }

        let db = Database::open(dir.path(), open_mode::READ).unwrap();
        let people = db.get_collection("people").unwrap();
        assert_eq!(people.options(), options);
        db.close().unwrap();
    }
}
