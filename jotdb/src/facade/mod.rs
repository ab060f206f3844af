//! Handle-based interface for embedding hosts.
//!
//! Foreign callers (bindings, IPC shims) cannot hold Rust values, so
//! this module maps every live object to an opaque `u64` handle in a
//! process-wide table: databases, collections, queries and result
//! sets. Handle zero is never issued and is safe to use as a null
//! value on the far side.
//!
//! Documents cross the boundary as encoded bytes in the wire format of
//! [`crate::codec`]; identifiers cross as 24-character hex strings.
//!
//! Every failure of an operation on a database (or anything owned by
//! one) is recorded on that database and can be fetched afterwards with
//! [`last_error`] as a `(code, message)` pair, so hosts that cannot
//! carry rich error values still get the detail.
//!
//! Closing a database invalidates every handle that depends on it.

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::codec;
use crate::collection::{Collection, CollectionOptions};
use crate::database::Database;
use crate::document::Oid;
use crate::errors::{ErrorKind, JotError, JotResult};
use crate::index::IndexOptions;
use crate::query::{Query, ResultSet};

static HANDLES: Lazy<DashMap<u64, HandleEntry>> = Lazy::new(DashMap::new);
// zero is reserved as the null handle
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

enum HandleEntry {
    Database(DatabaseEntry),
    Collection(CollectionEntry),
    Query(QueryEntry),
    ResultSet(ResultSetEntry),
}

struct DatabaseEntry {
    database: Database,
    last_error: Mutex<Option<(i32, String)>>,
}

struct CollectionEntry {
    owner: u64,
    collection: Collection,
}

struct QueryEntry {
    owner: u64,
    query: Query,
}

struct ResultSetEntry {
    owner: u64,
    rows: ResultSet,
}

/// Count and optional result-set handle produced by [`execute_query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryExecution {
    /// Number of documents the query selected.
    pub count: u64,
    /// Handle of the materialised result set; zero when the query ran
    /// count-only.
    pub result_set: u64,
}

fn issue(entry: HandleEntry) -> u64 {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    HANDLES.insert(handle, entry);
    handle
}

fn unknown_handle(handle: u64, expected: &str) -> JotError {
    log::error!("Handle {} is not an open {}", handle, expected);
    JotError::new(
        &format!("Handle {} is not an open {}", handle, expected),
        ErrorKind::InvalidArgument,
    )
}

fn with_database<T>(handle: u64, op: impl FnOnce(&Database) -> JotResult<T>) -> JotResult<T> {
    let entry = HANDLES.get(&handle);
    let Some(entry) = entry.as_deref() else {
        return Err(unknown_handle(handle, "database"));
    };
    let HandleEntry::Database(entry) = entry else {
        return Err(unknown_handle(handle, "database"));
    };
    let result = op(&entry.database);
    note_error(entry, &result);
    result
}

fn with_collection<T>(
    handle: u64,
    op: impl FnOnce(&Collection) -> JotResult<T>,
) -> JotResult<T> {
    let (owner, collection) = {
        let entry = HANDLES.get(&handle);
        let Some(entry) = entry.as_deref() else {
            return Err(unknown_handle(handle, "collection"));
        };
        let HandleEntry::Collection(entry) = entry else {
            return Err(unknown_handle(handle, "collection"));
        };
        (entry.owner, entry.collection.clone())
    };
    record_on(owner, op(&collection))
}

fn note_error<T>(entry: &DatabaseEntry, result: &JotResult<T>) {
    let mut last_error = entry.last_error.lock();
    *last_error = result
        .as_ref()
        .err()
        .map(|error| (error.code(), error.message().to_string()));
}

/// Records an operation's outcome on the owning database entry, then
/// passes the result through.
fn record_on<T>(owner: u64, result: JotResult<T>) -> JotResult<T> {
    if let Some(entry) = HANDLES.get(&owner) {
        if let HandleEntry::Database(entry) = entry.value() {
            note_error(entry, &result);
        }
    }
    result
}

/// Opens a database and returns its handle. See
/// [`crate::database::open_mode`] for the mode bits.
pub fn open_database(path: &Path, mode: u32) -> JotResult<u64> {
    let database = Database::open(path, mode)?;
    Ok(issue(HandleEntry::Database(DatabaseEntry {
        database,
        last_error: Mutex::new(None),
    })))
}

/// Whether `handle` names an open database.
pub fn is_open(handle: u64) -> bool {
    match HANDLES.get(&handle).as_deref() {
        Some(HandleEntry::Database(entry)) => entry.database.is_open(),
        _ => false,
    }
}

/// Closes a database and invalidates every handle depending on it.
/// Closing an unknown or already-closed handle is a no-op.
pub fn close_database(handle: u64) -> JotResult<()> {
    let Some((_, entry)) = HANDLES.remove(&handle) else {
        return Ok(());
    };
    let HandleEntry::Database(entry) = entry else {
        HANDLES.insert(handle, entry);
        return Err(unknown_handle(handle, "database"));
    };

    HANDLES.retain(|_, dependent| match dependent {
        HandleEntry::Database(_) => true,
        HandleEntry::Collection(e) => e.owner != handle,
        HandleEntry::Query(e) => e.owner != handle,
        HandleEntry::ResultSet(e) => e.owner != handle,
    });
    entry.database.close()
}

pub fn sync_database(handle: u64) -> JotResult<()> {
    with_database(handle, |database| database.sync())
}

/// Last failure of an operation on this database or its dependents,
/// as a `(code, message)` pair. Cleared by the next successful
/// operation.
pub fn last_error(handle: u64) -> Option<(i32, String)> {
    match HANDLES.get(&handle).as_deref() {
        Some(HandleEntry::Database(entry)) => entry.last_error.lock().clone(),
        _ => None,
    }
}

/// Resolves a collection to a handle, creating the collection when
/// `create` is set.
pub fn get_collection(db: u64, name: &str, create: bool) -> JotResult<u64> {
    let collection = with_database(db, |database| {
        if create {
            database.collection(name, CollectionOptions::default())
        } else {
            database.get_collection(name)
        }
    })?;
    Ok(issue(HandleEntry::Collection(CollectionEntry {
        owner: db,
        collection,
    })))
}

pub fn drop_collection(db: u64, name: &str, prune: bool) -> JotResult<()> {
    let result = with_database(db, |database| database.drop_collection(name, prune))?;
    HANDLES.retain(|_, entry| match entry {
        HandleEntry::Collection(e) => !(e.owner == db && e.collection.name() == name),
        _ => true,
    });
    Ok(result)
}

pub fn sync_collection(handle: u64) -> JotResult<()> {
    with_collection(handle, |collection| collection.sync())
}

/// Saves an encoded document; the identifier of the saved document is
/// returned as hex. Bytes carrying an `_id` update that record.
pub fn save_document(handle: u64, bytes: &[u8]) -> JotResult<String> {
    with_collection(handle, |collection| {
        let document = codec::decode(bytes)?;
        let oid = collection.save(document)?;
        Ok(oid.to_hex())
    })
}

/// Loads the document with the given hex identifier, encoded and
/// including its `_id`.
pub fn load_document(handle: u64, oid: &str) -> JotResult<Vec<u8>> {
    with_collection(handle, |collection| {
        let oid = Oid::from_str(oid)?;
        collection.load_raw(&oid)
    })
}

pub fn remove_document(handle: u64, oid: &str) -> JotResult<()> {
    with_collection(handle, |collection| {
        let oid = Oid::from_str(oid)?;
        collection.remove(&oid)
    })
}

/// Ensures an index described by [`crate::index::flags`] bits.
pub fn ensure_index(handle: u64, field_path: &str, flags: u32) -> JotResult<()> {
    with_collection(handle, |collection| {
        let options = IndexOptions::from_flags(flags)?;
        collection.ensure_index(field_path, options)
    })
}

pub fn drop_index(handle: u64, field_path: &str) -> JotResult<()> {
    with_collection(handle, |collection| collection.drop_index(field_path))
}

/// Builds a query from encoded spec documents and returns its handle.
/// The query is validated on execution, not here.
pub fn create_query(
    db: u64,
    spec: &[u8],
    branches: &[Vec<u8>],
    hints: Option<&[u8]>,
) -> JotResult<u64> {
    let query = record_on(db, build_query(spec, branches, hints))?;
    Ok(issue(HandleEntry::Query(QueryEntry { owner: db, query })))
}

fn build_query(spec: &[u8], branches: &[Vec<u8>], hints: Option<&[u8]>) -> JotResult<Query> {
    let mut query = Query::new(codec::decode(spec)?);
    for branch in branches {
        query = query.or_branch(codec::decode(branch)?);
    }
    if let Some(hints) = hints {
        query = query.hints(codec::decode(hints)?);
    }
    Ok(query)
}

/// Executes a query against the named collection of its database. See
/// [`crate::query::flags`] for the flag bits.
pub fn execute_query(handle: u64, collection: &str, flags: u32) -> JotResult<QueryExecution> {
    let (owner, query) = {
        let entry = HANDLES.get(&handle);
        let Some(entry) = entry.as_deref() else {
            return Err(unknown_handle(handle, "query"));
        };
        let HandleEntry::Query(entry) = entry else {
            return Err(unknown_handle(handle, "query"));
        };
        (entry.owner, entry.query.clone())
    };

    let outcome = with_database(owner, |database| {
        database.execute_query(collection, &query, flags)
    })?;

    let count = outcome.count();
    let result_set = match outcome.into_result_set() {
        Ok(rows) => issue(HandleEntry::ResultSet(ResultSetEntry { owner, rows })),
        Err(_) => 0,
    };
    Ok(QueryExecution { count, result_set })
}

/// Releases a query handle. Unknown handles are ignored.
pub fn close_query(handle: u64) {
    HANDLES.remove_if(&handle, |_, entry| matches!(entry, HandleEntry::Query(_)));
}

/// Number of rows in a result set.
pub fn result_set_len(handle: u64) -> JotResult<u64> {
    with_result_set(handle, |rows| Ok(rows.len() as u64))
}

/// Encoded bytes of one result row.
pub fn result_set_get(handle: u64, position: usize) -> JotResult<Vec<u8>> {
    with_result_set(handle, |rows| rows.get(position))
}

/// Releases a result set handle and its snapshot. Unknown handles are
/// ignored.
pub fn close_result_set(handle: u64) {
    let removed =
        HANDLES.remove_if(&handle, |_, entry| matches!(entry, HandleEntry::ResultSet(_)));
    if let Some((_, HandleEntry::ResultSet(entry))) = removed {
        entry.rows.close();
    }
}

fn with_result_set<T>(handle: u64, op: impl FnOnce(&ResultSet) -> JotResult<T>) -> JotResult<T> {
    let (owner, rows) = {
        let entry = HANDLES.get(&handle);
        let Some(entry) = entry.as_deref() else {
            return Err(unknown_handle(handle, "result set"));
        };
        let HandleEntry::ResultSet(entry) = entry else {
            return Err(unknown_handle(handle, "result set"));
        };
        (entry.owner, entry.rows.clone())
    };
    record_on(owner, op(&rows))
}
