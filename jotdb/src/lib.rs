//! # JotDB - Embedded Document Store
//!
//! JotDB is a lightweight embedded document database written in Rust.
//! Documents are schemaless, ordered field maps stored in per-collection
//! record files, with secondary indexes and a document-based query
//! language.
//!
//! ## Key Features
//!
//! - **Embedded**: No separate server process required
//! - **Single-file collections**: Each collection is one record-store file
//! - **Binary documents**: A compact length-prefixed wire format with
//!   nested documents and arrays
//! - **Indexing**: String, number and array (containment) indexes, with
//!   optional unique constraints
//! - **Queries as documents**: Operator documents (`$gt`, `$in`,
//!   `$begin`, ...), OR branches, ordering, paging, projection and
//!   upsert
//! - **Handle facade**: An opaque-handle interface for embedding hosts
//!   that cannot hold Rust values
//! - **Clean API**: PIMPL pattern provides stable, encapsulated interface
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jotdb::{doc, Database, Query, CollectionOptions, open_mode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(
//!     "app.db".as_ref(),
//!     open_mode::READ | open_mode::WRITE | open_mode::CREATE,
//! )?;
//!
//! let people = db.collection("people", CollectionOptions::default())?;
//! let oid = people.save(doc!("name": "John Doe", "age": 30))?;
//!
//! let adults = people.find(&Query::new(doc!("age": {"$gte": 18})))?;
//! println!("{} adults, first inserted as {}", adults.len(), oid);
//!
//! db.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`codec`] - The binary document wire format
//! - [`collection`] - Document collections and index maintenance
//! - [`common`] - Common constants and small shared types
//! - [`database`] - The database directory, catalog and locking
//! - [`document`] - Documents, values and object identifiers
//! - [`errors`] - Error types and result definitions
//! - [`facade`] - Opaque-handle interface for embedding hosts
//! - [`index`] - Secondary indexes over document fields
//! - [`query`] - Query compilation, planning and execution
//! - [`store`] - The on-disk record store

pub mod codec;
pub mod collection;
pub mod common;
pub mod database;
pub mod document;
pub mod errors;
pub mod facade;
pub mod index;
pub mod query;
pub mod store;

pub use collection::{Collection, CollectionOptions};
pub use database::{open_mode, Database};
pub use document::{Document, Oid, Value};
pub use errors::{ErrorKind, JotError, JotResult};
pub use index::{IndexKind, IndexOptions};
pub use query::{Query, QueryOutcome, ResultSet};
