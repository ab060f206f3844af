//! Document queries and their execution.
//!
//! A [`Query`] is itself expressed as documents: a primary spec whose
//! fields constrain document fields, optional OR branches widening the
//! match, and an optional hints document controlling ordering,
//! projection and paging.
//!
//! # Query shape
//!
//! A spec field maps a field path to either a bare value (equality,
//! with containment semantics for array fields) or an operator
//! document:
//!
//! - **Comparison**: `$gt`, `$gte`, `$lt`, `$lte`, `$ne`
//! - **Membership**: `$in`, `$nin`
//! - **Pattern**: `$begin` (string prefix)
//! - **Presence**: `$exists`
//!
//! The top-level key `$upsert` turns the query into an upsert: when no
//! document matches, one is inserted (the `$upsert` document if one is
//! given, otherwise a document built from the spec's equality fields).
//!
//! Hints: `$orderby`, `$fields`, `$skip`, `$max`.
//!
//! # Examples
//!
//! ```rust,ignore
//! use jotdb::{doc, Query};
//!
//! let query = Query::new(doc!("status": "active", "age": {"$gte": 21}))
//!     .or_branch(doc!("role": "admin"))
//!     .hints(doc!("$orderby": {"age": 1}, "$max": 10));
//! let results = collection.find(&query)?;
//! ```
//!
//! Execution plans one index probe per branch where a suitable index
//! exists and falls back to a full record scan otherwise; every
//! candidate is re-checked against the decoded document, so probes only
//! narrow the scan and never decide a match by themselves.

mod executor;
mod plan;
mod result_set;
mod spec;

pub use executor::{QueryOutcome, execute};
pub use result_set::ResultSet;

use crate::document::Document;

/// Execution flag bits accepted by [`execute`] and the raw interface.
pub mod flags {
    /// Count matching documents without materialising a result set.
    pub const COUNT_ONLY: u32 = 0x01;
    /// Stop after the first match (after `$skip` is applied).
    pub const FIRST_ONLY: u32 = 0x02;
    /// Attach an execution report to the outcome.
    pub const EXPLAIN: u32 = 0x04;
}

/// A query against a collection.
///
/// Built from plain documents; compilation and validation happen at
/// execution time, so a malformed spec surfaces as `MalformedQuery`
/// from [`execute`] rather than at construction.
#[derive(Debug, Clone)]
pub struct Query {
    spec: Document,
    or_branches: Vec<Document>,
    hints: Option<Document>,
}

impl Query {
    /// Creates a query from a primary spec document. An empty spec
    /// matches every document.
    pub fn new(spec: Document) -> Self {
        Query {
            spec,
            or_branches: Vec::new(),
            hints: None,
        }
    }

    /// Adds an OR branch; a document matching any branch (or the
    /// primary spec) is part of the result.
    pub fn or_branch(mut self, branch: Document) -> Self {
        self.or_branches.push(branch);
        self
    }

    /// Sets the hints document (`$orderby`, `$fields`, `$skip`, `$max`).
    pub fn hints(mut self, hints: Document) -> Self {
        self.hints = Some(hints);
        self
    }

    pub fn spec(&self) -> &Document {
        &self.spec
    }

    pub fn branches(&self) -> &[Document] {
        &self.or_branches
    }

    pub fn hint_document(&self) -> Option<&Document> {
        self.hints.as_ref()
    }
}
