//! Materialised query results.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::codec;
use crate::document::Document;
use crate::errors::{ErrorKind, JotError, JotResult};

/// A snapshot of the documents a query selected, in result order.
///
/// Rows are the encoded documents (including the identifier) as they
/// stood at execution time; later mutations of the collection do not
/// show through. Cloning shares the snapshot, and closing any clone
/// closes them all. A closed set reports length zero and fails row
/// access with `ResultSetClosed`.
#[derive(Debug, Clone)]
pub struct ResultSet {
    inner: Arc<ResultSetInner>,
}

#[derive(Debug)]
struct ResultSetInner {
    rows: RwLock<Option<Vec<Vec<u8>>>>,
    explain: Option<Document>,
}

impl ResultSet {
    pub(crate) fn new(rows: Vec<Vec<u8>>, explain: Option<Document>) -> ResultSet {
        ResultSet {
            inner: Arc::new(ResultSetInner {
                rows: RwLock::new(Some(rows)),
                explain,
            }),
        }
    }

    /// Number of rows; zero once closed.
    pub fn len(&self) -> usize {
        self.inner
            .rows
            .read()
            .as_ref()
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded bytes of the row at `position`.
    pub fn get(&self, position: usize) -> JotResult<Vec<u8>> {
        let rows = self.inner.rows.read();
        let rows = rows.as_ref().ok_or_else(closed)?;
        rows.get(position).cloned().ok_or_else(|| {
            JotError::new(
                &format!(
                    "result set position {} out of range (length {})",
                    position,
                    rows.len()
                ),
                ErrorKind::InvalidArgument,
            )
        })
    }

    /// Decodes the row at `position`.
    pub fn get_document(&self, position: usize) -> JotResult<Document> {
        let bytes = self.get(position)?;
        codec::decode(&bytes)
    }

    /// Decodes every row.
    pub fn documents(&self) -> JotResult<Vec<Document>> {
        let rows = self.inner.rows.read();
        let rows = rows.as_ref().ok_or_else(closed)?;
        rows.iter().map(|bytes| codec::decode(bytes)).collect()
    }

    /// Execution report, when the query ran with the explain flag.
    pub fn explain(&self) -> Option<&Document> {
        self.inner.explain.as_ref()
    }

    /// Releases the snapshot. Safe to call more than once.
    pub fn close(&self) {
        *self.inner.rows.write() = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.rows.read().is_none()
    }
}

fn closed() -> JotError {
    JotError::new("result set is closed", ErrorKind::ResultSetClosed)
}
