//! Common constants and small shared types.

mod sort_order;

pub use sort_order::SortOrder;

/// Reserved document field holding the object identifier.
pub const DOC_ID: &str = "_id";

/// Field path separator for embedded documents.
pub const FIELD_SEPARATOR: char = '.';

/// File name of the database catalog inside the database directory.
pub(crate) const CATALOG_FILE: &str = "catalog.jot";

/// File name of the advisory lock inside the database directory.
pub(crate) const LOCK_FILE: &str = "db.lock";

/// Extension of collection record-store files.
pub(crate) const COLLECTION_EXT: &str = "jdc";

/// Reserved query key triggering upsert semantics.
pub(crate) const UPSERT_KEY: &str = "$upsert";
