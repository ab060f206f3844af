//! Secondary indexes over document fields.
//!
//! An index maps a scalar field value (or each element of an array-valued
//! field) to the set of object identifiers whose documents hold that
//! value. Indexes are maintained synchronously with every save and
//! remove, so after a completed mutation a reader never observes an index
//! that disagrees with the store.
//!
//! Three kinds exist: string (byte-lexicographic UTF-8 order), number
//! (exact numeric order across integer and double representations) and
//! array (containment: one entry per element). String and number indexes
//! may additionally carry a unique constraint.

mod field_index;
mod options;

pub use field_index::FieldIndex;
pub use options::{IndexDescriptor, IndexKind, IndexOptions};

/// Integer bit flags selecting an index kind, passed opaquely through the
/// handle facade.
pub mod flags {
    /// String index, byte-lexicographic comparison.
    pub const STRING: u32 = 0x01;
    /// Number index, exact numeric comparison.
    pub const NUMBER: u32 = 0x02;
    /// Array/containment index, one entry per element.
    pub const ARRAY: u32 = 0x04;
    /// Unique constraint modifier, valid on string and number kinds.
    pub const UNIQUE: u32 = 0x08;
}
