use crate::errors::{ErrorKind, JotError, JotResult};
use crate::index::flags;
use std::fmt::{Display, Formatter};

/// Comparison/containment semantics of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum IndexKind {
    /// Byte-lexicographic UTF-8 string comparison.
    String,
    /// Exact numeric comparison; integers and doubles compare by value.
    Number,
    /// One entry per array element; a query matching any element matches
    /// the document.
    Array,
}

impl Display for IndexKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::String => write!(f, "string"),
            IndexKind::Number => write!(f, "number"),
            IndexKind::Array => write!(f, "array"),
        }
    }
}

/// Configuration of one index: its kind plus the unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct IndexOptions {
    kind: IndexKind,
    unique: bool,
}

impl IndexOptions {
    pub fn new(kind: IndexKind) -> IndexOptions {
        IndexOptions {
            kind,
            unique: false,
        }
    }

    /// Adds the unique constraint. Only string and number kinds support
    /// it; array containment has no meaningful uniqueness.
    pub fn unique(kind: IndexKind) -> JotResult<IndexOptions> {
        if kind == IndexKind::Array {
            log::error!("Array indexes do not support the unique constraint");
            return Err(JotError::new(
                "Array indexes do not support the unique constraint",
                ErrorKind::InvalidArgument,
            ));
        }
        Ok(IndexOptions { kind, unique: true })
    }

    /// Decodes the integer bit flags used across the handle facade.
    pub fn from_flags(value: u32) -> JotResult<IndexOptions> {
        let kind = match value & (flags::STRING | flags::NUMBER | flags::ARRAY) {
            flags::STRING => IndexKind::String,
            flags::NUMBER => IndexKind::Number,
            flags::ARRAY => IndexKind::Array,
            _ => {
                log::error!("Invalid index flags {:#x}", value);
                return Err(JotError::new(
                    &format!("Index flags {:#x} must select exactly one kind", value),
                    ErrorKind::InvalidArgument,
                ));
            }
        };
        if value & !(flags::STRING | flags::NUMBER | flags::ARRAY | flags::UNIQUE) != 0 {
            return Err(JotError::new(
                &format!("Unknown index flag bits in {:#x}", value),
                ErrorKind::InvalidArgument,
            ));
        }
        if value & flags::UNIQUE != 0 {
            IndexOptions::unique(kind)
        } else {
            Ok(IndexOptions::new(kind))
        }
    }

    /// Integer bit flag form of these options.
    pub fn to_flags(&self) -> u32 {
        let mut value = match self.kind {
            IndexKind::String => flags::STRING,
            IndexKind::Number => flags::NUMBER,
            IndexKind::Array => flags::ARRAY,
        };
        if self.unique {
            value |= flags::UNIQUE;
        }
        value
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }
}

/// A persisted index definition: the field path it covers plus its
/// options. Descriptors live in the database catalog so indexes can be
/// rebuilt on open.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct IndexDescriptor {
    field_path: String,
    options: IndexOptions,
}

impl IndexDescriptor {
    pub fn new(field_path: &str, options: IndexOptions) -> IndexDescriptor {
        IndexDescriptor {
            field_path: field_path.to_string(),
            options,
        }
    }

    pub fn field_path(&self) -> &str {
        &self.field_path
    }

    pub fn options(&self) -> IndexOptions {
        self.options
    }
}

impl Display for IndexDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.options.is_unique() {
            write!(f, "unique {} index on {}", self.options.kind(), self.field_path)
        } else {
            write!(f, "{} index on {}", self.options.kind(), self.field_path)
        }
    }
}
