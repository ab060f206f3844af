//! Documents, values and object identifiers.
//!
//! A [`Document`] is an insertion-ordered mapping from string field names
//! to [`Value`]s. Field order is preserved so encoding is deterministic,
//! but it carries no query semantics. Nested fields are addressed with
//! dot-separated paths (`"address.city"`, `"tags.0"`).
//!
//! Each stored document is identified by a 12-byte, time-ordered [`Oid`]
//! held in the reserved `_id` field. The identifier is assigned by the
//! record store on first save and never changes afterwards.

mod oid;
mod value;

pub use oid::{Oid, OID_LENGTH};
pub use value::Value;

use crate::common::{DOC_ID, FIELD_SEPARATOR};
use crate::errors::{ErrorKind, JotError, JotResult};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};

/// A schema-less document: an ordered mapping from field names to values.
///
/// Field insertion order is preserved and used for encoding; queries do
/// not depend on it. Values nest arbitrarily deep through
/// [`Value::Document`] and [`Value::Array`].
#[derive(Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct Document {
    fields: IndexMap<String, Value>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Document {
            fields: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Puts a field into this document, replacing any existing value.
    ///
    /// The key names a top-level field; it is not split on the path
    /// separator. An empty key is rejected, and the reserved `_id` field
    /// only accepts an object identifier.
    pub fn put<T: Into<Value>>(&mut self, key: &str, value: T) -> JotResult<()> {
        if key.is_empty() {
            log::error!("Document does not support an empty field name");
            return Err(JotError::new(
                "Document does not support an empty field name",
                ErrorKind::InvalidArgument,
            ));
        }

        let value = value.into();
        if key == DOC_ID && !matches!(value, Value::ObjectId(_)) {
            log::error!("The {} field only accepts an object id", DOC_ID);
            return Err(JotError::new(
                &format!("The {} field only accepts an object id", DOC_ID),
                ErrorKind::InvalidArgument,
            ));
        }

        self.fields.insert(key.to_string(), value);
        Ok(())
    }

    /// Returns the value at `path`, or [`Value::Null`] if the document has
    /// no such field.
    ///
    /// The path may be dot-separated to descend into embedded documents;
    /// numeric segments index into arrays (`"items.0.name"`).
    pub fn get(&self, path: &str) -> Value {
        if let Some(value) = self.fields.get(path) {
            return value.clone();
        }
        if path.contains(FIELD_SEPARATOR) {
            return self.deep_get(path).unwrap_or(Value::Null);
        }
        Value::Null
    }

    fn deep_get(&self, path: &str) -> Option<Value> {
        let mut segments = path.split(FIELD_SEPARATOR);
        let first = segments.next()?;
        let mut current = self.fields.get(first)?.clone();

        for segment in segments {
            current = match current {
                Value::Document(doc) => doc.fields.get(segment)?.clone(),
                Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get(index)?.clone()
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Whether the document holds any value (including null) at `path`.
    pub fn contains_field(&self, path: &str) -> bool {
        if self.fields.contains_key(path) {
            return true;
        }
        if path.contains(FIELD_SEPARATOR) {
            return self.deep_get(path).is_some();
        }
        false
    }

    /// Removes a top-level field, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    /// The object identifier of this document, when it has been saved.
    pub fn oid(&self) -> Option<Oid> {
        match self.fields.get(DOC_ID) {
            Some(Value::ObjectId(oid)) => Some(*oid),
            _ => None,
        }
    }

    /// Sets the reserved `_id` field.
    pub fn set_oid(&mut self, oid: Oid) {
        self.fields.insert(DOC_ID.to_string(), Value::ObjectId(oid));
    }

    /// Iterates fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Top-level field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        // order-insensitive: field order is an encoding detail
        if self.fields.len() != other.fields.len() {
            return false;
        }
        self.fields
            .iter()
            .all(|(k, v)| other.fields.get(k) == Some(v))
    }
}

impl Eq for Document {}

impl PartialOrd for Document {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Document {
    fn cmp(&self, other: &Self) -> Ordering {
        // compare as sorted field sequences so the ordering agrees with Eq
        let mut left: Vec<_> = self.fields.iter().collect();
        let mut right: Vec<_> = other.fields.iter().collect();
        left.sort_by(|a, b| a.0.cmp(b.0));
        right.sort_by(|a, b| a.0.cmp(b.0));
        left.cmp(&right)
    }
}

impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut entries: Vec<_> = self.fields.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.hash(state);
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{}\": {}", key, value)?;
        }
        write!(f, "}}")
    }
}

/// Builds a [Document] from field/value pairs.
///
/// Nested braces become embedded documents and brackets become arrays:
///
/// ```ignore
/// let doc = doc! {
///     "name": "Alice",
///     "address": { "city": "New York", "zip": 10001 },
///     "tags": ["admin", "user"]
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::document::Document::new()
    };

    ($($key:literal : $value:tt),* $(,)?) => {
        {
            #[allow(unused_imports)]
            use $crate::doc_value;

            let mut doc = $crate::document::Document::new();
            $(
                doc.put($key, $crate::doc_value!($value))
                    .expect("failed to put value in document");
            )*
            doc
        }
    };
}

/// Helper for the [`doc!`] macro; converts nested documents, arrays and
/// expressions.
#[macro_export]
macro_rules! doc_value {
    ({ $($key:literal : $value:tt),* $(,)? }) => {
        $crate::document::Value::Document($crate::doc!{ $($key : $value),* })
    };

    ([ $($value:tt),* $(,)? ]) => {
        $crate::document::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    ($value:expr) => {
        $crate::document::Value::from($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_up() -> Document {
        doc! {
            "score": 1034,
            "location": {
                "state": "NY",
                "city": "New York",
                "address": {
                    "line1": "40",
                    "zip": 10001
                }
            },
            "category": ["food", "produce", "grocery"]
        }
    }

    #[test]
    fn test_put_and_get() {
        let mut doc = Document::new();
        doc.put("name", "Alice").unwrap();
        doc.put("age", 30i64).unwrap();
        assert_eq!(doc.get("name"), Value::from("Alice"));
        assert_eq!(doc.get("age"), Value::Int(30));
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut doc = Document::new();
        let err = doc.put("", 1).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_id_field_requires_oid() {
        let mut doc = Document::new();
        let err = doc.put(DOC_ID, "not an oid").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);

        let oid = Oid::generate();
        doc.put(DOC_ID, oid).unwrap();
        assert_eq!(doc.oid(), Some(oid));
    }

    #[test]
    fn test_deep_get() {
        let doc = set_up();
        assert_eq!(doc.get("location.city"), Value::from("New York"));
        assert_eq!(doc.get("location.address.zip"), Value::Int(10001));
        assert_eq!(doc.get("category.1"), Value::from("produce"));
        assert_eq!(doc.get("location.missing"), Value::Null);
        assert_eq!(doc.get("missing.path"), Value::Null);
    }

    #[test]
    fn test_contains_field() {
        let doc = set_up();
        assert!(doc.contains_field("score"));
        assert!(doc.contains_field("location.address.line1"));
        assert!(doc.contains_field("category.0"));
        assert!(!doc.contains_field("category.9"));
        assert!(!doc.contains_field("nope"));
    }

    #[test]
    fn test_remove() {
        let mut doc = set_up();
        assert!(doc.remove("score").is_some());
        assert_eq!(doc.get("score"), Value::Null);
        assert!(doc.remove("score").is_none());
    }

    #[test]
    fn test_field_order_preserved() {
        let doc = doc! { "b": 1, "a": 2, "c": 3 };
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_equality_ignores_field_order() {
        let one = doc! { "a": 1, "b": 2 };
        let two = doc! { "b": 2, "a": 1 };
        assert_eq!(one, two);

        let three = doc! { "a": 1, "b": 3 };
        assert_ne!(one, three);
    }

    #[test]
    fn test_set_oid() {
        let mut doc = doc! { "x": 1 };
        assert!(doc.oid().is_none());
        let oid = Oid::generate();
        doc.set_oid(oid);
        assert_eq!(doc.oid(), Some(oid));
    }

    #[test]
    fn test_doc_macro_nesting() {
        let doc = set_up();
        let address = doc.get("location.address");
        let address = address.as_document().unwrap();
        assert_eq!(address.get("line1"), Value::from("40"));

        let category = doc.get("category");
        assert_eq!(category.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_display() {
        let doc = doc! { "a": 1 };
        assert_eq!(format!("{}", doc), "{\"a\": 1}");
    }
}
