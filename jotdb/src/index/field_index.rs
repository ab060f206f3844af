use crate::document::{Oid, Value};
use crate::errors::{ErrorKind, JotError, JotResult};
use crate::index::{IndexDescriptor, IndexKind, IndexOptions};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

/// A secondary index over one field path.
///
/// The physical structure is an ordered map from normalised key values to
/// posting sets of object identifiers, which serves equality lookups,
/// range probes and prefix probes from the same structure. Keys order by
/// [`Value`]'s comparison semantics, which gives the string kind
/// byte-lexicographic order and the number kind exact numeric order.
///
/// The index never decides matches on its own; the query engine treats
/// posting sets as candidates and re-checks the decoded document. Values
/// whose shape does not fit the kind produce no entry (they are not
/// errors), and null or absent values never appear in the index.
///
/// Cloning shares the underlying structure.
#[derive(Clone)]
pub struct FieldIndex {
    inner: Arc<FieldIndexInner>,
}

struct FieldIndexInner {
    descriptor: IndexDescriptor,
    entries: RwLock<BTreeMap<Value, BTreeSet<Oid>>>,
}

impl FieldIndex {
    pub fn new(field_path: &str, options: IndexOptions) -> FieldIndex {
        FieldIndex {
            inner: Arc::new(FieldIndexInner {
                descriptor: IndexDescriptor::new(field_path, options),
                entries: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.inner.descriptor
    }

    pub fn field_path(&self) -> &str {
        self.inner.descriptor.field_path()
    }

    pub fn options(&self) -> IndexOptions {
        self.inner.descriptor.options()
    }

    /// Normalises a document field value into the keys this index stores
    /// for it.
    ///
    /// Every kind also indexes the fitting elements of an array value;
    /// queries use containment semantics for array fields, so an index
    /// that skipped array elements would hide matches from the probe
    /// path. Values that do not fit the kind produce no key.
    fn keys_for(&self, value: &Value) -> Vec<Value> {
        let fits: fn(&Value) -> bool = match self.options().kind() {
            IndexKind::String => |v| matches!(v, Value::String(_)),
            IndexKind::Number => |v| matches!(v, Value::Int(_) | Value::Double(_)),
            IndexKind::Array => {
                |v| matches!(v, Value::String(_) | Value::Int(_) | Value::Double(_) | Value::Bool(_))
            }
        };
        match value {
            Value::Array(items) => items.iter().filter(|item| fits(item)).cloned().collect(),
            scalar if fits(scalar) => vec![scalar.clone()],
            _ => vec![],
        }
    }

    /// Adds the entries for a document's field value.
    ///
    /// A unique index rejects a key already mapped to a different
    /// identifier with [`ErrorKind::UniqueViolation`], leaving the index
    /// unchanged.
    pub fn insert_entry(&self, value: &Value, oid: &Oid) -> JotResult<()> {
        let keys = self.keys_for(value);
        if keys.is_empty() {
            return Ok(());
        }

        let mut entries = self.inner.entries.write();
        if self.options().is_unique() {
            for key in &keys {
                if let Some(existing) = entries.get(key) {
                    if existing.iter().any(|other| other != oid) {
                        log::error!(
                            "Unique constraint violated on {} for value {}",
                            self.descriptor(),
                            key
                        );
                        return Err(JotError::new(
                            &format!(
                                "Unique constraint violated on {} for value {}",
                                self.descriptor(),
                                key
                            ),
                            ErrorKind::UniqueViolation,
                        ));
                    }
                }
            }
        }
        for key in keys {
            entries.entry(key).or_default().insert(*oid);
        }
        Ok(())
    }

    /// Checks whether inserting `value` for `oid` would violate the
    /// unique constraint, without mutating the index. Used by the
    /// collection's pre-write check.
    pub fn check_unique(&self, value: &Value, oid: Option<&Oid>) -> JotResult<()> {
        if !self.options().is_unique() {
            return Ok(());
        }
        let entries = self.inner.entries.read();
        for key in self.keys_for(value) {
            if let Some(existing) = entries.get(&key) {
                if existing.iter().any(|other| Some(other) != oid) {
                    return Err(JotError::new(
                        &format!(
                            "Unique constraint violated on {} for value {}",
                            self.descriptor(),
                            key
                        ),
                        ErrorKind::UniqueViolation,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Removes the entries for a document's field value. Empty posting
    /// sets are pruned.
    pub fn remove_entry(&self, value: &Value, oid: &Oid) {
        let keys = self.keys_for(value);
        if keys.is_empty() {
            return;
        }
        let mut entries = self.inner.entries.write();
        for key in keys {
            if let Some(set) = entries.get_mut(&key) {
                set.remove(oid);
                if set.is_empty() {
                    entries.remove(&key);
                }
            }
        }
    }

    /// Identifiers whose indexed value equals `value`.
    pub fn lookup(&self, value: &Value) -> Vec<Oid> {
        let entries = self.inner.entries.read();
        entries
            .get(value)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Identifiers whose indexed value lies within the bounds.
    pub fn lookup_range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Vec<Oid> {
        let entries = self.inner.entries.read();
        let mut out = BTreeSet::new();
        for (_, set) in entries.range::<Value, _>((lower, upper)) {
            out.extend(set.iter().copied());
        }
        out.into_iter().collect()
    }

    /// Identifiers whose indexed string value starts with `prefix`.
    pub fn lookup_prefix(&self, prefix: &str) -> Vec<Oid> {
        let entries = self.inner.entries.read();
        let start = Value::String(prefix.to_string());
        let mut out = BTreeSet::new();
        for (key, set) in entries.range::<Value, _>((Bound::Included(&start), Bound::Unbounded)) {
            match key.as_str() {
                Some(text) if text.starts_with(prefix) => out.extend(set.iter().copied()),
                _ => break,
            }
        }
        out.into_iter().collect()
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.entries.write().clear();
    }
}
