use crate::document::{Document, Oid};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;

/// Compare two doubles with total ordering; NaN sorts greater than all
/// other values.
#[inline]
fn num_cmp_double(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Compare an integer against a double by numeric value, without going
/// through a lossy conversion of the integer.
#[inline]
fn num_cmp_int_double(a: i64, b: f64) -> Ordering {
    if b.is_nan() {
        return Ordering::Less;
    }
    if b > i64::MAX as f64 {
        return Ordering::Less;
    }
    if b < i64::MIN as f64 {
        return Ordering::Greater;
    }
    let truncated = b.trunc() as i64;
    match a.cmp(&truncated) {
        Ordering::Equal => {
            let fraction = b - b.trunc();
            if fraction > 0.0 {
                Ordering::Less
            } else if fraction < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}

/// A single [Document] value.
///
/// `Value` is the unified representation for everything a document can
/// hold: scalars (null, boolean, 64-bit integer, IEEE-754 double, UTF-8
/// string, binary blob, object identifier, millisecond timestamp) and the
/// two composites (embedded document, ordered array).
///
/// Integers and doubles compare by numeric value, not representation, so
/// `Value::Int(2) == Value::Double(2.0)` and a number index treats them as
/// the same key. The ordering is total: NaN sorts above every other
/// number, and values of different non-numeric types order by a fixed
/// type rank so they can live together in one index map.
#[derive(Clone, Default, serde::Deserialize, serde::Serialize)]
pub enum Value {
    /// Represents a null value.
    #[default]
    Null,
    /// Represents a boolean value.
    Bool(bool),
    /// Represents a signed 64-bit integer value.
    Int(i64),
    /// Represents a 64-bit floating point value.
    Double(f64),
    /// Represents a UTF-8 string value. May contain embedded NUL bytes.
    String(String),
    /// Represents a binary blob. Not indexable.
    Bytes(Vec<u8>),
    /// Represents an object identifier reference.
    ObjectId(Oid),
    /// Represents a timestamp, milliseconds since the Unix epoch.
    DateTime(i64),
    /// Represents an embedded document.
    Document(Document),
    /// Represents an ordered array of values.
    Array(Vec<Value>),
}

impl Value {
    /// Fixed rank used to order values of different types.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Double(_) => 2,
            Value::String(_) => 3,
            Value::Bytes(_) => 4,
            Value::ObjectId(_) => 5,
            Value::DateTime(_) => 6,
            Value::Document(_) => 7,
            Value::Array(_) => 8,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of this value, when it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<&Oid> {
        match self {
            Value::ObjectId(oid) => Some(oid),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::ObjectId(_) => "objectid",
            Value::DateTime(_) => "datetime",
            Value::Document(_) => "document",
            Value::Array(_) => "array",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => num_cmp_double(*a, *b),
            (Value::Int(a), Value::Double(b)) => num_cmp_int_double(*a, *b),
            (Value::Double(a), Value::Int(b)) => num_cmp_int_double(*b, *a).reverse(),
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::ObjectId(a), Value::ObjectId(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Document(a), Value::Document(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => "null_value".hash(state),
            Value::Bool(b) => b.hash(state),
            // numbers hash by numeric value so Int(2) and Double(2.0)
            // collide, matching Eq
            Value::Int(i) => i.hash(state),
            Value::Double(d) => {
                if d.is_nan() {
                    // all NaNs compare equal, so they must hash alike
                    f64::NAN.to_bits().hash(state)
                } else if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
                    (*d as i64).hash(state)
                } else {
                    d.to_bits().hash(state)
                }
            }
            Value::String(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::ObjectId(oid) => oid.hash(state),
            Value::DateTime(ts) => ts.hash(state),
            Value::Document(doc) => doc.hash(state),
            Value::Array(items) => items.hash(state),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Value::ObjectId(oid) => write!(f, "oid(\"{}\")", oid),
            Value::DateTime(ts) => write!(f, "datetime({})", ts),
            Value::Document(doc) => write!(f, "{}", doc),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Double(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Oid> for Value {
    fn from(value: Oid) -> Self {
        Value::ObjectId(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Document(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        Value::DateTime(value.timestamp_millis())
    }
}

impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}

/// Builds a [Value] from any convertible expression.
#[macro_export]
macro_rules! val {
    ($value:expr) => {
        $crate::document::Value::from($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::Hasher;

    fn hash_of(value: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_cross_type_numeric_equality() {
        assert_eq!(Value::Int(2), Value::Double(2.0));
        assert_ne!(Value::Int(2), Value::Double(2.5));
        assert_eq!(hash_of(&Value::Int(2)), hash_of(&Value::Double(2.0)));
    }

    #[test]
    fn test_nan_payloads_hash_alike() {
        let quiet = Value::Double(f64::NAN);
        let payload = Value::Double(f64::from_bits(0x7ff8_0000_0000_0001));
        assert_eq!(quiet, payload);
        assert_eq!(hash_of(&quiet), hash_of(&payload));
    }

    #[test]
    fn test_cross_type_numeric_ordering() {
        assert!(Value::Int(2) < Value::Double(2.5));
        assert!(Value::Double(2.5) < Value::Int(3));
        assert!(Value::Int(i64::MAX) < Value::Double(f64::INFINITY));
        assert!(Value::Double(f64::NEG_INFINITY) < Value::Int(i64::MIN));
    }

    #[test]
    fn test_nan_sorts_greatest_among_numbers() {
        assert!(Value::Double(f64::NAN) > Value::Double(f64::INFINITY));
        assert!(Value::Int(i64::MAX) < Value::Double(f64::NAN));
        assert_eq!(
            Value::Double(f64::NAN).cmp(&Value::Double(f64::NAN)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_large_int_precision() {
        // i64::MAX cannot be represented as f64; comparing through a
        // lossy as-cast would misorder these
        let int = Value::Int(i64::MAX);
        let double = Value::Double(9007199254740993.0);
        assert!(double < int);
    }

    #[test]
    fn test_type_rank_ordering() {
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Bool(true) < Value::Int(0));
        assert!(Value::Int(9999) < Value::String("a".to_string()));
        assert!(Value::String("z".to_string()) < Value::Array(vec![]));
    }

    #[test]
    fn test_string_ordering_is_byte_lexicographic() {
        assert!(Value::from("abc") < Value::from("abd"));
        assert!(Value::from("ab") < Value::from("abc"));
        assert!(Value::from("a\u{0}b") < Value::from("a\u{1}"));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Int(5).as_i64(), Some(5));
        assert_eq!(Value::Int(5).as_f64(), Some(5.0));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert!(Value::Null.is_null());
        assert!(Value::from("hi").as_i64().is_none());
    }

    #[test]
    fn test_from_impls() {
        assert_eq!(val!(42), Value::Int(42));
        assert_eq!(val!(1.5), Value::Double(1.5));
        assert_eq!(val!("x"), Value::String("x".to_string()));
        assert_eq!(val!(true), Value::Bool(true));
        let oid = Oid::generate();
        assert_eq!(val!(oid).as_object_id(), Some(&oid));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Value::Null), "null");
        assert_eq!(format!("{}", Value::Int(3)), "3");
        assert_eq!(format!("{}", Value::from("a")), "\"a\"");
        assert_eq!(
            format!("{}", Value::Array(vec![val!(1), val!(2)])),
            "[1, 2]"
        );
    }
}
