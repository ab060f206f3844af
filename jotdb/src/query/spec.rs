//! Compilation of query documents into constraint form, and predicate
//! evaluation against decoded documents. The compiled form is what the
//! planner inspects for index opportunities and what the executor uses
//! as the authoritative match check.

use std::fmt;

use crate::common::{SortOrder, DOC_ID, FIELD_SEPARATOR, UPSERT_KEY};
use crate::document::{Document, Value};
use crate::errors::{ErrorKind, JotError, JotResult};
use crate::query::Query;

/// A single operator applied to one field path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConstraintOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Begin(String),
    Exists(bool),
}

impl fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintOp::Eq(_) => "eq",
            ConstraintOp::Ne(_) => "ne",
            ConstraintOp::Gt(_) => "gt",
            ConstraintOp::Gte(_) => "gte",
            ConstraintOp::Lt(_) => "lt",
            ConstraintOp::Lte(_) => "lte",
            ConstraintOp::In(_) => "in",
            ConstraintOp::Nin(_) => "nin",
            ConstraintOp::Begin(_) => "begin",
            ConstraintOp::Exists(_) => "exists",
        };
        write!(f, "{}", name)
    }
}

/// All operators constraining one field path; a document satisfies the
/// constraint only if it satisfies every operator.
#[derive(Debug, Clone)]
pub(crate) struct FieldConstraint {
    pub path: String,
    pub ops: Vec<ConstraintOp>,
}

/// One conjunctive branch: the primary spec or a single OR branch.
#[derive(Debug, Clone)]
pub(crate) struct BranchSpec {
    pub constraints: Vec<FieldConstraint>,
}

/// The fully compiled query.
#[derive(Debug, Clone)]
pub(crate) struct CompiledQuery {
    pub primary: BranchSpec,
    pub branches: Vec<BranchSpec>,
    /// Set when the primary spec carried `$upsert`. Holds the document
    /// to insert on a miss, or `None` inside the `Some` when the key
    /// was present without a usable document (insert is derived from
    /// the spec's equality fields instead).
    pub upsert: Option<Option<Document>>,
}

impl CompiledQuery {
    /// The authoritative predicate: matches if the primary branch or
    /// any OR branch matches.
    pub fn matches(&self, document: &Document) -> bool {
        self.primary.matches(document)
            || self.branches.iter().any(|branch| branch.matches(document))
    }

    /// Document inserted when an upsert query matched nothing.
    pub fn upsert_document(&self) -> Option<Document> {
        match &self.upsert {
            None => None,
            Some(Some(doc)) => Some(doc.clone()),
            Some(None) => {
                let mut derived = Document::new();
                for constraint in &self.primary.constraints {
                    for op in &constraint.ops {
                        if let ConstraintOp::Eq(value) = op {
                            // nested paths cannot be rebuilt into a document
                            if !constraint.path.contains(FIELD_SEPARATOR) {
                                let _ = derived.put(&constraint.path, value.clone());
                            }
                        }
                    }
                }
                Some(derived)
            }
        }
    }
}

impl BranchSpec {
    pub fn matches(&self, document: &Document) -> bool {
        self.constraints
            .iter()
            .all(|constraint| constraint.matches(document))
    }
}

impl FieldConstraint {
    pub fn matches(&self, document: &Document) -> bool {
        let value = document.get(&self.path);
        let present = document.contains_field(&self.path);
        self.ops.iter().all(|op| op_matches(op, &value, present))
    }
}

fn op_matches(op: &ConstraintOp, value: &Value, present: bool) -> bool {
    match op {
        ConstraintOp::Exists(wanted) => present == *wanted,
        ConstraintOp::Eq(target) => value_matches(value, |v| v == target),
        ConstraintOp::Ne(target) => !value_matches(value, |v| v == target),
        ConstraintOp::Gt(target) => {
            value_matches(value, |v| comparable(v, target) && v > target)
        }
        ConstraintOp::Gte(target) => {
            value_matches(value, |v| comparable(v, target) && v >= target)
        }
        ConstraintOp::Lt(target) => {
            value_matches(value, |v| comparable(v, target) && v < target)
        }
        ConstraintOp::Lte(target) => {
            value_matches(value, |v| comparable(v, target) && v <= target)
        }
        ConstraintOp::In(candidates) => {
            value_matches(value, |v| candidates.iter().any(|c| c == v))
        }
        ConstraintOp::Nin(candidates) => {
            !value_matches(value, |v| candidates.iter().any(|c| c == v))
        }
        ConstraintOp::Begin(prefix) => value_matches(value, |v| {
            v.as_str().map(|s| s.starts_with(prefix.as_str())).unwrap_or(false)
        }),
    }
}

/// Applies a predicate with containment semantics: an array field
/// matches if the array itself matches or any of its elements does.
fn value_matches<F: Fn(&Value) -> bool>(value: &Value, pred: F) -> bool {
    if pred(value) {
        return true;
    }
    match value {
        Value::Array(items) => items.iter().any(|item| pred(item)),
        _ => false,
    }
}

/// Ordered comparisons only apply within a comparison class; a string
/// is never greater than a number just because of how unrelated types
/// order among themselves.
fn comparable(a: &Value, b: &Value) -> bool {
    if a.is_number() && b.is_number() {
        return true;
    }
    matches!(
        (a, b),
        (Value::String(_), Value::String(_))
            | (Value::DateTime(_), Value::DateTime(_))
            | (Value::ObjectId(_), Value::ObjectId(_))
            | (Value::Bool(_), Value::Bool(_))
    )
}

/// Hints controlling ordering, projection and paging.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryHints {
    pub order_by: Vec<(String, SortOrder)>,
    pub projection: Option<Vec<String>>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl QueryHints {
    pub fn parse(hints: Option<&Document>) -> JotResult<QueryHints> {
        let mut parsed = QueryHints::default();
        let Some(hints) = hints else {
            return Ok(parsed);
        };

        for (key, value) in hints.iter() {
            match key {
                "$orderby" => parsed.order_by = parse_order_by(value)?,
                "$fields" => parsed.projection = Some(parse_projection(value)?),
                "$skip" => parsed.skip = parse_count(key, value)?,
                "$max" => parsed.limit = Some(parse_count(key, value)?),
                other => {
                    return Err(malformed(format!("unknown query hint '{}'", other)));
                }
            }
        }
        Ok(parsed)
    }
}

fn parse_order_by(value: &Value) -> JotResult<Vec<(String, SortOrder)>> {
    let Value::Document(spec) = value else {
        return Err(malformed("$orderby must be a document".to_string()));
    };
    let mut order = Vec::with_capacity(spec.len());
    for (path, direction) in spec.iter() {
        let parsed = direction
            .as_i64()
            .and_then(SortOrder::from_direction)
            .ok_or_else(|| {
                malformed(format!(
                    "$orderby direction for '{}' must be a non-zero integer",
                    path
                ))
            })?;
        order.push((path.to_string(), parsed));
    }
    Ok(order)
}

fn parse_projection(value: &Value) -> JotResult<Vec<String>> {
    let Value::Document(spec) = value else {
        return Err(malformed("$fields must be a document".to_string()));
    };
    let mut fields = Vec::with_capacity(spec.len());
    for (path, include) in spec.iter() {
        if include.as_i64().map(|i| i > 0) != Some(true) {
            return Err(malformed(format!(
                "$fields only supports inclusive projection, got '{}' for '{}'",
                include, path
            )));
        }
        if path.contains(FIELD_SEPARATOR) {
            return Err(malformed(format!(
                "$fields projects top-level fields, '{}' is a nested path",
                path
            )));
        }
        if path != DOC_ID {
            fields.push(path.to_string());
        }
    }
    Ok(fields)
}

fn parse_count(key: &str, value: &Value) -> JotResult<usize> {
    value
        .as_i64()
        .filter(|count| *count >= 0)
        .map(|count| count as usize)
        .ok_or_else(|| malformed(format!("{} must be a non-negative integer", key)))
}

/// Compiles a query's spec documents into constraint form.
pub(crate) fn compile(query: &Query) -> JotResult<CompiledQuery> {
    let mut upsert = None;
    let primary = compile_branch(query.spec(), Some(&mut upsert))?;
    let branches = query
        .branches()
        .iter()
        .map(|branch| compile_branch(branch, None))
        .collect::<JotResult<Vec<_>>>()?;

    Ok(CompiledQuery {
        primary,
        branches,
        upsert,
    })
}

fn compile_branch(
    spec: &Document,
    mut upsert: Option<&mut Option<Option<Document>>>,
) -> JotResult<BranchSpec> {
    let mut constraints = Vec::new();

    for (key, value) in spec.iter() {
        if key == UPSERT_KEY {
            match upsert.as_deref_mut() {
                Some(slot) => {
                    *slot = Some(match value {
                        Value::Document(doc) => Some(doc.clone()),
                        _ => None,
                    });
                    continue;
                }
                None => {
                    return Err(malformed(
                        "$upsert is only valid in the primary spec".to_string(),
                    ));
                }
            }
        }
        if key.starts_with('$') {
            return Err(malformed(format!("unknown top-level operator '{}'", key)));
        }
        constraints.push(FieldConstraint {
            path: key.to_string(),
            ops: compile_ops(key, value)?,
        });
    }

    Ok(BranchSpec { constraints })
}

fn compile_ops(path: &str, value: &Value) -> JotResult<Vec<ConstraintOp>> {
    let Value::Document(spec) = value else {
        // a bare value is equality
        return Ok(vec![ConstraintOp::Eq(value.clone())]);
    };

    let operator_keys = spec.keys().filter(|key| key.starts_with('$')).count();
    if operator_keys == 0 {
        // a document with no operator keys is compared as a value
        return Ok(vec![ConstraintOp::Eq(value.clone())]);
    }
    if operator_keys != spec.len() {
        return Err(malformed(format!(
            "field '{}' mixes operators with plain keys",
            path
        )));
    }

    let mut ops = Vec::with_capacity(spec.len());
    for (op, operand) in spec.iter() {
        let compiled = match op {
            "$gt" => ConstraintOp::Gt(operand.clone()),
            "$gte" => ConstraintOp::Gte(operand.clone()),
            "$lt" => ConstraintOp::Lt(operand.clone()),
            "$lte" => ConstraintOp::Lte(operand.clone()),
            "$ne" => ConstraintOp::Ne(operand.clone()),
            "$begin" => match operand.as_str() {
                Some(prefix) => ConstraintOp::Begin(prefix.to_string()),
                None => {
                    return Err(malformed(format!(
                        "$begin on '{}' requires a string operand",
                        path
                    )));
                }
            },
            "$exists" => match operand {
                Value::Bool(wanted) => ConstraintOp::Exists(*wanted),
                _ => {
                    return Err(malformed(format!(
                        "$exists on '{}' requires a boolean operand",
                        path
                    )));
                }
            },
            "$in" | "$nin" => match operand {
                Value::Array(items) => {
                    if op == "$in" {
                        ConstraintOp::In(items.clone())
                    } else {
                        ConstraintOp::Nin(items.clone())
                    }
                }
                _ => {
                    return Err(malformed(format!(
                        "{} on '{}' requires an array operand",
                        op, path
                    )));
                }
            },
            unknown => {
                return Err(malformed(format!(
                    "unknown operator '{}' on field '{}'",
                    unknown, path
                )));
            }
        };
        ops.push(compiled);
    }
    Ok(ops)
}

fn malformed(message: String) -> JotError {
    log::error!("{}", message);
    JotError::new(&message, ErrorKind::MalformedQuery)
}
