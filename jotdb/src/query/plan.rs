//! Index selection for query branches.
//!
//! A probe is only chosen when the index provably covers every document
//! the constraint could match; the executor still re-checks every
//! candidate, so the planner's job is narrowing, not correctness.

use std::collections::BTreeSet;
use std::ops::Bound;

use crate::collection::Collection;
use crate::document::{Oid, Value};
use crate::index::{FieldIndex, IndexKind};
use crate::query::spec::{BranchSpec, ConstraintOp};

/// How a single index is consulted.
#[derive(Debug, Clone)]
pub(crate) enum ProbeKind {
    Eq(Value),
    In(Vec<Value>),
    Range {
        lower: Bound<Value>,
        upper: Bound<Value>,
    },
    Prefix(String),
}

impl ProbeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProbeKind::Eq(_) => "eq",
            ProbeKind::In(_) => "in",
            ProbeKind::Range { .. } => "range",
            ProbeKind::Prefix(_) => "prefix",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IndexProbe {
    pub path: String,
    pub kind: ProbeKind,
}

impl IndexProbe {
    /// Candidate identifiers for this probe.
    pub fn run(&self, index: &FieldIndex) -> BTreeSet<Oid> {
        let hits = match &self.kind {
            ProbeKind::Eq(value) => index.lookup(value),
            ProbeKind::In(values) => values
                .iter()
                .flat_map(|value| index.lookup(value))
                .collect(),
            ProbeKind::Range { lower, upper } => {
                index.lookup_range(as_bound_ref(lower), as_bound_ref(upper))
            }
            ProbeKind::Prefix(prefix) => index.lookup_prefix(prefix),
        };
        hits.into_iter().collect()
    }
}

fn as_bound_ref(bound: &Bound<Value>) -> Bound<&Value> {
    match bound {
        Bound::Included(value) => Bound::Included(value),
        Bound::Excluded(value) => Bound::Excluded(value),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// The access path chosen for one branch.
#[derive(Debug, Clone)]
pub(crate) enum BranchPlan {
    /// Intersect the probes' candidates, then re-check each document.
    Probes(Vec<IndexProbe>),
    /// No usable index; every record is decoded and checked.
    FullScan,
}

/// Picks index probes for a branch. Each constrained field with a
/// suitable index contributes one probe; a branch with no usable index
/// at all falls back to a full scan.
pub(crate) fn plan_branch(collection: &Collection, branch: &BranchSpec) -> BranchPlan {
    let mut probes = Vec::new();

    for constraint in &branch.constraints {
        let Some(index) = collection.index_for(&constraint.path) else {
            continue;
        };
        let kind = index.options().kind();
        if let Some(probe) = plan_constraint(kind, &constraint.ops) {
            probes.push(IndexProbe {
                path: constraint.path.clone(),
                kind: probe,
            });
        }
    }

    if probes.is_empty() {
        BranchPlan::FullScan
    } else {
        BranchPlan::Probes(probes)
    }
}

fn plan_constraint(kind: IndexKind, ops: &[ConstraintOp]) -> Option<ProbeKind> {
    // an equality probe beats a range probe, so scan for one first
    for op in ops {
        match op {
            ConstraintOp::Eq(value) => {
                if let Some(probe) = plan_eq(kind, value) {
                    return Some(probe);
                }
            }
            ConstraintOp::In(values) => {
                // every member must be covered or out-of-class members
                // could match documents the index never saw
                if !values.is_empty() && values.iter().all(|v| fits_kind(kind, v)) {
                    return Some(ProbeKind::In(values.clone()));
                }
            }
            _ => {}
        }
    }

    if kind != IndexKind::Array {
        if let Some(range) = plan_range(kind, ops) {
            return Some(range);
        }
        if kind == IndexKind::String {
            for op in ops {
                if let ConstraintOp::Begin(prefix) = op {
                    return Some(ProbeKind::Prefix(prefix.clone()));
                }
            }
        }
    }

    None
}

fn plan_eq(kind: IndexKind, value: &Value) -> Option<ProbeKind> {
    if fits_kind(kind, value) {
        return Some(ProbeKind::Eq(value.clone()));
    }
    // equality against a whole array can be narrowed through the
    // elements the index stores
    if let Value::Array(items) = value {
        if !items.is_empty() && items.iter().all(|item| fits_kind(kind, item)) {
            return Some(ProbeKind::In(items.clone()));
        }
    }
    None
}

fn plan_range(kind: IndexKind, ops: &[ConstraintOp]) -> Option<ProbeKind> {
    let mut lower = Bound::Unbounded;
    let mut upper = Bound::Unbounded;

    for op in ops {
        match op {
            ConstraintOp::Gt(value) if fits_kind(kind, value) => {
                lower = tighten_lower(lower, Bound::Excluded(value.clone()));
            }
            ConstraintOp::Gte(value) if fits_kind(kind, value) => {
                lower = tighten_lower(lower, Bound::Included(value.clone()));
            }
            ConstraintOp::Lt(value) if fits_kind(kind, value) => {
                upper = tighten_upper(upper, Bound::Excluded(value.clone()));
            }
            ConstraintOp::Lte(value) if fits_kind(kind, value) => {
                upper = tighten_upper(upper, Bound::Included(value.clone()));
            }
            _ => {}
        }
    }

    if matches!((&lower, &upper), (Bound::Unbounded, Bound::Unbounded)) {
        None
    } else {
        Some(ProbeKind::Range { lower, upper })
    }
}

fn tighten_lower(current: Bound<Value>, candidate: Bound<Value>) -> Bound<Value> {
    match (&current, &candidate) {
        (Bound::Unbounded, _) => candidate,
        (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b) | Bound::Excluded(b)) => {
            if b > a || (b == a && matches!(candidate, Bound::Excluded(_))) {
                candidate
            } else {
                current
            }
        }
        (_, Bound::Unbounded) => current,
    }
}

fn tighten_upper(current: Bound<Value>, candidate: Bound<Value>) -> Bound<Value> {
    match (&current, &candidate) {
        (Bound::Unbounded, _) => candidate,
        (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b) | Bound::Excluded(b)) => {
            if b < a || (b == a && matches!(candidate, Bound::Excluded(_))) {
                candidate
            } else {
                current
            }
        }
        (_, Bound::Unbounded) => current,
    }
}

/// Whether a constraint value can only match documents the index of
/// this kind has entries for.
fn fits_kind(kind: IndexKind, value: &Value) -> bool {
    match kind {
        IndexKind::String => matches!(value, Value::String(_)),
        IndexKind::Number => value.is_number(),
        IndexKind::Array => matches!(
            value,
            Value::String(_) | Value::Int(_) | Value::Double(_) | Value::Bool(_)
        ),
    }
}
