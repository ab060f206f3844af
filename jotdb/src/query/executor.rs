//! Query execution: candidate selection, authoritative matching,
//! ordering, paging, projection and upsert handling.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::codec;
use crate::collection::Collection;
use crate::common::SortOrder;
use crate::document::{Document, Oid, Value};
use crate::errors::{ErrorKind, JotError, JotResult};
use crate::query::plan::{plan_branch, BranchPlan};
use crate::query::spec::{self, CompiledQuery, QueryHints};
use crate::query::{flags, Query, ResultSet};

/// The result of executing a query.
///
/// Always carries the match count; carries a [`ResultSet`] unless the
/// query ran count-only, and an explain document when one was asked
/// for.
#[derive(Debug)]
pub struct QueryOutcome {
    count: u64,
    result_set: Option<ResultSet>,
    explain: Option<Document>,
}

impl QueryOutcome {
    /// An outcome with no matches, as produced by querying a collection
    /// that does not exist.
    pub(crate) fn empty(count_only: bool) -> QueryOutcome {
        QueryOutcome {
            count: 0,
            result_set: (!count_only).then(|| ResultSet::new(Vec::new(), None)),
            explain: None,
        }
    }

    /// Number of documents the query selected (after paging).
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn result_set(&self) -> Option<&ResultSet> {
        self.result_set.as_ref()
    }

    pub fn explain(&self) -> Option<&Document> {
        self.explain.as_ref()
    }

    /// Consumes the outcome, yielding its result set. Fails when the
    /// query was executed count-only.
    pub fn into_result_set(self) -> JotResult<ResultSet> {
        self.result_set.ok_or_else(|| {
            JotError::new(
                "query was executed count-only and has no result set",
                ErrorKind::InvalidArgument,
            )
        })
    }
}

/// Executes a query against a collection.
pub fn execute(collection: &Collection, query: &Query, flag_bits: u32) -> JotResult<QueryOutcome> {
    let compiled = spec::compile(query)?;
    let hints = QueryHints::parse(query.hint_document())?;
    let count_only = flag_bits & flags::COUNT_ONLY != 0;
    let first_only = flag_bits & flags::FIRST_ONLY != 0;
    let explain_requested = flag_bits & flags::EXPLAIN != 0;

    let mut report = explain_requested.then(Document::new);
    let mut results = collect_matches(collection, &compiled, &hints, first_only, report.as_mut())?;

    // the read guard is released here, so an upsert can take the write
    // path through the normal save
    let mut upserted = false;
    if results.is_empty() {
        if let Some(document) = compiled.upsert_document() {
            let oid = collection.save(document)?;
            results.push(collection.load(&oid)?);
            upserted = true;
        }
    }

    if !hints.order_by.is_empty() {
        sort_documents(&mut results, &hints.order_by);
    }
    if !upserted {
        apply_paging(&mut results, &hints, first_only);
    }

    if let Some(report) = report.as_mut() {
        report.put("returned", results.len() as i64)?;
        report.put("upserted", upserted)?;
    }

    let count = results.len() as u64;
    let result_set = if count_only {
        None
    } else {
        let mut rows = Vec::with_capacity(results.len());
        for document in &results {
            let projected = apply_projection(document, hints.projection.as_deref())?;
            rows.push(codec::encode(&projected)?);
        }
        Some(ResultSet::new(rows, report.clone()))
    };

    Ok(QueryOutcome {
        count,
        result_set,
        explain: report,
    })
}

/// Gathers every document the compiled query matches, under the
/// collection's read lock.
fn collect_matches(
    collection: &Collection,
    compiled: &CompiledQuery,
    hints: &QueryHints,
    first_only: bool,
    mut report: Option<&mut Document>,
) -> JotResult<Vec<Document>> {
    let _guard = collection.read_guard();

    let mut full_scan = false;
    let mut candidates: BTreeSet<Oid> = BTreeSet::new();
    let mut branch_reports = Vec::new();

    let branches = std::iter::once(&compiled.primary).chain(compiled.branches.iter());
    for branch in branches {
        match plan_branch(collection, branch) {
            BranchPlan::FullScan => {
                full_scan = true;
                if report.is_some() {
                    branch_reports.push(Value::Document(crate::doc!("scan": true)));
                }
            }
            BranchPlan::Probes(probes) => {
                let mut narrowed: Option<BTreeSet<Oid>> = None;
                let mut probe_reports = Vec::new();
                for probe in &probes {
                    let Some(index) = collection.index_for(&probe.path) else {
                        // index dropped since planning; this branch can
                        // no longer be narrowed
                        narrowed = None;
                        full_scan = true;
                        break;
                    };
                    let hits = probe.run(&index);
                    if report.is_some() {
                        probe_reports.push(Value::Document(
                            crate::doc!("field": (probe.path.as_str()), "probe": (probe.kind.name())),
                        ));
                    }
                    narrowed = Some(match narrowed {
                        None => hits,
                        Some(acc) => acc.intersection(&hits).copied().collect(),
                    });
                }
                if let Some(branch_candidates) = narrowed {
                    if report.is_some() {
                        let mut entry = Document::new();
                        entry.put("scan", false)?;
                        entry.put("probes", Value::Array(probe_reports))?;
                        entry.put("candidates", branch_candidates.len() as i64)?;
                        branch_reports.push(Value::Document(entry));
                    }
                    candidates.extend(branch_candidates);
                }
            }
        }
    }

    // without an explicit order the scan can stop once enough matches
    // exist to satisfy skip and limit
    let stop_after = if hints.order_by.is_empty() {
        effective_limit(hints, first_only).map(|limit| hints.skip.saturating_add(limit))
    } else {
        None
    };

    let scan_order: Vec<Oid> = if full_scan {
        collection.store().oids()
    } else {
        candidates.into_iter().collect()
    };

    let mut results = Vec::new();
    let mut examined = 0u64;
    for oid in scan_order {
        if stop_after.is_some_and(|stop| results.len() >= stop) {
            break;
        }
        let document = match collection.load_locked(&oid) {
            Ok(document) => document,
            Err(error) if error.kind() == &ErrorKind::NotFound => continue,
            Err(error) => return Err(error),
        };
        examined += 1;
        if compiled.matches(&document) {
            results.push(document);
        }
    }

    if let Some(report) = report.as_deref_mut() {
        report.put("branches", Value::Array(branch_reports))?;
        report.put("full_scan", full_scan)?;
        report.put("examined", examined as i64)?;
        report.put("matched", results.len() as i64)?;
    }
    Ok(results)
}

fn effective_limit(hints: &QueryHints, first_only: bool) -> Option<usize> {
    if first_only {
        Some(hints.limit.map_or(1, |limit| limit.min(1)))
    } else {
        hints.limit
    }
}

fn sort_documents(documents: &mut [Document], order_by: &[(String, SortOrder)]) {
    documents.sort_by(|a, b| {
        for (path, order) in order_by {
            let ordering = a.get(path).cmp(&b.get(path));
            let ordering = match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn apply_paging(results: &mut Vec<Document>, hints: &QueryHints, first_only: bool) {
    if hints.skip > 0 {
        if hints.skip >= results.len() {
            results.clear();
        } else {
            results.drain(..hints.skip);
        }
    }
    if let Some(limit) = effective_limit(hints, first_only) {
        results.truncate(limit);
    }
}

/// Restricts a document to the projected fields. The identifier always
/// survives projection.
fn apply_projection(document: &Document, projection: Option<&[String]>) -> JotResult<Document> {
    let Some(fields) = projection else {
        return Ok(document.clone());
    };
    let mut projected = Document::new();
    if let Some(oid) = document.oid() {
        projected.set_oid(oid);
    }
    for field in fields {
        if document.contains_field(field) {
            projected.put(field, document.get(field))?;
        }
    }
    Ok(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionOptions;
    use crate::doc;
    use crate::index::{IndexKind, IndexOptions};
    use crate::val;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, Collection) {
        let dir = TempDir::new().unwrap();
        let store = crate::store::RecordStore::open(&dir.path().join("people.jdc"), true, false)
            .unwrap();
        let collection = Collection::new("people", store, CollectionOptions::default(), false);
        (dir, collection)
    }

    fn seed(collection: &Collection) -> Vec<Oid> {
        let docs = vec![
            doc!("name": "alice", "age": 30, "tags": ["admin", "dev"]),
            doc!("name": "bob", "age": 25, "tags": ["dev"]),
            doc!("name": "carol", "age": 41, "tags": ["ops"]),
            doc!("name": "dave", "age": 25),
        ];
        docs.into_iter()
            .map(|doc| collection.save(doc).unwrap())
            .collect()
    }

    #[test]
    fn test_full_scan_equality() {
        let (_dir, collection) = scratch();
        seed(&collection);

        let rs = collection.find(&Query::new(doc!("age": 25))).unwrap();
        assert_eq!(rs.len(), 2);
    }

    #[test]
    fn test_indexed_and_scanned_agree() {
        let (_dir, collection) = scratch();
        seed(&collection);

        let queries = vec![
            Query::new(doc!("age": 25)),
            Query::new(doc!("age": {"$gte": 26, "$lt": 42})),
            Query::new(doc!("age": {"$in": [25, 41]})),
            Query::new(doc!("name": {"$begin": "a"})),
            Query::new(doc!("tags": "dev")),
        ];

        let unindexed: Vec<u64> = queries
            .iter()
            .map(|q| collection.execute(q, flags::COUNT_ONLY).unwrap().count())
            .collect();

        collection
            .ensure_index("age", IndexOptions::new(IndexKind::Number))
            .unwrap();
        collection
            .ensure_index("name", IndexOptions::new(IndexKind::String))
            .unwrap();
        collection
            .ensure_index("tags", IndexOptions::new(IndexKind::Array))
            .unwrap();

        let indexed: Vec<u64> = queries
            .iter()
            .map(|q| collection.execute(q, flags::COUNT_ONLY).unwrap().count())
            .collect();

        assert_eq!(unindexed, indexed);
        assert_eq!(indexed, vec![2, 2, 3, 1, 2]);
    }

    #[test]
    fn test_probe_used_for_indexed_branch() {
        let (_dir, collection) = scratch();
        seed(&collection);
        collection
            .ensure_index("name", IndexOptions::new(IndexKind::String))
            .unwrap();

        let outcome = collection
            .execute(&Query::new(doc!("name": "alice")), flags::EXPLAIN)
            .unwrap();
        let report = outcome.explain().unwrap();
        assert_eq!(report.get("full_scan"), val!(false));
        assert_eq!(report.get("examined"), val!(1));
        assert_eq!(outcome.count(), 1);
    }

    #[test]
    fn test_orderby_skip_max() {
        let (_dir, collection) = scratch();
        seed(&collection);

        let query = Query::new(Document::new())
            .hints(doc!("$orderby": {"age": 1, "name": 1}, "$skip": 1, "$max": 2));
        let rs = collection.find(&query).unwrap();
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.get_document(0).unwrap().get("name"), val!("dave"));
        assert_eq!(rs.get_document(1).unwrap().get("name"), val!("alice"));
    }

    #[test]
    fn test_missing_sort_field_sorts_first_ascending() {
        let (_dir, collection) = scratch();
        collection.save(doc!("name": "with", "rank": 3)).unwrap();
        collection.save(doc!("name": "without")).unwrap();

        let query = Query::new(Document::new()).hints(doc!("$orderby": {"rank": 1}));
        let rs = collection.find(&query).unwrap();
        assert_eq!(rs.get_document(0).unwrap().get("name"), val!("without"));
    }

    #[test]
    fn test_first_only_stops_early() {
        let (_dir, collection) = scratch();
        seed(&collection);

        let outcome = collection
            .execute(&Query::new(doc!("age": 25)), flags::FIRST_ONLY)
            .unwrap();
        assert_eq!(outcome.count(), 1);
        let rs = outcome.into_result_set().unwrap();
        assert_eq!(rs.len(), 1);
    }

    #[test]
    fn test_count_only_has_no_result_set() {
        let (_dir, collection) = scratch();
        seed(&collection);

        let outcome = collection
            .execute(&Query::new(Document::new()), flags::COUNT_ONLY)
            .unwrap();
        assert_eq!(outcome.count(), 4);
        assert!(outcome.result_set().is_none());
        let error = outcome.into_result_set().unwrap_err();
        assert_eq!(error.kind(), &ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_projection_keeps_id() {
        let (_dir, collection) = scratch();
        let oid = collection.save(doc!("name": "alice", "age": 30)).unwrap();

        let query = Query::new(doc!("name": "alice")).hints(doc!("$fields": {"name": 1}));
        let rs = collection.find(&query).unwrap();
        let projected = rs.get_document(0).unwrap();
        assert_eq!(projected.oid(), Some(oid));
        assert_eq!(projected.get("name"), val!("alice"));
        assert!(!projected.contains_field("age"));
    }

    #[test]
    fn test_or_branches_deduplicate() {
        let (_dir, collection) = scratch();
        seed(&collection);

        // alice matches both branches but appears once
        let query = Query::new(doc!("name": "alice")).or_branch(doc!("tags": "admin"));
        let rs = collection.find(&query).unwrap();
        assert_eq!(rs.len(), 1);
    }

    #[test]
    fn test_upsert_inserts_on_miss() {
        let (_dir, collection) = scratch();
        seed(&collection);

        let query = Query::new(doc!("name": "erin", "$upsert": {"name": "erin", "age": 19}));
        let rs = collection.find(&query).unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(collection.size(), 5);
        assert_eq!(rs.get_document(0).unwrap().get("age"), val!(19));

        // a second run matches the inserted document
        let rs = collection.find(&query).unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(collection.size(), 5);
    }

    #[test]
    fn test_upsert_presence_without_document() {
        let (_dir, collection) = scratch();

        let query = Query::new(doc!("name": "erin", "$upsert": true));
        let outcome = collection.execute(&query, flags::COUNT_ONLY).unwrap();
        assert_eq!(outcome.count(), 1);
        let stored = collection.find(&Query::new(doc!("name": "erin"))).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn test_upsert_skipped_when_matched() {
        let (_dir, collection) = scratch();
        seed(&collection);

        let query = Query::new(doc!("name": "alice", "$upsert": {"name": "alice"}));
        collection.find(&query).unwrap();
        assert_eq!(collection.size(), 4);
    }

    #[test]
    fn test_malformed_query_reported() {
        let (_dir, collection) = scratch();
        let error = collection
            .find(&Query::new(doc!("age": {"$almost": 30})))
            .unwrap_err();
        assert_eq!(error.kind(), &ErrorKind::MalformedQuery);
    }

    #[test]
    fn test_nested_path_query() {
        let (_dir, collection) = scratch();
        collection
            .save(doc!("name": "hq", "address": {"city": "Oslo"}))
            .unwrap();
        collection
            .save(doc!("name": "branch", "address": {"city": "Bergen"}))
            .unwrap();

        let rs = collection
            .find(&Query::new(doc!("address.city": "Oslo")))
            .unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.get_document(0).unwrap().get("name"), val!("hq"));
    }
}
