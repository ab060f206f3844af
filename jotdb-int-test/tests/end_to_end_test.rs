use jotdb::index::{IndexKind, IndexOptions};
use jotdb::query::flags;
use jotdb::{doc, val, CollectionOptions, ErrorKind, Query};
use jotdb_int_test::test_util::run_test;

#[ctor::ctor]
fn init() {
    colog::init();
}

#[test]
fn test_indexed_range_query_roundtrip() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;
        c.save(doc!("name": "a", "age": 5))?;
        c.save(doc!("name": "b", "age": 7))?;
        c.ensure_index("age", IndexOptions::new(IndexKind::Number))?;

        let rs = c.find(&Query::new(doc!("age": {"$gt": 4})))?;
        assert_eq!(rs.len(), 2);

        let mut names: Vec<String> = Vec::new();
        for position in 0..rs.len() {
            let document = rs.get_document(position)?;
            match document.get("name").as_str() {
                Some("a") => assert_eq!(document.get("age"), val!(5)),
                Some("b") => assert_eq!(document.get("age"), val!(7)),
                other => panic!("unexpected name {:?}", other),
            }
            names.push(document.get("name").to_string());
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 2);
        Ok(())
    })
}

#[test]
fn test_removed_document_vanishes_from_store_and_index() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;
        c.ensure_index("name", IndexOptions::new(IndexKind::String))?;

        let oid = c.save(doc!("name": "ghost"))?;
        assert_eq!(c.find(&Query::new(doc!("name": "ghost")))?.len(), 1);

        c.remove(&oid)?;
        assert_eq!(
            c.load(&oid).unwrap_err().kind(),
            &ErrorKind::NotFound
        );

        // the indexed probe finds nothing either
        let outcome = c.execute(
            &Query::new(doc!("name": "ghost")),
            flags::COUNT_ONLY | flags::EXPLAIN,
        )?;
        assert_eq!(outcome.count(), 0);
        assert_eq!(outcome.explain().unwrap().get("full_scan"), val!(false));
        Ok(())
    })
}

#[test]
fn test_query_on_missing_collection_is_empty_not_error() {
    run_test(|ctx| {
        let db = ctx.db();
        let outcome = db.execute_query("never_created", &Query::new(doc!("x": 1)), 0)?;
        assert_eq!(outcome.count(), 0);
        let rs = outcome.into_result_set()?;
        assert_eq!(rs.len(), 0);
        Ok(())
    })
}

#[test]
fn test_unique_violation_leaves_first_document_intact() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;
        c.ensure_index("email", IndexOptions::unique(IndexKind::String)?)?;

        let first = c.save(doc!("email": "a@x.io", "n": 1))?;
        let error = c.save(doc!("email": "a@x.io", "n": 2)).unwrap_err();
        assert_eq!(error.kind(), &ErrorKind::UniqueViolation);

        assert_eq!(c.size(), 1);
        let survivor = c.load(&first)?;
        assert_eq!(survivor.get("n"), val!(1));

        let rs = c.find(&Query::new(doc!("email": "a@x.io")))?;
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.get_document(0)?.oid(), Some(first));
        Ok(())
    })
}

#[test]
fn test_collection_creation_is_idempotent() {
    run_test(|ctx| {
        let db = ctx.db();
        let first = db.collection("c", CollectionOptions::default())?;
        first.save(doc!("k": 1))?;
        let second = db.collection("c", CollectionOptions::default())?;
        assert_eq!(second.size(), 1);
        assert_eq!(db.collection_names(), vec!["c".to_string()]);
        Ok(())
    })
}

#[test]
fn test_update_moves_index_entries() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;
        c.ensure_index("city", IndexOptions::new(IndexKind::String))?;

        let oid = c.save(doc!("city": "Oslo"))?;
        let mut updated = doc!("city": "Bergen");
        updated.set_oid(oid);
        c.save(updated)?;

        assert_eq!(c.find(&Query::new(doc!("city": "Oslo")))?.len(), 0);
        let rs = c.find(&Query::new(doc!("city": "Bergen")))?;
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.get_document(0)?.oid(), Some(oid));
        Ok(())
    })
}

#[test]
fn test_upsert_then_match() {
    run_test(|ctx| {
        let db = ctx.db();
        let query = Query::new(doc!(
            "slug": "intro",
            "$upsert": {"slug": "intro", "title": "Introduction"}
        ));

        // the collection itself is conjured by the upsert
        let outcome = db.execute_query("pages", &query, 0)?;
        assert_eq!(outcome.count(), 1);

        let pages = db.get_collection("pages")?;
        let rs = pages.find(&Query::new(doc!("slug": "intro")))?;
        assert_eq!(rs.get_document(0)?.get("title"), val!("Introduction"));

        // running the same upsert again inserts nothing
        db.execute_query("pages", &query, 0)?;
        assert_eq!(pages.size(), 1);
        Ok(())
    })
}

#[test]
fn test_ordering_and_paging_across_types() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;
        for (name, score) in [("a", 3i64), ("b", 1), ("c", 2), ("d", 5), ("e", 4)] {
            c.save(doc!("name": name, "score": score))?;
        }

        let query = Query::new(doc!())
            .hints(doc!("$orderby": {"score": (-1)}, "$skip": 1, "$max": 3));
        let rs = c.find(&query)?;
        assert_eq!(rs.len(), 3);
        let scores: Vec<i64> = (0..rs.len())
            .map(|i| rs.get_document(i).unwrap().get("score").as_i64().unwrap())
            .collect();
        assert_eq!(scores, vec![4, 3, 2]);
        Ok(())
    })
}
