use jotdb::index::{IndexKind, IndexOptions};
use jotdb::query::flags;
use jotdb::{doc, val, CollectionOptions, Oid, Query};
use jotdb_int_test::test_util::run_test;

#[ctor::ctor]
fn init() {
    colog::init();
}

#[test]
fn test_oids_are_unique_and_monotonic() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;

        let mut oids: Vec<Oid> = Vec::new();
        for i in 0..500i64 {
            oids.push(c.save(doc!("n": i))?);
        }

        let mut sorted = oids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), oids.len());
        // byte order of identifiers follows generation order
        assert_eq!(sorted, oids);
        Ok(())
    })
}

#[test]
fn test_documents_survive_reopen() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;
        let oid = c.save(doc!("name": "persistent", "n": 42))?;
        drop(c);

        let db = ctx.reopen()?;
        let c = db.get_collection("c")?;
        let loaded = c.load(&oid)?;
        assert_eq!(loaded.get("name"), val!("persistent"));
        assert_eq!(loaded.get("n"), val!(42));
        db.close()
    })
}

#[test]
fn test_indexes_rebuilt_on_reopen() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;
        c.ensure_index("tag", IndexOptions::new(IndexKind::String))?;
        for tag in ["x", "y", "x", "z"] {
            c.save(doc!("tag": tag))?;
        }
        drop(c);

        let db = ctx.reopen()?;
        let c = db.get_collection("c")?;
        assert_eq!(c.list_indexes().len(), 1);

        let outcome = c.execute(
            &Query::new(doc!("tag": "x")),
            flags::COUNT_ONLY | flags::EXPLAIN,
        )?;
        assert_eq!(outcome.count(), 2);
        assert_eq!(outcome.explain().unwrap().get("full_scan"), val!(false));
        db.close()
    })
}

#[test]
fn test_array_element_path_index_consistent_after_reopen() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;
        c.ensure_index("tags.0", IndexOptions::new(IndexKind::String))?;
        let kept = c.save(doc!("tags": ["x", "y"]))?;
        let removed = c.save(doc!("tags": ["x"]))?;
        c.remove(&removed)?;
        drop(c);

        let db = ctx.reopen()?;
        let c = db.get_collection("c")?;
        let outcome = c.execute(
            &Query::new(doc!("tags.0": "x")),
            flags::COUNT_ONLY | flags::EXPLAIN,
        )?;
        assert_eq!(outcome.count(), 1);
        assert_eq!(outcome.explain().unwrap().get("full_scan"), val!(false));

        // the rebuilt index carries no entry for the removed document
        c.remove(&kept)?;
        let outcome = c.execute(&Query::new(doc!("tags.0": "x")), flags::COUNT_ONLY)?;
        assert_eq!(outcome.count(), 0);
        db.close()
    })
}

#[test]
fn test_unique_constraint_survives_reopen() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;
        c.ensure_index("email", IndexOptions::unique(IndexKind::String)?)?;
        c.save(doc!("email": "a@x.io"))?;
        drop(c);

        let db = ctx.reopen()?;
        let c = db.get_collection("c")?;
        assert!(c.save(doc!("email": "a@x.io")).is_err());
        assert_eq!(c.size(), 1);
        db.close()
    })
}

#[test]
fn test_reused_slots_keep_store_compact() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("c", CollectionOptions::default())?;

        let payload = "x".repeat(64);
        let mut oids = Vec::new();
        for _ in 0..32 {
            oids.push(c.save(doc!("payload": (payload.as_str())))?);
        }
        c.sync()?;
        let grown = std::fs::metadata(ctx.path().join("c.jdc")).unwrap().len();

        for oid in &oids {
            c.remove(oid)?;
        }
        for _ in 0..32 {
            c.save(doc!("payload": (payload.as_str())))?;
        }
        c.sync()?;
        let reused = std::fs::metadata(ctx.path().join("c.jdc")).unwrap().len();

        assert_eq!(grown, reused);
        Ok(())
    })
}

#[test]
fn test_dropped_collection_stays_dropped() {
    run_test(|ctx| {
        let db = ctx.db();
        let c = db.collection("gone", CollectionOptions::default())?;
        c.save(doc!("n": 1))?;
        drop(c);
        db.drop_collection("gone", true)?;

        let db = ctx.reopen()?;
        assert!(db.get_collection("gone").is_err());
        assert!(db.collection_names().is_empty());
        db.close()
    })
}
