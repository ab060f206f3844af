use jotdb::database::open_mode;
use jotdb::{Database, JotResult};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::{env, fs};

/// Runs a test against a fresh database, guaranteeing cleanup of the
/// database directory even when the test body panics.
pub fn run_test<T>(test: T)
where
    T: FnOnce(TestContext) -> JotResult<()>,
{
    let ctx = create_test_context().expect("failed to create test context");
    let cleanup_ctx = ctx.clone();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || test(ctx)));
    cleanup(&cleanup_ctx);

    match result {
        Ok(Ok(())) => {}
        Ok(Err(error)) => panic!("Test failed: {:?}", error),
        Err(panic_err) => std::panic::resume_unwind(panic_err),
    }
}

#[derive(Clone)]
pub struct TestContext {
    path: PathBuf,
    db: Database,
}

impl TestContext {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn db(&self) -> Database {
        self.db.clone()
    }

    /// Closes the shared database and opens an independent one at the
    /// same path, for persistence checks. The caller closes it.
    pub fn reopen(&self) -> JotResult<Database> {
        self.db.close()?;
        Database::open(&self.path, open_mode::READ | open_mode::WRITE)
    }
}

pub fn random_path() -> PathBuf {
    let id: u64 = rand::thread_rng().gen();
    env::temp_dir().join(format!("jotdb-test-{:016x}", id))
}

pub fn create_test_context() -> JotResult<TestContext> {
    let path = random_path();
    let db = Database::open(
        &path,
        open_mode::READ | open_mode::WRITE | open_mode::CREATE,
    )?;
    Ok(TestContext { path, db })
}

pub fn cleanup(ctx: &TestContext) {
    let _ = ctx.db().close();
    if let Err(error) = fs::remove_dir_all(ctx.path()) {
        if error.kind() != std::io::ErrorKind::NotFound {
            eprintln!(
                "Warning: failed to remove test directory {}: {:?}",
                ctx.path().display(),
                error
            );
        }
    }
}
