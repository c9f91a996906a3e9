//! Builds a throwaway dataset directory + SQLite file under a `TempDir`,
//! the same on-disk shape `tsql_dataset::DatasetLocator` expects. Shared by
//! scenario tests that need a real sandbox execution, not a stub.

use rusqlite::Connection;
use tempfile::TempDir;

use tsql_dataset::DatasetLocator;

pub struct FixtureDataset {
    pub tmp: TempDir,
}

impl FixtureDataset {
    /// Creates `<tmp>/<db_id>/<db_id>.sqlite` and runs `setup_sql` against
    /// it, then returns a locator rooted at `tmp`.
    pub fn new(db_id: &str, setup_sql: &str) -> (Self, DatasetLocator) {
        let tmp = tempfile::tempdir().expect("create tempdir for fixture dataset");
        let dir = tmp.path().join(db_id);
        std::fs::create_dir_all(&dir).expect("create dataset dir");
        let path = dir.join(format!("{db_id}.sqlite"));
        let conn = Connection::open(&path).expect("open fixture sqlite file");
        conn.execute_batch(setup_sql).expect("run fixture setup sql");
        drop(conn);

        let locator = DatasetLocator::new(tmp.path());
        (Self { tmp }, locator)
    }
}
