//! Dataset Locator: resolves a dataset id to its on-disk files. Never opens
//! a file itself; the sandbox owns connection lifetime.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum DatasetLocatorError {
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),
}

#[derive(Debug, Clone)]
pub struct DatasetLocator {
    datasets_root: PathBuf,
}

impl DatasetLocator {
    pub fn new(datasets_root: impl Into<PathBuf>) -> Self {
        Self {
            datasets_root: datasets_root.into(),
        }
    }

    /// `<root>/<db_id>/<db_id>.sqlite`, the primary read-only relational file.
    pub fn sqlite_path(&self, db_id: &str) -> Result<PathBuf, DatasetLocatorError> {
        let path = self.datasets_root.join(db_id).join(format!("{db_id}.sqlite"));
        if !path.is_file() {
            return Err(DatasetLocatorError::DatasetNotFound(db_id.to_string()));
        }
        Ok(path)
    }

    /// `<root>/<db_id>/`, the columnar table directory.
    pub fn table_dir(&self, db_id: &str) -> Result<PathBuf, DatasetLocatorError> {
        let dir = self.datasets_root.join(db_id);
        if !dir.is_dir() {
            return Err(DatasetLocatorError::DatasetNotFound(db_id.to_string()));
        }
        Ok(dir)
    }

    pub fn datasets_root(&self) -> &Path {
        &self.datasets_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolves_existing_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        let db_dir = tmp.path().join("shop_sqlite");
        fs::create_dir_all(&db_dir).unwrap();
        fs::write(db_dir.join("shop_sqlite.sqlite"), b"").unwrap();

        let locator = DatasetLocator::new(tmp.path());
        let resolved = locator.sqlite_path("shop_sqlite").unwrap();
        assert_eq!(resolved, db_dir.join("shop_sqlite.sqlite"));
    }

    #[test]
    fn missing_dataset_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let locator = DatasetLocator::new(tmp.path());
        let err = locator.sqlite_path("nope").unwrap_err();
        assert!(matches!(err, DatasetLocatorError::DatasetNotFound(_)));
    }
}
