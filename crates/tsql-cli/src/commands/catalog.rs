//! `tsql catalog list` — inspect the question catalog without standing up
//! the daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tsql_catalog::QuestionCatalog;

pub fn catalog_list(
    catalog_db: PathBuf,
    split: Option<String>,
    db_id: Option<String>,
    limit: u32,
    offset: u32,
) -> Result<()> {
    let catalog = QuestionCatalog::open(&catalog_db)
        .with_context(|| format!("opening catalog at {}", catalog_db.display()))?;

    let questions = catalog.list(split.as_deref(), db_id.as_deref(), limit, offset)?;
    for q in &questions {
        println!("{}", serde_json::to_string(q)?);
    }
    eprintln!("count={}", questions.len());
    Ok(())
}
