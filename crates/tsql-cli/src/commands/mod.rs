//! Command handler modules for tsql-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod catalog;
pub mod run;

use anyhow::{Context, Result};

/// Resolves the Postgres DSN the same way the daemon does, via
/// `tsql_config::secrets::resolve_secrets`, so credentials never have to
/// pass through a layered config file.
pub fn required_pg_dsn() -> Result<String> {
    tsql_config::secrets::resolve_secrets()?
        .pg_dsn
        .context("PG_DSN resolved as unset despite required-variable check")
}
