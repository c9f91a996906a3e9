mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use commands::{catalog::catalog_list, required_pg_dsn, run::run_start};

#[derive(Parser)]
#[command(name = "tsql")]
#[command(about = "Text-to-SQL benchmark orchestration engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> environment -> deployment)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Question catalog commands
    Catalog {
        #[command(subcommand)]
        cmd: CatalogCmd,
    },

    /// Run lifecycle commands
    Run {
        #[command(subcommand)]
        cmd: RunCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum CatalogCmd {
    /// List catalog questions, one JSON object per line.
    List {
        #[arg(long)]
        catalog_db: std::path::PathBuf,
        #[arg(long)]
        split: Option<String>,
        #[arg(long = "db-id")]
        db_id: Option<String>,
        #[arg(long, default_value_t = 200)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}

#[derive(Subcommand)]
enum RunCmd {
    /// Admit a benchmark run and stream its events to stdout.
    Start {
        #[arg(long)]
        model: String,
        #[arg(long)]
        revision: Option<String>,
        #[arg(long = "db-id")]
        db_id: String,
        #[arg(long, default_value_t = 100)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long = "max-new-tokens", default_value_t = 256)]
        max_new_tokens: u32,
        #[arg(long, default_value_t = 0.0)]
        temperature: f32,
        #[arg(long = "top-p", default_value_t = 1.0)]
        top_p: f32,
        #[arg(long = "do-sample", default_value_t = false)]
        do_sample: bool,
        #[arg(long, default_value = "auto")]
        dtype: String,
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let dsn = required_pg_dsn()?;
            match cmd {
                DbCmd::Status => {
                    let pool = PgPoolOptions::new().max_connections(2).connect(&dsn).await?;
                    let s = tsql_repository::status(&pool).await?;
                    println!("db_ok={} has_bench_runs_table={}", s.ok, s.has_bench_runs_table);
                }
                DbCmd::Migrate => {
                    let repo = tsql_repository::PgBenchmarkRepository::connect(&dsn).await?;
                    repo.migrate().await?;
                    info!("repository migrations applied");
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = tsql_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Catalog { cmd } => match cmd {
            CatalogCmd::List {
                catalog_db,
                split,
                db_id,
                limit,
                offset,
            } => catalog_list(catalog_db, split, db_id, limit, offset)?,
        },

        Commands::Run { cmd } => match cmd {
            RunCmd::Start {
                model,
                revision,
                db_id,
                limit,
                offset,
                max_new_tokens,
                temperature,
                top_p,
                do_sample,
                dtype,
                config_paths,
            } => {
                run_start(
                    model,
                    revision,
                    db_id,
                    limit,
                    offset,
                    max_new_tokens,
                    temperature,
                    top_p,
                    do_sample,
                    dtype,
                    config_paths,
                )
                .await?
            }
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
