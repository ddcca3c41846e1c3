//! `agencyops` binary: HTTP service, flag report and migration tools.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agencyops::app::AppContext;
use agencyops::auth::SessionSigner;
use agencyops::config::{Config, FeatureFlags, StorageConfig};
use agencyops::migration::{self, MigrationPaths};
use agencyops::ops::scoring::GatewayScorer;
use agencyops::{db, docstore, web};

const DEFAULT_LOG_FILTER: &str = "agencyops=info,tower_http=info";

#[derive(Parser)]
#[command(name = "agencyops", version, about = "Agency operations service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve,
    /// Print the feature flag state and migration phase as JSON.
    Flags,
    /// Move the migrating domains into the document store.
    Migrate {
        #[command(subcommand)]
        step: MigrateStep,
    },
}

#[derive(Subcommand)]
enum MigrateStep {
    /// Dump relational rows to <dir>/export.
    Export(DirArgs),
    /// Reshape exported rows into document bodies under <dir>/transformed.
    Transform(DirArgs),
    /// Upsert transformed documents into the document store.
    Import(DirArgs),
    /// Compare both stores and print a parity report.
    Validate,
    /// Export, transform, import and validate.
    Run(DirArgs),
}

#[derive(Args)]
struct DirArgs {
    /// Working directory for the migration files.
    #[arg(long, env = "MIGRATION_DIR", default_value = "migration-data")]
    dir: PathBuf,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "agencyops failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Serve => serve().await,
        Command::Flags => {
            let flags = FeatureFlags::from_env().context("invalid feature flags")?;
            print_json(&flags.status())
        }
        Command::Migrate { step } => migrate(step).await,
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    let flags = Arc::new(config.storage.flags.clone());
    info!(
        phase = flags.migration_phase().as_str(),
        backend = config.storage.database.backend.as_str(),
        "Starting agencyops"
    );

    let db = open_relational(&config.storage).await?;
    let docs = open_documents(&config.storage).await?;
    let scorer = Arc::new(GatewayScorer::new(&config.ai)?);
    let sessions = SessionSigner::new(&config.session)?;
    let state = Arc::new(AppContext::new(
        db,
        docs,
        flags,
        scorer,
        sessions,
        config.view_cache_capacity,
    ));

    let host = config.server.host.as_str();
    let port = config.server.port;
    let addr: SocketAddr = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("cannot resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("no address for {host}:{port}"))?;

    let mut origins = vec![format!("http://{host}:{port}")];
    if matches!(host, "127.0.0.1" | "0.0.0.0") {
        origins.push(format!("http://localhost:{port}"));
    }
    let origins = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    web::serve(addr, state, origins, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await
    .context("HTTP server failed")
}

async fn open_relational(storage: &StorageConfig) -> anyhow::Result<Arc<dyn db::Database>> {
    db::connect_from_config(&storage.database)
        .await
        .context("failed to open the relational store")
}

async fn open_documents(
    storage: &StorageConfig,
) -> anyhow::Result<Arc<dyn docstore::DocumentStore>> {
    docstore::connect_from_config(&storage.docstore)
        .await
        .context("failed to open the document store")
}

async fn migrate(step: MigrateStep) -> anyhow::Result<()> {
    let storage = StorageConfig::from_env().context("invalid configuration")?;

    match step {
        MigrateStep::Export(args) => {
            let db = open_relational(&storage).await?;
            let paths = MigrationPaths::new(args.dir);
            print_json(&migration::export(db.as_ref(), &paths).await?)
        }
        MigrateStep::Transform(args) => {
            let paths = MigrationPaths::new(args.dir);
            print_json(&migration::transform(&paths).await?)
        }
        MigrateStep::Import(args) => {
            let docs = open_documents(&storage).await?;
            let paths = MigrationPaths::new(args.dir);
            print_json(&migration::import(docs.as_ref(), &paths).await?)
        }
        MigrateStep::Validate => {
            let db = open_relational(&storage).await?;
            let docs = open_documents(&storage).await?;
            let report = migration::validate(db.as_ref(), docs.as_ref()).await?;
            print_json(&report)?;
            report.check()?;
            Ok(())
        }
        MigrateStep::Run(args) => {
            let db = open_relational(&storage).await?;
            let docs = open_documents(&storage).await?;
            let paths = MigrationPaths::new(args.dir);
            let summary = migration::run(db.as_ref(), docs.as_ref(), &paths).await?;
            info!(
                inserted = summary.import.inserted,
                updated = summary.import.updated,
                "Migration complete"
            );
            print_json(&summary)
        }
    }
}
