//! nlreg daemon - nearest-leader relationship registry

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use nlreg_core::config::Config;
use nlreg_core::events::JsonlEventPublisher;
use nlreg_core::ingest::{
    IngestLoop, JsonlRecordSource, LeadershipMonitor, RecordKind, RetryPolicy, StaticLeader,
};
use nlreg_core::metrics::NoopMetrics;
use nlreg_core::reconcile::ReconcileEngine;
use nlreg_core::resolver::{CachingResolver, RegistryResolver};
use nlreg_core::storage::{Database, DatabaseConfig, RelationshipStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

const CLAIMS_STREAM: &str = "claims";
const IDENTITY_STREAM: &str = "identity-changes";

#[derive(Parser)]
#[command(name = "nlreg")]
#[command(author, version, about = "Nearest-leader relationship registry daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the inbound streams until interrupted
    Run {
        /// Hold leadership unconditionally (single-node deployment)
        #[arg(long)]
        leader: bool,
    },

    /// Apply pending database migrations
    Migrate,

    /// Show consumer offsets and registry counts
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nlreg=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Run { leader } => cmd_run(config, leader).await,
        Commands::Migrate => cmd_migrate(config).await,
        Commands::Status => cmd_status(config).await,
    }
}

fn database_config(config: &Config) -> DatabaseConfig {
    let db_config = match &config.database.path {
        Some(path) => DatabaseConfig::with_path(path),
        None => DatabaseConfig::default(),
    };
    db_config.max_connections(config.database.max_connections)
}

async fn cmd_run(config: Config, leader: bool) -> anyhow::Result<()> {
    let db = Database::new(database_config(&config)).await?;
    info!(path = %db.path().display(), "Database opened");

    let store = RelationshipStore::new(db.pool().clone());
    let registry = RegistryResolver::new(
        &config.registry.base_url,
        config.registry.timeout(),
        config.registry.lookup_batch_max,
    )?;
    let resolver = Arc::new(CachingResolver::new(
        Arc::new(registry),
        config.registry.cache_ttl(),
    ));
    let publisher = Arc::new(JsonlEventPublisher::new(&config.events.log_path)?);
    let engine = Arc::new(ReconcileEngine::new(
        store,
        resolver,
        publisher,
        Arc::new(NoopMetrics),
    ));

    let retry = RetryPolicy {
        backoff: config.ingest.retry_backoff(),
        on_error: config.ingest.on_error,
    };
    let cancel = CancellationToken::new();

    // The claim stream is consumed on every node; the identity-change
    // stream is a singleton gated on leadership.
    let claims_source = JsonlRecordSource::open(
        CLAIMS_STREAM,
        &config.ingest.claims_path,
        db.pool().clone(),
    )
    .await?;
    let claims_loop = IngestLoop::new(
        engine.clone(),
        Box::new(claims_source),
        RecordKind::Claims,
        retry,
        config.ingest.batch_size,
        Arc::new(NoopMetrics),
    );
    let claims_leader = LeadershipMonitor::new(Arc::new(StaticLeader(true)), Duration::ZERO);
    let claims_handle = tokio::spawn(claims_loop.run(claims_leader, cancel.clone()));

    let identity_source = JsonlRecordSource::open(
        IDENTITY_STREAM,
        &config.ingest.identity_changes_path,
        db.pool().clone(),
    )
    .await?;
    let identity_loop = IngestLoop::new(
        engine,
        Box::new(identity_source),
        RecordKind::IdentityChanges,
        retry,
        config.ingest.batch_size,
        Arc::new(NoopMetrics),
    );
    let identity_leader = LeadershipMonitor::new(
        Arc::new(StaticLeader(leader)),
        config.ingest.leader_confirmation(),
    );
    let identity_handle = tokio::spawn(identity_loop.run(identity_leader, cancel.clone()));

    info!("Daemon running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    cancel.cancel();
    claims_handle.await?;
    identity_handle.await?;
    db.close().await;

    Ok(())
}

async fn cmd_migrate(config: Config) -> anyhow::Result<()> {
    let db = Database::new(database_config(&config).no_migrate()).await?;

    let status = db.migration_status().await?;
    if !status.needs_migration {
        println!("Database is up to date (version {})", status.current_version);
        return Ok(());
    }

    println!(
        "Migrating from version {} to {}",
        status.current_version, status.target_version
    );
    db.migrate().await?;
    println!("Done");
    Ok(())
}

async fn cmd_status(config: Config) -> anyhow::Result<()> {
    let db = Database::new(database_config(&config)).await?;
    let store = RelationshipStore::new(db.pool().clone());

    let migration = db.migration_status().await?;
    println!("Schema version: {}", migration.current_version);
    println!("Active relationships: {}", store.count_active().await?);

    let offsets = db.consumer_offsets().await?;
    if offsets.is_empty() {
        println!("Consumer offsets: none committed yet");
    } else {
        println!("Consumer offsets:");
        for (source, next_offset) in offsets {
            println!("  {}: next offset {}", source, next_offset);
        }
    }

    Ok(())
}
