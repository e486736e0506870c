//! `dexsync`: publish dataset releases and sync them into a local store.
//!
//! # Usage
//!
//! ```
//! dexsync publish --snapshot crawl.json --species 1,4,7
//! dexsync publish --snapshot crawl.json --force --dataset-version 2.0.0
//! dexsync verify
//! dexsync sync
//! dexsync status
//! ```
//!
//! Settings come from `dexsync.toml` (or `--config`) with `DEXSYNC_*`
//! environment overrides.

mod config;
mod snapshot;

use std::path::PathBuf;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use config::CliConfig;
use dexsync_client::{
  SyncEngine, SyncOutcome, SyncSettings, SyncState, source::AnySource,
};
use dexsync_core::{species::SpeciesId, store::LocalStore};
use dexsync_pipeline::{
  Pipeline, PipelineOptions, PipelineOutcome, config::SourceConfig, manifest::ManifestBuilder,
};
use dexsync_store_sqlite::SqliteStore;
use snapshot::Snapshot;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Versioned Pokédex dataset publishing and sync")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "dexsync.toml", env = "DEXSYNC_CONFIG")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run the publishing pipeline over a crawl snapshot.
  Publish {
    /// Snapshot JSON with crawled pages and enrichment results.
    #[arg(long, value_name = "FILE")]
    snapshot: PathBuf,

    /// Dex numbers to process. Defaults to every species in the snapshot.
    #[arg(long, value_delimiter = ',')]
    species: Vec<u32>,

    /// Re-enrich even when source pages are unchanged.
    #[arg(long)]
    force: bool,

    /// Version to publish; defaults to a patch bump of the last release.
    #[arg(long)]
    dataset_version: Option<String>,

    /// Start from an empty registry if the existing one is unreadable.
    #[arg(long)]
    allow_empty_registry: bool,
  },

  /// Check that the distribution root is complete and self-consistent.
  Verify,

  /// Pull the latest release into the local database.
  Sync {
    /// Release location, overriding `client.release`.
    #[arg(long)]
    release: Option<String>,
  },

  /// Show the installed version and any interrupted sync.
  Status,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let config = CliConfig::load(&cli.config)?;

  match cli.command {
    Command::Publish { snapshot, species, force, dataset_version, allow_empty_registry } => {
      let options = PipelineOptions {
        targets: species.into_iter().map(SpeciesId::new).collect(),
        force,
        dataset_version,
        allow_empty_registry,
      };
      publish(config, &snapshot, options).await
    }
    Command::Verify => verify(&config).await,
    Command::Sync { release } => sync(config, release).await,
    Command::Status => status(&config).await,
  }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn publish(
  mut config: CliConfig,
  snapshot_path: &std::path::Path,
  mut options: PipelineOptions,
) -> anyhow::Result<()> {
  let snapshot = Snapshot::read(snapshot_path).await?;
  if config.pipeline.sources.is_empty() {
    config.pipeline.sources = snapshot.sources().into_iter().map(SourceConfig::named).collect();
  }
  if options.targets.is_empty() {
    options.targets = snapshot.species();
  }

  let (crawler, enricher) = snapshot.into_parts();
  let mut pipeline = Pipeline::new(config.pipeline, crawler, enricher);
  let outcome = pipeline.run(options).await.context("pipeline run failed")?;

  match outcome {
    PipelineOutcome::NoOp => println!("nothing to do"),
    PipelineOutcome::Unchanged { checked, failures } => {
      println!("no changes across {checked} species");
      for f in &failures {
        println!("  failed: {} ({})", f.species, f.reason);
      }
    }
    PipelineOutcome::Published(report) => {
      println!("published dataset {}", report.dataset_version);
      println!("  species indexed:   {}", report.species_indexed);
      println!("  revisions bumped:  {}", report.revisions_bumped);
      println!("  payloads written:  {}", report.payloads_written);
      println!(
        "  tidbits:           +{} / -{}",
        report.new_tidbits.len(),
        report.removed_tidbits.len()
      );
      println!("  new source pages:  {}", report.new_pages);
      for f in &report.failures {
        println!("  failed: {} ({})", f.species, f.reason);
      }
      for s in &report.unavailable_sources {
        println!("  source unavailable: {s}");
      }
    }
  }
  Ok(())
}

async fn verify(config: &CliConfig) -> anyhow::Result<()> {
  let builder = ManifestBuilder::new(&config.pipeline.distribution_root);
  let report = builder
    .verify_distribution()
    .await
    .with_context(|| format!("failed to read {}", builder.root().display()))?;

  println!(
    "dataset {}: {} species, {} files checked",
    report.dataset_version, report.species, report.files_checked
  );
  if !report.is_ok() {
    for problem in &report.problems {
      println!("  {problem}");
    }
    bail!("{} problem(s) found in {}", report.problems.len(), builder.root().display());
  }
  Ok(())
}

async fn sync(config: CliConfig, release: Option<String>) -> anyhow::Result<()> {
  let client = config.client;
  let location = release.unwrap_or_else(|| client.release.clone());

  let store = SqliteStore::open(&client.database)
    .await
    .with_context(|| format!("failed to open store at {:?}", client.database))?;
  let source = AnySource::from_location(&location, client.request_timeout())
    .context("failed to build HTTP client")?;
  let mut engine = SyncEngine::new(store, source, SyncSettings::from(&client));

  let stop = engine.stop_handle();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, stopping after the current chunk");
      stop.request_stop();
    }
  });

  let mut states = engine.subscribe();
  tokio::spawn(async move {
    while states.changed().await.is_ok() {
      let state = states.borrow_and_update().clone();
      if let SyncState::Committing { chunk, total_chunks } = state {
        info!("chunk {}/{total_chunks} committed", chunk + 1);
      }
    }
  });

  info!(%location, "syncing");
  match engine.sync().await? {
    SyncOutcome::UpToDate { version } => println!("already at {version}"),
    SyncOutcome::Completed(report) => {
      let from = report.previous_version.as_deref().unwrap_or("nothing");
      println!("synced {from} -> {}", report.version);
      println!(
        "  chunks {}..{} of {}, {} payloads in {} ms",
        report.resumed_from + 1,
        report.total_chunks,
        report.total_chunks,
        report.entities_downloaded,
        report.sync_duration_ms
      );
      println!("  migration: {}", report.migration);
    }
    SyncOutcome::Stopped { version, next_chunk, total_chunks } => {
      println!("stopped syncing {version}; resumes at chunk {} of {total_chunks}", next_chunk + 1);
    }
  }
  Ok(())
}

async fn status(config: &CliConfig) -> anyhow::Result<()> {
  let path = &config.client.database;
  let store = SqliteStore::open(path)
    .await
    .with_context(|| format!("failed to open store at {path:?}"))?;

  let record = store.load_version_record().await.context("reading version record")?;
  let species = store.species_count().await.context("counting species")?;

  match &record.current_version {
    Some(version) => println!("installed: {version} ({species} species)"),
    None => println!("installed: nothing"),
  }
  if let Some(last) = record.version_history.last() {
    println!(
      "last sync: {} ({} entities, {} ms)",
      last.timestamp.to_rfc3339(),
      last.total_entities,
      last.sync_duration_ms
    );
  }
  if let Some(cp) = store.load_checkpoint().await.context("reading checkpoint")? {
    println!("interrupted sync of {} after chunk {}", cp.version, cp.chunk_index + 1);
  }
  Ok(())
}
