//! The sync engine: fetch the release record, plan chunks, download, verify
//! and commit chunk by chunk.
//!
//! ```text
//! Idle ─▶ FetchingManifest ─▶ Planning ─▶ Downloading(i/N) ─▶ Verifying(i/N)
//!   ▲                                          ▲                    │
//!   │                                          └──── Committing ◀───┘
//!   └──────────── Complete | Failed ◀──────────────────┘
//! ```
//!
//! Chunk `i + 1` is never started before chunk `i` and its checkpoint are
//! durable. A failed attempt leaves the last checkpoint in place; the next
//! call to [`SyncEngine::sync`] resumes after it.

use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::Instant,
};

use chrono::Utc;
use dexsync_core::{
  hash::hash_bytes,
  layout::parse_payload_path,
  manifest::{FileEntry, ReleaseManifest},
  store::LocalStore,
  tidbit::TidbitPayload,
  txn::{StagedChunk, SyncCompletion},
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
  config::ClientConfig,
  connectivity::{AlwaysOnline, Connectivity},
  migrate::MigrationTable,
  retry::RetryPolicy,
  source::ReleaseSource,
  version::{MigrationStep, VersionManager},
  Error, Result, SyncFailureKind,
};

// ─── State & outcome ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  FetchingManifest,
  Planning,
  /// Waiting for connectivity before chunk `chunk`.
  Offline { chunk: usize, total_chunks: usize },
  Downloading { chunk: usize, total_chunks: usize },
  Verifying { chunk: usize, total_chunks: usize },
  Committing { chunk: usize, total_chunks: usize },
  Complete { version: String },
  Failed { chunk: Option<usize>, kind: SyncFailureKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub version:              String,
  pub previous_version:     Option<String>,
  pub total_chunks:         usize,
  /// First chunk processed by this attempt; non-zero after a resume.
  pub resumed_from:         usize,
  pub entities_downloaded:  usize,
  pub total_entities:       usize,
  pub sync_duration_ms:     u64,
  pub migration:            String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  UpToDate { version: String },
  Completed(SyncReport),
  /// Stopped on request. `next_chunk` is where the next attempt resumes.
  Stopped { version: String, next_chunk: usize, total_chunks: usize },
}

/// Asks a running sync to stop once the current chunk has committed.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
  pub fn request_stop(&self) { self.0.store(true, Ordering::SeqCst); }

  pub fn is_stop_requested(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

/// Split `files` into consecutive chunks of at most `chunk_size`.
pub fn plan_chunks(files: &[FileEntry], chunk_size: usize) -> Vec<&[FileEntry]> {
  files.chunks(chunk_size.max(1)).collect()
}

// ─── Engine ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SyncSettings {
  pub chunk_size:        usize,
  pub retry:             RetryPolicy,
  pub integrity_retries: u32,
}

impl Default for SyncSettings {
  fn default() -> Self { Self::from(&ClientConfig::default()) }
}

impl From<&ClientConfig> for SyncSettings {
  fn from(config: &ClientConfig) -> Self {
    Self {
      chunk_size:        config.chunk_size,
      retry:             config.retry.clone(),
      integrity_retries: config.integrity_retries,
    }
  }
}

pub struct SyncEngine<S, R, N = AlwaysOnline> {
  store:        S,
  source:       R,
  connectivity: N,
  versions:     VersionManager,
  settings:     SyncSettings,
  state:        watch::Sender<SyncState>,
  stop:         Arc<AtomicBool>,
}

impl<S: LocalStore, R: ReleaseSource> SyncEngine<S, R, AlwaysOnline> {
  pub fn new(store: S, source: R, settings: SyncSettings) -> Self {
    Self::with_connectivity(store, source, AlwaysOnline, settings)
  }
}

impl<S: LocalStore, R: ReleaseSource, N: Connectivity> SyncEngine<S, R, N> {
  pub fn with_connectivity(store: S, source: R, connectivity: N, settings: SyncSettings) -> Self {
    Self {
      store,
      source,
      connectivity,
      versions: VersionManager::new(MigrationTable::new()),
      settings,
      state: watch::Sender::new(SyncState::Idle),
      stop: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn with_migrations(mut self, migrations: MigrationTable) -> Self {
    self.versions = VersionManager::new(migrations);
    self
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn source(&self) -> &R { &self.source }

  /// Observe state transitions.
  pub fn subscribe(&self) -> watch::Receiver<SyncState> { self.state.subscribe() }

  pub fn stop_handle(&self) -> StopHandle { StopHandle(Arc::clone(&self.stop)) }

  fn set_state(&self, state: SyncState) {
    debug!(?state, "sync state");
    self.state.send_replace(state);
  }

  /// Run one sync attempt. On failure the state becomes `Failed` and then
  /// `Idle`; committed chunks and the checkpoint stay as they were.
  pub async fn sync(&mut self) -> Result<SyncOutcome> {
    self.stop.store(false, Ordering::SeqCst);
    let result = self.run().await;

    if let Err(e) = &result {
      warn!(chunk = ?e.failed_chunk(), kind = ?e.kind(), error = %e, "sync failed, will retry");
      self.set_state(SyncState::Failed { chunk: e.failed_chunk(), kind: e.kind() });
    }
    self.set_state(SyncState::Idle);
    result
  }

  async fn run(&mut self) -> Result<SyncOutcome> {
    // manifest
    self.set_state(SyncState::FetchingManifest);
    let previous = self.versions.initialize(&self.store).await?;
    let release = self.fetch_release().await?;

    if !self.versions.check_for_update(&release.version) {
      info!(version = %release.version, "dataset up to date");
      return Ok(SyncOutcome::UpToDate { version: release.version });
    }
    let migration = self.versions.resolve_migration(previous.as_deref(), &release.version)?;

    // planning
    self.set_state(SyncState::Planning);
    let chunks = plan_chunks(&release.files, self.settings.chunk_size);
    let total_chunks = chunks.len();
    let start = match self.store.load_checkpoint().await.map_err(Error::storage)? {
      Some(cp) if cp.version == release.version => cp.next_chunk(),
      Some(cp) => {
        info!(stale = %cp.version, current = %release.version, "discarding checkpoint of another release");
        self.store.clear_checkpoint().await.map_err(Error::storage)?;
        0
      }
      None => 0,
    };
    info!(
      version = %release.version,
      previous = ?previous,
      files = release.files.len(),
      chunks = total_chunks,
      resume_at = start,
      "sync planned"
    );

    // chunks
    let started = Instant::now();
    let mut downloaded = 0;
    for (index, files) in chunks.iter().enumerate().skip(start) {
      if self.stop.load(Ordering::SeqCst) {
        info!(next_chunk = index, "stop requested");
        return Ok(SyncOutcome::Stopped {
          version: release.version.clone(),
          next_chunk: index,
          total_chunks,
        });
      }

      downloaded += self
        .sync_chunk(&release.version, index, total_chunks, files)
        .await
        .map_err(|cause| Error::ChunkFailed { chunk_index: index, total_chunks, cause: Box::new(cause) })?;
    }

    // completion
    let sync_duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let retain_species = release
      .files
      .iter()
      .filter_map(|f| parse_payload_path(&f.path).map(|(species, _)| species))
      .collect();
    let transform = match &migration {
      MigrationStep::Transform(m) => Some(m.clone()),
      MigrationStep::NotNeeded | MigrationStep::Noop => None,
    };
    let receipt = self
      .store
      .finish_sync(SyncCompletion {
        version: release.version.clone(),
        completed_at: Utc::now(),
        total_entities: release.files.len(),
        sync_duration_ms,
        retain_species,
        migration: transform,
      })
      .await
      .map_err(Error::storage)?;

    self.set_state(SyncState::Complete { version: release.version.clone() });
    info!(version = %release.version, downloaded, sync_duration_ms, "sync complete");

    Ok(SyncOutcome::Completed(SyncReport {
      version: release.version,
      previous_version: previous,
      total_chunks,
      resumed_from: start,
      entities_downloaded: downloaded,
      total_entities: release.files.len(),
      sync_duration_ms,
      migration: match migration {
        MigrationStep::NotNeeded => "none".into(),
        MigrationStep::Noop => "noop".into(),
        MigrationStep::Transform(_) => format!("{} payloads migrated", receipt.migrated),
      },
    }))
  }

  async fn fetch_release(&self) -> Result<ReleaseManifest> {
    let bytes = self
      .settings
      .retry
      .run("version.json", || self.source.fetch_version())
      .await
      .map_err(|source| Error::Fetch { path: "version.json".into(), source })?;

    let doc: Value = serde_json::from_slice(&bytes)
      .map_err(|e| Error::ManifestInvalid(vec![format!("not JSON: {e}")]))?;
    let validation = VersionManager::validate_manifest(&doc);
    if !validation.valid {
      return Err(Error::ManifestInvalid(validation.errors));
    }
    serde_json::from_value(doc).map_err(|e| Error::ManifestInvalid(vec![e.to_string()]))
  }

  /// Download, verify and commit one chunk, waiting out connectivity loss.
  async fn sync_chunk(
    &self,
    version: &str,
    index: usize,
    total_chunks: usize,
    files: &[FileEntry],
  ) -> Result<usize> {
    let staged = loop {
      if !self.connectivity.is_online() {
        self.set_state(SyncState::Offline { chunk: index, total_chunks });
        info!(chunk = index, "offline, waiting for connectivity");
        self.connectivity.wait_online().await;
      }

      match self.stage_chunk(version, index, total_chunks, files).await {
        Ok(staged) => break staged,
        Err(e) if e.kind() == SyncFailureKind::TransientNetwork && !self.connectivity.is_online() => {
          warn!(chunk = index, error = %e, "connectivity lost mid-chunk, retrying chunk");
        }
        Err(e) => return Err(e),
      }
    };

    self.set_state(SyncState::Committing { chunk: index, total_chunks });
    let receipt = staged.commit(&self.store).await.map_err(Error::storage)?;
    debug!(chunk = index, rows = receipt.rows_written, "chunk checkpointed");
    Ok(receipt.rows_written)
  }

  /// Download and verify every file of a chunk into a [`StagedChunk`].
  /// Nothing is written unless every file verifies.
  async fn stage_chunk(
    &self,
    version: &str,
    index: usize,
    total_chunks: usize,
    files: &[FileEntry],
  ) -> Result<StagedChunk> {
    self.set_state(SyncState::Downloading { chunk: index, total_chunks });
    let mut raw = Vec::with_capacity(files.len());
    for file in files {
      raw.push(self.fetch(file).await?);
    }

    self.set_state(SyncState::Verifying { chunk: index, total_chunks });
    let mut staged = StagedChunk::new(version, index);
    for (file, bytes) in files.iter().zip(raw) {
      match self.verified(file, bytes).await.and_then(|b| parse_payload(file, &b)) {
        Ok(payload) => staged.stage(payload),
        Err(e) => {
          let discarded = staged.rollback();
          debug!(chunk = index, discarded, "staged chunk rolled back");
          return Err(e);
        }
      }
    }
    Ok(staged)
  }

  async fn fetch(&self, file: &FileEntry) -> Result<Vec<u8>> {
    self
      .settings
      .retry
      .run(&file.path, || self.source.fetch_file(&file.path))
      .await
      .map_err(|source| Error::Fetch { path: file.path.clone(), source })
  }

  /// Return bytes matching `file`'s size and hash, re-downloading up to the
  /// integrity retry limit.
  async fn verified(&self, file: &FileEntry, mut bytes: Vec<u8>) -> Result<Vec<u8>> {
    let mut retries = 0;
    loop {
      if bytes.len() as u64 == file.size && VersionManager::verify_integrity(&bytes, &file.hash) {
        return Ok(bytes);
      }
      if retries >= self.settings.integrity_retries {
        return Err(Error::IntegrityMismatch {
          path:     file.path.clone(),
          expected: file.hash.clone(),
          actual:   hash_bytes(&bytes),
        });
      }
      retries += 1;
      warn!(path = %file.path, retry = retries, "integrity mismatch, re-downloading");
      bytes = self.fetch(file).await?;
    }
  }
}

fn parse_payload(file: &FileEntry, bytes: &[u8]) -> Result<TidbitPayload> {
  let payload: TidbitPayload = serde_json::from_slice(bytes)
    .map_err(|e| Error::Payload { path: file.path.clone(), reason: e.to_string() })?;
  if let Some((species, revision)) = parse_payload_path(&file.path)
    && (species != payload.species_id || revision != payload.tidbit_revision)
  {
    return Err(Error::Payload {
      path:   file.path.clone(),
      reason: format!(
        "holds {} revision {}",
        payload.species_id, payload.tidbit_revision
      ),
    });
  }
  Ok(payload)
}
