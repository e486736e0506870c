//! The `LocalStore` trait and the client-side records it persists.
//!
//! The trait is implemented by storage backends (e.g. `dexsync-store-sqlite`).
//! The sync engine depends on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  species::SpeciesId,
  tidbit::TidbitPayload,
  txn::{CommitReceipt, PayloadMigration, StagedChunk, SyncCompletion},
};

// ─── Records ─────────────────────────────────────────────────────────────────

/// Progress through a chunked download of one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
  /// Release the checkpoint belongs to; a checkpoint for any other release is
  /// stale.
  pub version:     String,
  /// Last chunk whose payloads are fully committed.
  pub chunk_index: usize,
  pub timestamp:   DateTime<Utc>,
}

impl SyncCheckpoint {
  /// The chunk a resumed sync should start from.
  pub fn next_chunk(&self) -> usize { self.chunk_index + 1 }
}

/// One completed sync, appended to the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionHistoryEntry {
  pub version:          String,
  pub timestamp:        DateTime<Utc>,
  pub total_entities:   usize,
  pub sync_duration_ms: u64,
}

/// The client's view of which dataset release is installed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVersionRecord {
  /// `None` until the first sync completes.
  pub current_version: Option<String>,
  /// Oldest first.
  pub version_history: Vec<VersionHistoryEntry>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the client's persistent dataset store.
///
/// Every write method is transactional: it either returns a
/// [`CommitReceipt`] after the data is durable, or an error after rolling
/// back, leaving the previous state untouched.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes.
pub trait LocalStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Version state ─────────────────────────────────────────────────────

  /// Current version and history. An empty store yields the default record.
  fn load_version_record(
    &self,
  ) -> impl Future<Output = Result<LocalVersionRecord, Self::Error>> + Send + '_;

  /// The in-progress checkpoint, if a sync was interrupted.
  fn load_checkpoint(
    &self,
  ) -> impl Future<Output = Result<Option<SyncCheckpoint>, Self::Error>> + Send + '_;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Commit a chunk's payloads and advance the checkpoint to its index, as a
  /// single transaction.
  fn commit_chunk(
    &self,
    chunk: StagedChunk,
  ) -> impl Future<Output = Result<CommitReceipt, Self::Error>> + Send + '_;

  /// Record a completed sync: set the current version, append to the history,
  /// prune species absent from the release and delete the checkpoint.
  fn finish_sync(
    &self,
    completion: SyncCompletion,
  ) -> impl Future<Output = Result<CommitReceipt, Self::Error>> + Send + '_;

  /// Drop any checkpoint, e.g. when it belongs to a superseded release.
  fn clear_checkpoint(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Rewrite the payloads stamped with `migration.from_version` through its
  /// transform in one transaction. Returns the number of payloads rewritten.
  fn migrate_payloads(
    &self,
    migration: PayloadMigration,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn get_payload(
    &self,
    species: SpeciesId,
  ) -> impl Future<Output = Result<Option<TidbitPayload>, Self::Error>> + Send + '_;

  fn species_count(&self) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}
