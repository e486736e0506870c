//! Explicit units of work for the client's local store.
//!
//! Writes go through two phases. Staging a payload into a [`StagedChunk`]
//! only means the operation was *accepted*; nothing is durable until the
//! store's transaction confirms and hands back a [`CommitReceipt`]. Dropping
//! or rolling back a staged chunk discards it without touching the store.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{species::SpeciesId, store::LocalStore, tidbit::TidbitPayload};

/// Rewrites one stored payload document during a data migration.
pub type PayloadTransform =
  Arc<dyn Fn(serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync>;

/// A payload rewrite between two dataset versions.
///
/// Only rows still stamped with `from_version` are rewritten; they are
/// restamped with `to_version`, so applying the same migration twice leaves
/// the second run with nothing to do.
#[derive(Clone)]
pub struct PayloadMigration {
  pub from_version: String,
  pub to_version:   String,
  pub transform:    PayloadTransform,
}

impl fmt::Debug for PayloadMigration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PayloadMigration")
      .field("from_version", &self.from_version)
      .field("to_version", &self.to_version)
      .finish_non_exhaustive()
  }
}

/// Payloads downloaded and verified for one chunk, awaiting commit together
/// with that chunk's checkpoint.
#[derive(Debug, Clone)]
pub struct StagedChunk {
  pub version:     String,
  pub chunk_index: usize,
  pub payloads:    Vec<TidbitPayload>,
}

impl StagedChunk {
  pub fn new(version: impl Into<String>, chunk_index: usize) -> Self {
    Self { version: version.into(), chunk_index, payloads: Vec::new() }
  }

  /// Accept a verified payload into this unit of work.
  pub fn stage(&mut self, payload: TidbitPayload) { self.payloads.push(payload); }

  pub fn len(&self) -> usize { self.payloads.len() }

  pub fn is_empty(&self) -> bool { self.payloads.is_empty() }

  /// Write every staged payload and the chunk checkpoint in one transaction.
  ///
  /// Returns only once the store has confirmed the commit.
  pub async fn commit<S: LocalStore>(self, store: &S) -> Result<CommitReceipt, S::Error> {
    store.commit_chunk(self).await
  }

  /// Discard the staged payloads; returns how many were dropped.
  pub fn rollback(self) -> usize { self.payloads.len() }
}

/// Everything the store needs to finalize a successful sync.
#[derive(Debug, Clone)]
pub struct SyncCompletion {
  pub version:          String,
  pub completed_at:     DateTime<Utc>,
  pub total_entities:   usize,
  pub sync_duration_ms: u64,
  /// Species present in the new release; anything else is pruned.
  pub retain_species:   Vec<SpeciesId>,
  /// Rewrite applied to payloads left over from the previous release, in the
  /// same transaction that installs the new version.
  pub migration:        Option<PayloadMigration>,
}

/// Confirmation that a transaction reached durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
  /// The chunk whose checkpoint was written, if the unit carried one.
  pub chunk_index:  Option<usize>,
  pub rows_written: usize,
  /// Payloads rewritten by a data migration within the same transaction.
  pub migrated:     usize,
  pub committed_at: DateTime<Utc>,
}
