//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, species ids in their padded
//! form and payloads as compact JSON.

use chrono::{DateTime, Utc};
use dexsync_core::{
  species::SpeciesId,
  store::{SyncCheckpoint, VersionHistoryEntry},
  tidbit::TidbitPayload,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

// ─── SpeciesId ───────────────────────────────────────────────────────────────

pub fn encode_species(id: SpeciesId) -> String { id.padded() }

// ─── Integers ────────────────────────────────────────────────────────────────

pub fn decode_count(n: i64, column: &str) -> Result<usize> {
  usize::try_from(n).map_err(|_| Error::Decode(format!("negative {column}: {n}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from the `sync_checkpoint` row.
pub struct RawCheckpoint {
  pub version:     String,
  pub chunk_index: i64,
  pub timestamp:   String,
}

impl RawCheckpoint {
  pub fn into_checkpoint(self) -> Result<SyncCheckpoint> {
    Ok(SyncCheckpoint {
      version:     self.version,
      chunk_index: decode_count(self.chunk_index, "chunk_index")?,
      timestamp:   decode_dt(&self.timestamp)?,
    })
  }
}

/// Raw strings read directly from a `version_history` row.
pub struct RawHistory {
  pub version:          String,
  pub timestamp:        String,
  pub total_entities:   i64,
  pub sync_duration_ms: i64,
}

impl RawHistory {
  pub fn into_entry(self) -> Result<VersionHistoryEntry> {
    Ok(VersionHistoryEntry {
      version:          self.version,
      timestamp:        decode_dt(&self.timestamp)?,
      total_entities:   decode_count(self.total_entities, "total_entities")?,
      sync_duration_ms: u64::try_from(self.sync_duration_ms)
        .map_err(|_| Error::Decode(format!("negative duration: {}", self.sync_duration_ms)))?,
    })
  }
}

pub fn decode_payload(json: &str) -> Result<TidbitPayload> { Ok(serde_json::from_str(json)?) }
