//! Published documents: the species manifest and the release version record.
//!
//! Both are produced once per pipeline run and never edited afterwards; a new
//! run publishes new documents that replace them at the distribution root.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::species::{SourcePageId, SpeciesId};

// ─── Species manifest ────────────────────────────────────────────────────────

/// Aggregate counts over the whole dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
  pub total_pokemon: usize,
  pub total_tidbits: usize,
  /// Source pages observed for the first time in this run.
  pub new_pages:     usize,
  pub generated_at:  DateTime<Utc>,
}

/// A source page as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePageRecord {
  pub source_page_id:  SourcePageId,
  pub hash:            String,
  pub last_crawled_at: DateTime<Utc>,
  pub first_seen_at:   DateTime<Utc>,
}

/// Manifest entry for one species.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesManifestEntry {
  pub tidbit_revision: u32,
  pub last_updated:    DateTime<Utc>,
  /// Sorted for stable output.
  pub tidbit_ids:      Vec<String>,
  pub source_pages:    Vec<SourcePageRecord>,
  /// Relative path of the payload file for `tidbit_revision`.
  pub tidbit_file:     String,
}

/// The single published index of every species and its current revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
  pub manifest_version: DateTime<Utc>,
  pub dataset_version:  String,
  pub summary:          ManifestSummary,
  pub species:          BTreeMap<SpeciesId, SpeciesManifestEntry>,
  pub new_tidbits:      Vec<String>,
  pub removed_tidbits:  Vec<String>,
}

// ─── Release version record ──────────────────────────────────────────────────

/// One downloadable file in a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
  pub path: String,
  pub size: u64,
  /// SHA-256 of the file bytes, lowercase hex.
  pub hash: String,
}

/// The record clients poll to decide whether an update is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseManifest {
  /// Semantic version of the dataset.
  pub version:    String,
  /// Publication time in unix milliseconds.
  pub timestamp:  i64,
  pub files:      Vec<FileEntry>,
  pub total_size: u64,
}

impl ReleaseManifest {
  pub fn new(version: impl Into<String>, timestamp: DateTime<Utc>, files: Vec<FileEntry>) -> Self {
    let total_size = files.iter().map(|f| f.size).sum();
    Self {
      version: version.into(),
      timestamp: timestamp.timestamp_millis(),
      files,
      total_size,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn manifest_uses_camel_case_wire_names() {
    let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut species = BTreeMap::new();
    species.insert(SpeciesId::new(25), SpeciesManifestEntry {
      tidbit_revision: 2,
      last_updated:    ts,
      tidbit_ids:      vec!["0025-a".into()],
      source_pages:    vec![],
      tidbit_file:     "species/0025/tidbits.v2.json".into(),
    });
    let manifest = Manifest {
      manifest_version: ts,
      dataset_version:  "1.0.3".into(),
      summary:          ManifestSummary {
        total_pokemon: 1,
        total_tidbits: 1,
        new_pages:     0,
        generated_at:  ts,
      },
      species,
      new_tidbits:      vec![],
      removed_tidbits:  vec![],
    };

    let json = serde_json::to_value(&manifest).unwrap();
    assert_eq!(json["summary"]["totalPokemon"], 1);
    assert_eq!(json["species"]["0025"]["tidbitRevision"], 2);
    assert_eq!(
      json["species"]["0025"]["tidbitFile"],
      "species/0025/tidbits.v2.json"
    );
    assert!(json.get("newTidbits").is_some());
  }

  #[test]
  fn release_total_size_sums_files() {
    let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let release = ReleaseManifest::new("1.0.0", ts, vec![
      FileEntry { path: "a".into(), size: 10, hash: "x".into() },
      FileEntry { path: "b".into(), size: 32, hash: "y".into() },
    ]);
    assert_eq!(release.total_size, 42);
    assert_eq!(release.timestamp, 1_700_000_000_000);
  }
}
