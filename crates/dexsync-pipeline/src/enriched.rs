//! Values exchanged with the external crawler and enricher.

use chrono::{DateTime, Utc};
use dexsync_core::{
  species::{SourcePageId, SpeciesId},
  tidbit::QualityScore,
};
use serde::{Deserialize, Serialize};

/// Raw content of one source page as returned by a [`crate::Crawler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawledPage {
  pub source_page_id: SourcePageId,
  pub content:        String,
  pub fetched_at:     DateTime<Utc>,
}

/// A tidbit as produced by the enricher, before the indexer assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TidbitDraft {
  /// Kept as-is when present and non-empty.
  #[serde(default)]
  pub tidbit_id:     Option<String>,
  pub title:         String,
  pub body:          String,
  #[serde(default)]
  pub source_refs:   Vec<String>,
  pub generated_at:  DateTime<Utc>,
  #[serde(default)]
  pub quality_score: QualityScore,
}

/// Enrichment output for one species together with the pages it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedSpecies {
  pub species_id: SpeciesId,
  pub tidbits:    Vec<TidbitDraft>,
  pub pages:      Vec<CrawledPage>,
}
