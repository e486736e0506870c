//! Tidbits, the generated content units attached to a species revision.
//!
//! A tidbit is immutable once it has been written into a payload file. Later
//! revisions supersede a payload file as a whole; they never edit one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::species::SpeciesId;

/// Sub-scores assigned by the enrichment quality gate, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityScore {
  #[serde(default)]
  pub accuracy:   f64,
  #[serde(default)]
  pub engagement: f64,
  #[serde(default)]
  pub safety:     f64,
  #[serde(default)]
  pub overall:    f64,
}

/// One enriched unit of content for a species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tidbit {
  pub tidbit_id:     String,
  pub title:         String,
  pub body:          String,
  /// Source names in the order the enricher cited them.
  pub source_refs:   Vec<String>,
  pub generated_at:  DateTime<Utc>,
  pub quality_score: QualityScore,
}

/// Contents of one `tidbits.v{N}.json` payload file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TidbitPayload {
  pub species_id:      SpeciesId,
  pub tidbit_revision: u32,
  pub tidbits:         Vec<Tidbit>,
}

impl TidbitPayload {
  pub fn tidbit_ids(&self) -> impl Iterator<Item = &str> {
    self.tidbits.iter().map(|t| t.tidbit_id.as_str())
  }
}
