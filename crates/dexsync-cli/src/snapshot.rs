//! Offline crawl snapshots.
//!
//! A snapshot is a JSON file holding pages captured by an external crawler and
//! the tidbits an external enricher produced for them:
//!
//! ```json
//! {
//!   "pages": [
//!     { "sourcePageId": "0025:bulbapedia", "content": "...", "fetchedAt": "2024-05-01T00:00:00Z" }
//!   ],
//!   "enrichment": {
//!     "0025": [ { "title": "...", "body": "...", "generatedAt": "2024-05-01T00:00:00Z" } ]
//!   }
//! }
//! ```

use std::{
  collections::{BTreeMap, BTreeSet},
  convert::Infallible,
  path::Path,
};

use anyhow::Context as _;
use dexsync_core::species::SpeciesId;
use dexsync_pipeline::{
  Crawler, Enricher,
  enriched::{CrawledPage, TidbitDraft},
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
  #[serde(default)]
  pub pages:      Vec<CrawledPage>,
  #[serde(default)]
  pub enrichment: BTreeMap<SpeciesId, Vec<TidbitDraft>>,
}

impl Snapshot {
  pub async fn read(path: &Path) -> anyhow::Result<Self> {
    let raw = tokio::fs::read(path)
      .await
      .with_context(|| format!("reading snapshot {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing snapshot {}", path.display()))
  }

  /// Source names in order of first appearance.
  pub fn sources(&self) -> Vec<String> {
    let mut seen = BTreeSet::new();
    self
      .pages
      .iter()
      .map(|p| p.source_page_id.source())
      .filter(|s| seen.insert(*s))
      .map(str::to_owned)
      .collect()
  }

  pub fn species(&self) -> Vec<SpeciesId> {
    let ids: BTreeSet<_> = self.pages.iter().map(|p| p.source_page_id.species()).collect();
    ids.into_iter().collect()
  }

  pub fn into_parts(self) -> (SnapshotCrawler, SnapshotEnricher) {
    let pages = self
      .pages
      .into_iter()
      .map(|p| ((p.source_page_id.source().to_owned(), p.source_page_id.species()), p))
      .collect();
    (SnapshotCrawler { pages }, SnapshotEnricher { tidbits: self.enrichment })
  }
}

/// Serves captured pages; a missing page means the source has none.
#[derive(Debug)]
pub struct SnapshotCrawler {
  pages: BTreeMap<(String, SpeciesId), CrawledPage>,
}

impl Crawler for SnapshotCrawler {
  type Error = Infallible;

  async fn fetch<'a>(
    &'a self,
    source: &'a str,
    species: SpeciesId,
  ) -> Result<Option<CrawledPage>, Infallible> {
    Ok(self.pages.get(&(source.to_owned(), species)).cloned())
  }
}

#[derive(Debug, Error)]
#[error("snapshot has no enrichment for species {0}")]
pub struct MissingEnrichment(SpeciesId);

#[derive(Debug)]
pub struct SnapshotEnricher {
  tidbits: BTreeMap<SpeciesId, Vec<TidbitDraft>>,
}

impl Enricher for SnapshotEnricher {
  type Error = MissingEnrichment;

  async fn enrich<'a>(
    &'a self,
    species: SpeciesId,
    _pages: &'a [CrawledPage],
  ) -> Result<Vec<TidbitDraft>, MissingEnrichment> {
    self.tidbits.get(&species).cloned().ok_or(MissingEnrichment(species))
  }
}
