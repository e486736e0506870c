//! The backend's durable system of record.
//!
//! One JSON document holds every source page ever observed and the current
//! enrichment state of every species. The pipeline mutates it in memory and
//! [`SourceRegistry::save`] replaces the file atomically at the end of a run;
//! that write is the run's single commit point.

use std::{
  collections::{BTreeMap, BTreeSet},
  io::ErrorKind,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use dexsync_core::{
  layout::payload_path,
  manifest::{SourcePageRecord, SpeciesManifestEntry},
  species::{SourcePageId, SpeciesId},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{fsutil::write_atomic, indexer::IndexingResult, planner::ObservedPages, Error, Result};

const SCHEMA_VERSION: u32 = 1;

// ─── Records ─────────────────────────────────────────────────────────────────

/// Every source page the pipeline has seen. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
  pub source_page_id:  SourcePageId,
  pub content_hash:    String,
  pub first_seen_at:   DateTime<Utc>,
  pub last_crawled_at: DateTime<Utc>,
}

/// Per-species view of one of its source pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
  pub hash:            String,
  pub last_crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
  pub tidbit_revision: u32,
  pub tidbit_ids:      BTreeSet<String>,
  pub source_pages:    BTreeMap<SourcePageId, PageState>,
  pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryState {
  schema_version:  u32,
  #[serde(default)]
  dataset_version: Option<String>,
  #[serde(default)]
  updated_at:      Option<DateTime<Utc>>,
  #[serde(default)]
  species:         BTreeMap<SpeciesId, RegistryEntry>,
  #[serde(default)]
  source_pages:    BTreeMap<SourcePageId, SourceDocument>,
}

impl RegistryState {
  fn empty() -> Self {
    Self {
      schema_version:  SCHEMA_VERSION,
      dataset_version: None,
      updated_at:      None,
      species:         BTreeMap::new(),
      source_pages:    BTreeMap::new(),
    }
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SourceRegistry {
  path:  PathBuf,
  state: RegistryState,
}

impl SourceRegistry {
  pub fn empty(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into(), state: RegistryState::empty() }
  }

  /// Read the registry at `path`. A missing file yields an empty registry;
  /// an unparseable one is [`Error::RegistryCorruption`].
  pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    let bytes = match tokio::fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        debug!(path = ?path, "no registry yet, starting empty");
        return Ok(Self::empty(path));
      }
      Err(e) => return Err(Error::io(&path)(e)),
    };

    let state: RegistryState =
      serde_json::from_slice(&bytes).map_err(|e| Error::RegistryCorruption {
        path:   path.clone(),
        reason: e.to_string(),
      })?;
    if state.schema_version != SCHEMA_VERSION {
      return Err(Error::RegistryCorruption {
        path,
        reason: format!("unsupported schema version {}", state.schema_version),
      });
    }

    Ok(Self { path, state })
  }

  /// Like [`Self::load`], but a corrupt registry is replaced by an empty one
  /// when `allow_empty` is set.
  pub async fn load_or_empty(path: impl Into<PathBuf>, allow_empty: bool) -> Result<Self> {
    let path = path.into();
    match Self::load(path.clone()).await {
      Err(Error::RegistryCorruption { reason, .. }) if allow_empty => {
        warn!(path = ?path, %reason, "registry unreadable, starting from an empty registry");
        Ok(Self::empty(path))
      }
      other => other,
    }
  }

  pub fn path(&self) -> &Path { &self.path }

  // ── Lookups ───────────────────────────────────────────────────────────────

  pub fn get_entity(&self, species: SpeciesId) -> Option<&RegistryEntry> {
    self.state.species.get(&species)
  }

  pub fn get_source_page(&self, id: &SourcePageId) -> Option<&SourceDocument> {
    self.state.source_pages.get(id)
  }

  pub fn species_ids(&self) -> impl Iterator<Item = SpeciesId> + '_ {
    self.state.species.keys().copied()
  }

  pub fn species_count(&self) -> usize { self.state.species.len() }

  pub fn source_page_count(&self) -> usize { self.state.source_pages.len() }

  /// Last dataset version published from this registry.
  pub fn dataset_version(&self) -> Option<&str> { self.state.dataset_version.as_deref() }

  pub fn set_dataset_version(&mut self, version: impl Into<String>) {
    self.state.dataset_version = Some(version.into());
  }

  /// The manifest view of a species' current registry state.
  pub fn manifest_entry(&self, species: SpeciesId) -> Option<SpeciesManifestEntry> {
    let entry = self.state.species.get(&species)?;
    let source_pages = entry
      .source_pages
      .iter()
      .map(|(id, page)| SourcePageRecord {
        source_page_id:  id.clone(),
        hash:            page.hash.clone(),
        last_crawled_at: page.last_crawled_at,
        first_seen_at:   self
          .state
          .source_pages
          .get(id)
          .map_or(page.last_crawled_at, |doc| doc.first_seen_at),
      })
      .collect();

    Some(SpeciesManifestEntry {
      tidbit_revision: entry.tidbit_revision,
      last_updated: entry.last_updated_at,
      tidbit_ids: entry.tidbit_ids.iter().cloned().collect(),
      source_pages,
      tidbit_file: payload_path(species, entry.tidbit_revision),
    })
  }

  // ── Mutation ──────────────────────────────────────────────────────────────

  /// Merge an indexing result. Existing source documents keep their
  /// `first_seen_at`.
  pub fn apply_updates(&mut self, result: &IndexingResult) {
    for (species, update) in &result.updates {
      self.state.species.insert(*species, update.registry.clone());

      for doc in &update.pages {
        self
          .state
          .source_pages
          .entry(doc.source_page_id.clone())
          .and_modify(|existing| {
            existing.content_hash = doc.content_hash.clone();
            existing.last_crawled_at = doc.last_crawled_at;
          })
          .or_insert_with(|| doc.clone());
      }
    }
  }

  /// Bump `last_crawled_at` of pages whose content was observed unchanged.
  /// Pages with a different hash are left alone so a later run still sees
  /// them as changed.
  pub fn touch_crawled(&mut self, observed: &ObservedPages, at: DateTime<Utc>) -> usize {
    let mut touched = 0;
    for (id, hash) in observed {
      let Some(doc) = self.state.source_pages.get_mut(id) else { continue };
      if doc.content_hash != *hash {
        continue;
      }
      doc.last_crawled_at = at;
      touched += 1;

      if let Some(page) = self
        .state
        .species
        .get_mut(&id.species())
        .and_then(|entry| entry.source_pages.get_mut(id))
        && page.hash == *hash
      {
        page.last_crawled_at = at;
      }
    }
    touched
  }

  /// Atomically replace the registry file with the in-memory state.
  pub async fn save(&mut self) -> Result<()> {
    self.state.updated_at = Some(Utc::now());
    let bytes = serde_json::to_vec_pretty(&self.state)?;
    write_atomic(&self.path, &bytes).await?;
    debug!(
      path = ?self.path,
      species = self.state.species.len(),
      pages = self.state.source_pages.len(),
      "registry saved"
    );
    Ok(())
  }
}
