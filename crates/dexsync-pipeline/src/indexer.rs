//! Diffs freshly enriched species against the registry and assigns revisions.
//!
//! The indexer never touches disk. It produces, per species, the registry
//! entry to store, the manifest entry to publish and (when the revision
//! moved) the payload file to write. A species that fails validation is
//! recorded in [`IndexingResult::failures`] and left out of the delta.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use dexsync_core::{
  hash::{hash_page, tidbit_id},
  layout::payload_path,
  manifest::{SourcePageRecord, SpeciesManifestEntry},
  species::{SourcePageId, SpeciesId},
  tidbit::{Tidbit, TidbitPayload},
};
use tracing::{debug, warn};

use crate::{
  enriched::EnrichedSpecies,
  planner::CrawlPlan,
  registry::{PageState, RegistryEntry, SourceDocument, SourceRegistry},
  Error, Result,
};

// ─── Output ──────────────────────────────────────────────────────────────────

/// A species that was dropped from the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
  pub species: SpeciesId,
  pub reason:  String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesUpdate {
  pub manifest: SpeciesManifestEntry,
  pub registry: RegistryEntry,
  /// Source documents crawled for this species this run.
  pub pages:    Vec<SourceDocument>,
  /// Present when a new payload file has to be written.
  pub payload:  Option<TidbitPayload>,
  pub added:    BTreeSet<String>,
  pub removed:  BTreeSet<String>,
}

impl SpeciesUpdate {
  pub fn payload_path(&self) -> &str { &self.manifest.tidbit_file }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexingResult {
  pub updates:               BTreeMap<SpeciesId, SpeciesUpdate>,
  pub new_tidbit_ids:        Vec<String>,
  pub removed_tidbit_ids:    Vec<String>,
  pub new_source_page_count: usize,
  pub failures:              Vec<EntityFailure>,
}

impl IndexingResult {
  pub fn is_empty(&self) -> bool { self.updates.is_empty() }

  /// Number of species whose revision moved (or which are new).
  pub fn revised_count(&self) -> usize {
    self.updates.values().filter(|u| u.payload.is_some()).count()
  }
}

// ─── Indexer ─────────────────────────────────────────────────────────────────

pub struct SpeciesIndexer<'a> {
  registry: &'a SourceRegistry,
  now:      DateTime<Utc>,
}

impl<'a> SpeciesIndexer<'a> {
  pub fn new(registry: &'a SourceRegistry, now: DateTime<Utc>) -> Self { Self { registry, now } }

  pub fn index_enriched_data(
    &self,
    enriched: Vec<EnrichedSpecies>,
    plan: &CrawlPlan,
  ) -> IndexingResult {
    let mut result = IndexingResult::default();

    for species in enriched {
      let id = species.species_id;
      if !plan.contains(id) {
        debug!(species = %id, "not in crawl plan, skipping");
        continue;
      }

      let outcome = if result.updates.contains_key(&id) {
        Err(Error::EntityProcessing { species: id, reason: "enriched twice in one run".into() })
      } else {
        self.index_species(species)
      };

      match outcome {
        Ok((update, new_pages)) => {
          result.new_tidbit_ids.extend(update.added.iter().cloned());
          result.removed_tidbit_ids.extend(update.removed.iter().cloned());
          result.new_source_page_count += new_pages;
          result.updates.insert(id, update);
        }
        Err(e) => {
          warn!(species = %id, error = %e, "species dropped from this run");
          result.failures.push(EntityFailure { species: id, reason: e.to_string() });
        }
      }
    }

    result.new_tidbit_ids.sort();
    result.removed_tidbit_ids.sort();
    result
  }

  fn index_species(&self, enriched: EnrichedSpecies) -> Result<(SpeciesUpdate, usize)> {
    let species = enriched.species_id;
    let fail = |reason: String| Error::EntityProcessing { species, reason };

    // 1. tidbit ids
    let mut tidbits = Vec::with_capacity(enriched.tidbits.len());
    let mut ids = BTreeSet::new();
    for draft in enriched.tidbits {
      if draft.title.trim().is_empty() {
        return Err(fail("tidbit with empty title".into()));
      }
      let tidbit_id = draft
        .tidbit_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| tidbit_id(species, draft.generated_at, &draft.title));
      if !ids.insert(tidbit_id.clone()) {
        return Err(fail(format!("duplicate tidbit id {tidbit_id}")));
      }
      tidbits.push(Tidbit {
        tidbit_id,
        title: draft.title,
        body: draft.body,
        source_refs: draft.source_refs,
        generated_at: draft.generated_at,
        quality_score: draft.quality_score,
      });
    }

    // 2-3. diff and revision
    let prior = self.registry.get_entity(species);
    let (added, removed): (BTreeSet<String>, BTreeSet<String>) = match prior {
      None => (ids.clone(), BTreeSet::new()),
      Some(p) => (
        ids.difference(&p.tidbit_ids).cloned().collect(),
        p.tidbit_ids.difference(&ids).cloned().collect(),
      ),
    };
    let (revision, last_updated, revised) = match prior {
      None => (1, self.now, true),
      Some(p) if added.is_empty() && removed.is_empty() => {
        (p.tidbit_revision, p.last_updated_at, false)
      }
      Some(p) => (p.tidbit_revision + 1, self.now, true),
    };

    // 4. source pages
    let mut page_states: BTreeMap<SourcePageId, PageState> =
      prior.map(|p| p.source_pages.clone()).unwrap_or_default();
    let mut docs = Vec::with_capacity(enriched.pages.len());
    let mut new_pages = 0;
    for page in &enriched.pages {
      if page.source_page_id.species() != species {
        return Err(fail(format!("page {} belongs to another species", page.source_page_id)));
      }
      let hash = hash_page(&page.content);
      let first_seen_at = match self.registry.get_source_page(&page.source_page_id) {
        Some(doc) => doc.first_seen_at,
        None => {
          new_pages += 1;
          page.fetched_at
        }
      };
      page_states.insert(page.source_page_id.clone(), PageState {
        hash:            hash.clone(),
        last_crawled_at: page.fetched_at,
      });
      docs.push(SourceDocument {
        source_page_id: page.source_page_id.clone(),
        content_hash: hash,
        first_seen_at,
        last_crawled_at: page.fetched_at,
      });
    }

    // 5. fragments
    let source_pages = page_states
      .iter()
      .map(|(id, state)| SourcePageRecord {
        source_page_id:  id.clone(),
        hash:            state.hash.clone(),
        last_crawled_at: state.last_crawled_at,
        first_seen_at:   docs
          .iter()
          .find(|d| d.source_page_id == *id)
          .map(|d| d.first_seen_at)
          .or_else(|| self.registry.get_source_page(id).map(|d| d.first_seen_at))
          .unwrap_or(state.last_crawled_at),
      })
      .collect();

    let manifest = SpeciesManifestEntry {
      tidbit_revision: revision,
      last_updated,
      tidbit_ids: ids.iter().cloned().collect(),
      source_pages,
      tidbit_file: payload_path(species, revision),
    };
    let registry = RegistryEntry {
      tidbit_revision: revision,
      tidbit_ids:      ids,
      source_pages:    page_states,
      last_updated_at: last_updated,
    };
    let payload = revised.then(|| TidbitPayload {
      species_id: species,
      tidbit_revision: revision,
      tidbits,
    });

    debug!(
      species = %species,
      revision,
      added = added.len(),
      removed = removed.len(),
      "species indexed"
    );

    Ok((SpeciesUpdate { manifest, registry, pages: docs, payload, added, removed }, new_pages))
  }
}
