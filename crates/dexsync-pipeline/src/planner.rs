//! Decides which (source, species) pairs need enrichment this run.

use std::collections::{BTreeMap, BTreeSet};

use dexsync_core::species::{SourcePageId, SpeciesId};

use crate::registry::SourceRegistry;

/// Normalized page hash observed for each page fetched this run.
pub type ObservedPages = BTreeMap<SourcePageId, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanRequest {
  pub targets: Vec<SpeciesId>,
  pub sources: Vec<String>,
  pub force:   bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlPlan {
  /// Species to process, per source.
  pub by_source: BTreeMap<String, BTreeSet<SpeciesId>>,
  /// Requested species excluded because nothing changed.
  pub unchanged: BTreeSet<SpeciesId>,
  pub forced:    bool,
}

impl CrawlPlan {
  pub fn include(&mut self, source: &str, species: SpeciesId) {
    self.by_source.entry(source.to_owned()).or_default().insert(species);
  }

  pub fn is_empty(&self) -> bool { self.by_source.values().all(BTreeSet::is_empty) }

  pub fn contains(&self, species: SpeciesId) -> bool {
    self.by_source.values().any(|set| set.contains(&species))
  }

  /// Every planned species, each once.
  pub fn species(&self) -> BTreeSet<SpeciesId> {
    self.by_source.values().flatten().copied().collect()
  }
}

pub struct CrawlPlanner<'a> {
  registry: &'a SourceRegistry,
}

impl<'a> CrawlPlanner<'a> {
  pub fn new(registry: &'a SourceRegistry) -> Self { Self { registry } }

  /// Build the plan for `request` given the hashes observed this run.
  ///
  /// A pair is planned when forced, when the registry has never seen the
  /// page, or when the observed hash differs from the recorded one. A known
  /// page that was not observed this run is left out. An empty target list
  /// without `force` yields an empty plan; with `force` it means every
  /// species in the registry.
  pub fn build_plan(&self, request: &PlanRequest, observed: &ObservedPages) -> CrawlPlan {
    let mut plan = CrawlPlan { forced: request.force, ..CrawlPlan::default() };
    if request.targets.is_empty() && !request.force {
      return plan;
    }

    let targets: BTreeSet<SpeciesId> = if request.targets.is_empty() {
      self.registry.species_ids().collect()
    } else {
      request.targets.iter().copied().collect()
    };

    for &species in &targets {
      let mut planned = false;
      for source in &request.sources {
        let page = SourcePageId::new(species, source.as_str());
        let include = request.force
          || match (self.registry.get_source_page(&page), observed.get(&page)) {
            (None, _) => true,
            (Some(doc), Some(hash)) => doc.content_hash != *hash,
            (Some(_), None) => false,
          };
        if include {
          plan.include(source, species);
          planned = true;
        }
      }
      if !planned {
        plan.unchanged.insert(species);
      }
    }

    plan
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use dexsync_core::hash::hash_page;

  use super::*;
  use crate::{
    enriched::{CrawledPage, EnrichedSpecies, TidbitDraft},
    indexer::SpeciesIndexer,
  };

  fn registry_with(species: u32, content: &str) -> SourceRegistry {
    let mut registry = SourceRegistry::empty("registry.json");
    let id = SpeciesId::new(species);
    let at = Utc.timestamp_opt(1_000, 0).unwrap();
    let mut plan = CrawlPlan::default();
    plan.include("bulbapedia", id);
    let result = SpeciesIndexer::new(&registry, at).index_enriched_data(
      vec![EnrichedSpecies {
        species_id: id,
        tidbits:    vec![TidbitDraft {
          tidbit_id:     None,
          title:         "Fact".into(),
          body:          "Body".into(),
          source_refs:   vec![],
          generated_at:  at,
          quality_score: Default::default(),
        }],
        pages:      vec![CrawledPage {
          source_page_id: SourcePageId::new(id, "bulbapedia"),
          content:        content.into(),
          fetched_at:     at,
        }],
      }],
      &plan,
    );
    registry.apply_updates(&result);
    registry
  }

  fn request(targets: &[u32], force: bool) -> PlanRequest {
    PlanRequest {
      targets: targets.iter().copied().map(SpeciesId::new).collect(),
      sources: vec!["bulbapedia".into()],
      force,
    }
  }

  fn observed(species: u32, content: &str) -> ObservedPages {
    let mut pages = ObservedPages::new();
    pages.insert(SourcePageId::new(SpeciesId::new(species), "bulbapedia"), hash_page(content));
    pages
  }

  #[test]
  fn empty_targets_without_force_is_a_noop() {
    let registry = registry_with(1, "page");
    let plan = CrawlPlanner::new(&registry).build_plan(&request(&[], false), &observed(1, "new"));
    assert!(plan.is_empty());
  }

  #[test]
  fn unchanged_pages_are_excluded_every_time() {
    let registry = registry_with(1, "page");
    let planner = CrawlPlanner::new(&registry);

    for _ in 0..3 {
      let plan = planner.build_plan(&request(&[1], false), &observed(1, "page"));
      assert!(plan.is_empty());
      assert!(plan.unchanged.contains(&SpeciesId::new(1)));
    }
  }

  #[test]
  fn changed_and_new_pages_are_planned() {
    let registry = registry_with(1, "page");
    let planner = CrawlPlanner::new(&registry);

    let plan = planner.build_plan(&request(&[1], false), &observed(1, "edited page"));
    assert!(plan.contains(SpeciesId::new(1)));

    let plan = planner.build_plan(&request(&[2], false), &ObservedPages::new());
    assert!(plan.contains(SpeciesId::new(2)));
  }

  #[test]
  fn unobserved_known_page_is_not_planned() {
    let registry = registry_with(1, "page");
    let plan = CrawlPlanner::new(&registry).build_plan(&request(&[1], false), &ObservedPages::new());
    assert!(plan.is_empty());
  }

  #[test]
  fn force_plans_everything_including_registry_wide() {
    let registry = registry_with(7, "page");
    let planner = CrawlPlanner::new(&registry);

    let plan = planner.build_plan(&request(&[7], true), &observed(7, "page"));
    assert!(plan.contains(SpeciesId::new(7)));
    assert!(plan.forced);

    let plan = planner.build_plan(&request(&[], true), &ObservedPages::new());
    assert_eq!(plan.species().into_iter().collect::<Vec<_>>(), [SpeciesId::new(7)]);
  }
}
