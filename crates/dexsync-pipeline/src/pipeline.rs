//! One publishing run, end to end.

use std::{
  collections::{BTreeMap, BTreeSet},
  future::Future,
};

use chrono::Utc;
use dexsync_core::{hash::hash_page, semver::Version, species::SpeciesId};
use tracing::{debug, info, warn};

use crate::{
  cache::EnrichmentCache,
  circuit::CircuitBreaker,
  config::PipelineConfig,
  enriched::{CrawledPage, EnrichedSpecies, TidbitDraft},
  indexer::{EntityFailure, SpeciesIndexer},
  lock::RegistryLock,
  manifest::ManifestBuilder,
  planner::{CrawlPlan, CrawlPlanner, ObservedPages, PlanRequest},
  rate_limit::SourceLimiter,
  registry::SourceRegistry,
  Error, Result,
};

// ─── Collaborators ───────────────────────────────────────────────────────────

/// Fetches raw source pages. Site-specific extraction lives behind this.
pub trait Crawler: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// `Ok(None)` means the source has no page for this species.
  fn fetch<'a>(
    &'a self,
    source: &'a str,
    species: SpeciesId,
  ) -> impl Future<Output = Result<Option<CrawledPage>, Self::Error>> + Send + 'a;
}

/// Turns crawled pages into tidbits.
pub trait Enricher: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn enrich<'a>(
    &'a self,
    species: SpeciesId,
    pages: &'a [CrawledPage],
  ) -> impl Future<Output = Result<Vec<TidbitDraft>, Self::Error>> + Send + 'a;
}

// ─── Options & outcome ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
  pub targets:              Vec<SpeciesId>,
  pub force:                bool,
  /// Explicit dataset version; defaults to a patch bump of the last one.
  pub dataset_version:      Option<String>,
  /// Start from an empty registry when the existing one cannot be read.
  pub allow_empty_registry: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
  /// Nothing was requested.
  NoOp,
  /// Every requested page was unchanged, or nothing survived indexing.
  Unchanged { checked: usize, failures: Vec<EntityFailure> },
  Published(PublishReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
  pub dataset_version:     String,
  pub species_indexed:     usize,
  pub revisions_bumped:    usize,
  pub payloads_written:    usize,
  pub new_tidbits:         Vec<String>,
  pub removed_tidbits:     Vec<String>,
  pub new_pages:           usize,
  pub failures:            Vec<EntityFailure>,
  pub unavailable_sources: Vec<String>,
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CrawlOutput {
  pages:       BTreeMap<SpeciesId, Vec<CrawledPage>>,
  observed:    ObservedPages,
  unavailable: BTreeSet<String>,
}

pub struct Pipeline<C, E> {
  config:   PipelineConfig,
  crawler:  C,
  enricher: E,
  limiters: BTreeMap<String, SourceLimiter>,
  breakers: BTreeMap<String, CircuitBreaker>,
  cache:    EnrichmentCache,
}

impl<C: Crawler, E: Enricher> Pipeline<C, E> {
  pub fn new(config: PipelineConfig, crawler: C, enricher: E) -> Self {
    let mut limiters = BTreeMap::new();
    let mut breakers = BTreeMap::new();
    for source in config.source_names() {
      limiters.insert(source.clone(), SourceLimiter::new(config.rate_limit_for(&source)));
      breakers.insert(source.clone(), CircuitBreaker::new(&source, config.breaker_for(&source)));
    }
    Self { config, crawler, enricher, limiters, breakers, cache: EnrichmentCache::new() }
  }

  pub fn config(&self) -> &PipelineConfig { &self.config }

  pub fn cache(&self) -> &EnrichmentCache { &self.cache }

  pub fn breaker(&self, source: &str) -> Option<&CircuitBreaker> { self.breakers.get(source) }

  /// Run the pipeline once. The registry file is only rewritten after every
  /// payload, `manifest.json` and `version.json` are in place.
  pub async fn run(&mut self, options: PipelineOptions) -> Result<PipelineOutcome> {
    if options.targets.is_empty() && !options.force {
      info!("no targets requested, nothing to do");
      return Ok(PipelineOutcome::NoOp);
    }

    let _lock = RegistryLock::acquire(&self.config.registry_path)?;
    let mut registry =
      SourceRegistry::load_or_empty(&self.config.registry_path, options.allow_empty_registry)
        .await?;

    let targets: Vec<SpeciesId> = if options.targets.is_empty() {
      registry.species_ids().collect()
    } else {
      options.targets.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    };
    if targets.is_empty() {
      info!("forced run over an empty registry, nothing to do");
      return Ok(PipelineOutcome::NoOp);
    }

    // crawl and plan
    let crawl = self.crawl(&targets).await;
    let request = PlanRequest {
      targets: targets.clone(),
      sources: self.config.source_names(),
      force:   options.force,
    };
    let plan = CrawlPlanner::new(&registry).build_plan(&request, &crawl.observed);
    info!(
      targets = targets.len(),
      planned = plan.species().len(),
      unchanged = plan.unchanged.len(),
      "crawl plan built"
    );

    if plan.is_empty() {
      return self.finish_unchanged(&mut registry, &crawl, targets.len(), Vec::new()).await;
    }

    // enrich and index
    let mut failures = Vec::new();
    let enriched = self.enrich(&plan, &crawl, &mut failures).await?;
    let result = SpeciesIndexer::new(&registry, Utc::now()).index_enriched_data(enriched, &plan);
    failures.extend(result.failures.iter().cloned());

    if result.is_empty() {
      warn!(failures = failures.len(), "no species survived indexing, nothing to publish");
      return self.finish_unchanged(&mut registry, &crawl, targets.len(), failures).await;
    }

    // publish
    registry.apply_updates(&result);
    let version = resolve_version(options.dataset_version.as_deref(), registry.dataset_version())?;
    let builder = ManifestBuilder::new(&self.config.distribution_root);
    let manifest = builder.build(&result, &registry, &version);
    let payloads_written = builder.persist_tidbit_payloads(&result).await?;
    builder.persist_manifest(&manifest).await?;

    // commit
    registry.set_dataset_version(&version);
    registry.touch_crawled(&crawl.observed, Utc::now());
    registry.save().await?;

    let report = PublishReport {
      dataset_version: version,
      species_indexed: result.updates.len(),
      revisions_bumped: result.revised_count(),
      payloads_written,
      new_tidbits: result.new_tidbit_ids.clone(),
      removed_tidbits: result.removed_tidbit_ids.clone(),
      new_pages: result.new_source_page_count,
      failures,
      unavailable_sources: crawl.unavailable.into_iter().collect(),
    };
    info!(
      version = %report.dataset_version,
      species = report.species_indexed,
      revised = report.revisions_bumped,
      failures = report.failures.len(),
      "pipeline run published"
    );
    Ok(PipelineOutcome::Published(report))
  }

  async fn finish_unchanged(
    &self,
    registry: &mut SourceRegistry,
    crawl: &CrawlOutput,
    checked: usize,
    failures: Vec<EntityFailure>,
  ) -> Result<PipelineOutcome> {
    let touched = registry.touch_crawled(&crawl.observed, Utc::now());
    if touched > 0 {
      registry.save().await?;
    }
    info!(checked, touched, "no changes to publish");
    Ok(PipelineOutcome::Unchanged { checked, failures })
  }

  async fn crawl(&self, targets: &[SpeciesId]) -> CrawlOutput {
    let mut out = CrawlOutput::default();

    for source in self.config.sources.iter().map(|s| &s.name) {
      let (Some(limiter), Some(breaker)) = (self.limiters.get(source), self.breakers.get(source))
      else {
        continue;
      };

      for &species in targets {
        if let Err(e) = breaker.check() {
          warn!(source = %source, error = %e, "skipping source for the rest of this run");
          out.unavailable.insert(source.clone());
          break;
        }

        limiter.acquire().await;
        match self.crawler.fetch(source, species).await {
          Ok(Some(page)) => {
            breaker.record_success();
            if page.source_page_id.species() != species || page.source_page_id.source() != source {
              warn!(source = %source, species = %species, page = %page.source_page_id, "crawler returned a foreign page, ignoring");
              continue;
            }
            out.observed.insert(page.source_page_id.clone(), hash_page(&page.content));
            out.pages.entry(species).or_default().push(page);
          }
          Ok(None) => {
            breaker.record_success();
            debug!(source = %source, species = %species, "source has no page");
          }
          Err(e) => {
            breaker.record_failure();
            warn!(source = %source, species = %species, error = %e, "crawl failed");
          }
        }
      }
    }

    out
  }

  async fn enrich(
    &mut self,
    plan: &CrawlPlan,
    crawl: &CrawlOutput,
    failures: &mut Vec<EntityFailure>,
  ) -> Result<Vec<EnrichedSpecies>> {
    let mut enriched = Vec::new();

    for species in plan.species() {
      let Some(pages) = crawl.pages.get(&species) else {
        debug!(species = %species, "planned but nothing fetched");
        continue;
      };

      let key = EnrichmentCache::key_for(species, pages)?;
      let tidbits = match self.cache.get(&key) {
        Some(cached) => {
          debug!(species = %species, "enrichment served from cache");
          cached
        }
        None => match self.enricher.enrich(species, pages).await {
          Ok(drafts) => {
            self.cache.insert(key, drafts.clone());
            drafts
          }
          Err(e) => {
            let error = Error::EntityProcessing { species, reason: e.to_string() };
            warn!(species = %species, error = %error, "enrichment failed");
            failures.push(EntityFailure { species, reason: error.to_string() });
            continue;
          }
        },
      };

      enriched.push(EnrichedSpecies { species_id: species, tidbits, pages: pages.clone() });
    }

    Ok(enriched)
  }
}

/// The explicit version if given (it must be newer than the last one),
/// otherwise a patch bump of the last published version, otherwise `1.0.0`.
pub fn resolve_version(explicit: Option<&str>, published: Option<&str>) -> Result<String> {
  let published = published.map(str::parse::<Version>).transpose()?;

  match (explicit, published) {
    (Some(requested), published) => {
      let requested: Version = requested.parse()?;
      if let Some(published) = published
        && requested.precedence(&published).is_le()
      {
        return Err(Error::VersionNotIncreasing {
          requested: requested.to_string(),
          published: published.to_string(),
        });
      }
      Ok(requested.to_string())
    }
    (None, Some(published)) => Ok(published.bump_patch().to_string()),
    (None, None) => Ok(Version::new(1, 0, 0).to_string()),
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::HashMap,
    path::Path,
    sync::{
      atomic::{AtomicUsize, Ordering},
      Mutex,
    },
  };

  use chrono::{DateTime, TimeZone};
  use dexsync_core::{layout::VERSION_FILE, manifest::Manifest, species::SourcePageId};

  use super::*;
  use crate::config::{BreakerConfig, RateLimitConfig, SourceConfig};

  #[derive(Debug, thiserror::Error)]
  #[error("{0}")]
  struct MockError(String);

  /// Pages served per species; a species mapped to `None` fails.
  #[derive(Default)]
  struct MockCrawler {
    pages:   Mutex<HashMap<u32, Option<String>>>,
    calls:   AtomicUsize,
    /// Source of every fetch, in call order.
    visited: Mutex<Vec<String>>,
  }

  impl MockCrawler {
    fn set(&self, species: u32, content: Option<&str>) {
      self.pages.lock().unwrap().insert(species, content.map(str::to_owned));
    }
  }

  impl Crawler for &MockCrawler {
    type Error = MockError;

    async fn fetch<'a>(
      &'a self,
      source: &'a str,
      species: SpeciesId,
    ) -> Result<Option<CrawledPage>, MockError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.visited.lock().unwrap().push(source.to_owned());
      match self.pages.lock().unwrap().get(&species.number()) {
        None => Ok(None),
        Some(None) => Err(MockError("timeout".into())),
        Some(Some(content)) => Ok(Some(CrawledPage {
          source_page_id: SourcePageId::new(species, source),
          content:        content.clone(),
          fetched_at:     Utc::now(),
        })),
      }
    }
  }

  /// Titles returned per species; a species without an entry fails.
  #[derive(Default)]
  struct MockEnricher {
    titles: Mutex<HashMap<u32, Vec<String>>>,
    calls:  AtomicUsize,
  }

  impl MockEnricher {
    fn set(&self, species: u32, titles: &[&str]) {
      self
        .titles
        .lock()
        .unwrap()
        .insert(species, titles.iter().map(|t| (*t).to_owned()).collect());
    }
  }

  fn generated_at() -> DateTime<Utc> { Utc.timestamp_opt(1_700_000_000, 0).unwrap() }

  impl Enricher for &MockEnricher {
    type Error = MockError;

    async fn enrich<'a>(
      &'a self,
      species: SpeciesId,
      _pages: &'a [CrawledPage],
    ) -> Result<Vec<TidbitDraft>, MockError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let titles = self.titles.lock().unwrap().get(&species.number()).cloned();
      let titles = titles.ok_or_else(|| MockError("model refused".into()))?;
      Ok(
        titles
          .into_iter()
          .map(|title| TidbitDraft {
            tidbit_id: None,
            body: format!("{title} is true"),
            title,
            source_refs: vec!["bulbapedia".into()],
            generated_at: generated_at(),
            quality_score: Default::default(),
          })
          .collect(),
      )
    }
  }

  fn config(root: &Path) -> PipelineConfig {
    PipelineConfig {
      registry_path:     root.join("registry.json"),
      distribution_root: root.join("dist"),
      rate_limit:        RateLimitConfig {
        requests_per_second: 1000.0,
        requests_per_minute: 60_000.0,
        burst:               100,
      },
      breaker:           BreakerConfig { failure_threshold: 2, cooldown_secs: 600 },
      sources:           vec![SourceConfig::named("bulbapedia")],
    }
  }

  fn targets(ids: &[u32]) -> PipelineOptions {
    PipelineOptions {
      targets: ids.iter().copied().map(SpeciesId::new).collect(),
      ..PipelineOptions::default()
    }
  }

  async fn read_manifest(root: &Path) -> Manifest {
    let bytes = tokio::fs::read(root.join("dist").join("manifest.json")).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  fn published(outcome: PipelineOutcome) -> PublishReport {
    match outcome {
      PipelineOutcome::Published(report) => report,
      other => panic!("expected a publish, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn empty_targets_short_circuit() {
    let dir = tempfile::tempdir().unwrap();
    let crawler = MockCrawler::default();
    let enricher = MockEnricher::default();
    let mut pipeline = Pipeline::new(config(dir.path()), &crawler, &enricher);

    assert_eq!(pipeline.run(PipelineOptions::default()).await.unwrap(), PipelineOutcome::NoOp);
    assert_eq!(crawler.calls.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("registry.json").exists());
  }

  #[tokio::test]
  async fn sources_are_crawled_in_configured_order() {
    let dir = tempfile::tempdir().unwrap();
    let crawler = MockCrawler::default();
    crawler.set(1, Some("Bulbasaur"));
    crawler.set(4, Some("Charmander"));
    let enricher = MockEnricher::default();
    enricher.set(1, &["Seed"]);
    enricher.set(4, &["Flame"]);

    let mut cfg = config(dir.path());
    cfg.sources = vec![SourceConfig::named("serebii"), SourceConfig::named("bulbapedia")];
    let mut pipeline = Pipeline::new(cfg, &crawler, &enricher);
    pipeline.run(targets(&[1, 4])).await.unwrap();

    let visited = crawler.visited.lock().unwrap().clone();
    assert_eq!(visited, ["serebii", "serebii", "bulbapedia", "bulbapedia"]);
  }

  #[tokio::test]
  async fn unchanged_rerun_skips_enrichment_and_keeps_revision() {
    let dir = tempfile::tempdir().unwrap();
    let crawler = MockCrawler::default();
    let enricher = MockEnricher::default();
    crawler.set(7, Some("<p>Squirtle page, hash one</p>"));
    enricher.set(7, &["Shell", "Bubbles", "Tail"]);
    let mut pipeline = Pipeline::new(config(dir.path()), &crawler, &enricher);

    let first = published(pipeline.run(targets(&[7])).await.unwrap());
    assert_eq!(first.dataset_version, "1.0.0");
    let manifest = read_manifest(dir.path()).await;
    let entry = &manifest.species[&SpeciesId::new(7)];
    assert_eq!(entry.tidbit_revision, 1);
    assert_eq!(entry.tidbit_ids.len(), 3);

    let second = pipeline.run(targets(&[7])).await.unwrap();
    assert!(matches!(second, PipelineOutcome::Unchanged { checked: 1, .. }));
    assert_eq!(enricher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(read_manifest(dir.path()).await, manifest);
  }

  #[tokio::test]
  async fn changed_page_bumps_revision_with_diff() {
    let dir = tempfile::tempdir().unwrap();
    let crawler = MockCrawler::default();
    let enricher = MockEnricher::default();
    crawler.set(7, Some("hash one"));
    enricher.set(7, &["Shell", "Bubbles", "Tail"]);
    let mut pipeline = Pipeline::new(config(dir.path()), &crawler, &enricher);
    published(pipeline.run(targets(&[7])).await.unwrap());

    crawler.set(7, Some("hash two"));
    enricher.set(7, &["Shell", "Hydro"]);
    let report = published(pipeline.run(targets(&[7])).await.unwrap());

    let id = |title: &str| dexsync_core::hash::tidbit_id(SpeciesId::new(7), generated_at(), title);
    assert_eq!(report.dataset_version, "1.0.1");
    assert_eq!(report.new_tidbits, [id("Hydro")]);
    let mut removed = vec![id("Bubbles"), id("Tail")];
    removed.sort();
    assert_eq!(report.removed_tidbits, removed);

    let manifest = read_manifest(dir.path()).await;
    let entry = &manifest.species[&SpeciesId::new(7)];
    assert_eq!(entry.tidbit_revision, 2);
    assert_eq!(entry.tidbit_file, "species/0007/tidbits.v2.json");
    assert!(dir.path().join("dist/species/0007/tidbits.v1.json").exists());

    let builder = ManifestBuilder::new(dir.path().join("dist"));
    assert!(builder.verify_distribution().await.unwrap().is_ok());
  }

  #[tokio::test]
  async fn enrichment_failure_is_isolated_and_retried_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let crawler = MockCrawler::default();
    let enricher = MockEnricher::default();
    crawler.set(1, Some("bulbasaur"));
    crawler.set(4, Some("charmander"));
    enricher.set(1, &["Seed"]);
    let mut pipeline = Pipeline::new(config(dir.path()), &crawler, &enricher);

    let report = published(pipeline.run(targets(&[1, 4])).await.unwrap());
    assert_eq!(report.species_indexed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].species, SpeciesId::new(4));

    enricher.set(4, &["Flame"]);
    let report = published(pipeline.run(targets(&[1, 4])).await.unwrap());
    assert_eq!(report.species_indexed, 1);
    assert!(read_manifest(dir.path()).await.species.contains_key(&SpeciesId::new(4)));
  }

  #[tokio::test]
  async fn failing_source_trips_breaker_and_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let crawler = MockCrawler::default();
    let enricher = MockEnricher::default();
    for n in 1..=5 {
      crawler.set(n, None);
    }
    let mut pipeline = Pipeline::new(config(dir.path()), &crawler, &enricher);

    let outcome = pipeline.run(targets(&[1, 2, 3, 4, 5])).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Unchanged { .. }));
    assert_eq!(crawler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
      pipeline.breaker("bulbapedia").map(CircuitBreaker::state),
      Some(crate::circuit::CircuitState::Open)
    );
  }

  #[tokio::test]
  async fn concurrent_run_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let crawler = MockCrawler::default();
    let enricher = MockEnricher::default();
    let cfg = config(dir.path());
    let _held = RegistryLock::acquire(&cfg.registry_path).unwrap();
    let mut pipeline = Pipeline::new(cfg, &crawler, &enricher);

    assert!(matches!(pipeline.run(targets(&[1])).await, Err(Error::RegistryLocked(_))));
  }

  #[tokio::test]
  async fn corrupt_registry_needs_override() {
    let dir = tempfile::tempdir().unwrap();
    let crawler = MockCrawler::default();
    let enricher = MockEnricher::default();
    crawler.set(1, Some("page"));
    enricher.set(1, &["Seed"]);
    tokio::fs::write(dir.path().join("registry.json"), b"garbage").await.unwrap();
    let mut pipeline = Pipeline::new(config(dir.path()), &crawler, &enricher);

    assert!(matches!(
      pipeline.run(targets(&[1])).await,
      Err(Error::RegistryCorruption { .. })
    ));
    assert!(!dir.path().join("dist").join(VERSION_FILE).exists());

    let options = PipelineOptions { allow_empty_registry: true, ..targets(&[1]) };
    published(pipeline.run(options).await.unwrap());
  }

  #[test]
  fn version_resolution() {
    assert_eq!(resolve_version(None, None).unwrap(), "1.0.0");
    assert_eq!(resolve_version(None, Some("1.4.9")).unwrap(), "1.4.10");
    assert_eq!(resolve_version(Some("2.0.0"), Some("1.4.9")).unwrap(), "2.0.0");
    assert!(matches!(
      resolve_version(Some("1.4.9"), Some("1.4.9")),
      Err(Error::VersionNotIncreasing { .. })
    ));
    assert!(resolve_version(Some("v2"), None).is_err());
  }
}
