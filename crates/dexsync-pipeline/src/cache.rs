//! Enrichment results keyed by what went into them.
//!
//! The key covers the species and the normalized hash of each input page.
//! Fetch timestamps and anything the enricher produced are left out, so a
//! re-crawl that only moved boilerplate is served from the cache.

use std::collections::HashMap;

use dexsync_core::{
  hash::{hash_json, hash_page},
  species::SpeciesId,
};

use crate::{enriched::{CrawledPage, TidbitDraft}, Result};

#[derive(Debug, Default)]
pub struct EnrichmentCache {
  entries: HashMap<String, Vec<TidbitDraft>>,
  hits:    usize,
  misses:  usize,
}

impl EnrichmentCache {
  pub fn new() -> Self { Self::default() }

  pub fn key_for(species: SpeciesId, pages: &[CrawledPage]) -> Result<String> {
    let mut inputs: Vec<(String, String)> = pages
      .iter()
      .map(|p| (p.source_page_id.to_string(), hash_page(&p.content)))
      .collect();
    inputs.sort();
    Ok(hash_json(&(species, inputs))?)
  }

  pub fn get(&mut self, key: &str) -> Option<Vec<TidbitDraft>> {
    let found = self.entries.get(key).cloned();
    if found.is_some() {
      self.hits += 1;
    } else {
      self.misses += 1;
    }
    found
  }

  pub fn insert(&mut self, key: String, drafts: Vec<TidbitDraft>) {
    self.entries.insert(key, drafts);
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// `(hits, misses)` since creation.
  pub fn stats(&self) -> (usize, usize) { (self.hits, self.misses) }
}
