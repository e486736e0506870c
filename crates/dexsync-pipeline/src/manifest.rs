//! Assembles and publishes the manifest and release version record.
//!
//! Publication order is payloads, then `manifest.json`, then `version.json`.
//! A client that reads `version.json` can therefore fetch every file it
//! lists.

use std::{
  io::ErrorKind,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use dexsync_core::{
  hash::hash_bytes,
  layout::{is_safe_relative, MANIFEST_FILE, VERSION_FILE},
  manifest::{FileEntry, Manifest, ManifestSummary, ReleaseManifest},
  tidbit::TidbitPayload,
};
use tracing::{debug, info};

use crate::{
  fsutil::write_atomic,
  indexer::IndexingResult,
  registry::SourceRegistry,
  Error, Result,
};

pub struct ManifestBuilder {
  root: PathBuf,
}

impl ManifestBuilder {
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  pub fn root(&self) -> &Path { &self.root }

  // ─── Assembly ──────────────────────────────────────────────────────────────

  pub fn build(
    &self,
    result: &IndexingResult,
    registry: &SourceRegistry,
    dataset_version: &str,
  ) -> Manifest {
    Self::build_at(result, registry, dataset_version, Utc::now())
  }

  /// Every species known to `registry`, with this run's fragments layered
  /// on top.
  pub fn build_at(
    result: &IndexingResult,
    registry: &SourceRegistry,
    dataset_version: &str,
    now: DateTime<Utc>,
  ) -> Manifest {
    let mut species: std::collections::BTreeMap<_, _> = registry
      .species_ids()
      .filter_map(|id| registry.manifest_entry(id).map(|entry| (id, entry)))
      .collect();
    for (id, update) in &result.updates {
      species.insert(*id, update.manifest.clone());
    }

    let total_tidbits = species.values().map(|e| e.tidbit_ids.len()).sum();
    Manifest {
      manifest_version: now,
      dataset_version: dataset_version.to_owned(),
      summary: ManifestSummary {
        total_pokemon: species.len(),
        total_tidbits,
        new_pages: result.new_source_page_count,
        generated_at: now,
      },
      species,
      new_tidbits: result.new_tidbit_ids.clone(),
      removed_tidbits: result.removed_tidbit_ids.clone(),
    }
  }

  // ─── Publication ───────────────────────────────────────────────────────────

  /// Write a payload file for every species whose revision moved.
  pub async fn persist_tidbit_payloads(&self, result: &IndexingResult) -> Result<usize> {
    let mut written = 0;
    for (species, update) in &result.updates {
      let Some(payload) = &update.payload else { continue };
      let path = self.resolve(update.payload_path())?;
      write_atomic(&path, &serde_json::to_vec_pretty(payload)?).await?;
      debug!(species = %species, path = update.payload_path(), "payload written");
      written += 1;
    }
    Ok(written)
  }

  /// Hash every payload the manifest references. Fails if one is missing.
  pub async fn build_release(&self, manifest: &Manifest) -> Result<ReleaseManifest> {
    let mut files = Vec::with_capacity(manifest.species.len());
    for entry in manifest.species.values() {
      let bytes = self.read_payload(&entry.tidbit_file).await?;
      files.push(FileEntry {
        path: entry.tidbit_file.clone(),
        size: bytes.len() as u64,
        hash: hash_bytes(&bytes),
      });
    }
    Ok(ReleaseManifest::new(&manifest.dataset_version, manifest.manifest_version, files))
  }

  /// Publish `manifest.json` and `version.json`. Payloads must already be in
  /// place.
  pub async fn persist_manifest(&self, manifest: &Manifest) -> Result<ReleaseManifest> {
    let release = self.build_release(manifest).await?;

    write_atomic(&self.root.join(MANIFEST_FILE), &serde_json::to_vec_pretty(manifest)?).await?;
    write_atomic(&self.root.join(VERSION_FILE), &serde_json::to_vec_pretty(&release)?).await?;

    info!(
      version = %release.version,
      species = manifest.species.len(),
      files = release.files.len(),
      total_size = release.total_size,
      "release published"
    );
    Ok(release)
  }

  // ─── Verification ──────────────────────────────────────────────────────────

  /// Re-read a published distribution and check manifest, version record
  /// and payloads against each other.
  pub async fn verify_distribution(&self) -> Result<DistributionReport> {
    let manifest: Manifest = self.read_json(MANIFEST_FILE).await?;
    let release: ReleaseManifest = self.read_json(VERSION_FILE).await?;

    let mut report = DistributionReport {
      dataset_version: manifest.dataset_version.clone(),
      species:         manifest.species.len(),
      files_checked:   0,
      problems:        Vec::new(),
    };
    if manifest.dataset_version != release.version {
      report.problems.push(format!(
        "manifest version {} does not match version record {}",
        manifest.dataset_version, release.version
      ));
    }

    for (species, entry) in &manifest.species {
      let Some(file) = release.files.iter().find(|f| f.path == entry.tidbit_file) else {
        report.problems.push(format!("{species}: {} not in version record", entry.tidbit_file));
        continue;
      };
      let bytes = match self.read_payload(&entry.tidbit_file).await {
        Ok(bytes) => bytes,
        Err(e) => {
          report.problems.push(format!("{species}: {e}"));
          continue;
        }
      };
      report.files_checked += 1;

      if bytes.len() as u64 != file.size || hash_bytes(&bytes) != file.hash {
        report.problems.push(format!("{species}: {} does not match its declared hash", file.path));
        continue;
      }
      match serde_json::from_slice::<TidbitPayload>(&bytes) {
        Ok(p) if p.species_id == *species && p.tidbit_revision == entry.tidbit_revision => {}
        Ok(p) => report.problems.push(format!(
          "{species}: payload is {} revision {}, manifest says revision {}",
          p.species_id, p.tidbit_revision, entry.tidbit_revision
        )),
        Err(e) => report.problems.push(format!("{species}: unreadable payload: {e}")),
      }
    }

    Ok(report)
  }

  // ─── Helpers ───────────────────────────────────────────────────────────────

  fn resolve(&self, relative: &str) -> Result<PathBuf> {
    if !is_safe_relative(relative) {
      return Err(Error::MissingPayload(relative.to_owned()));
    }
    Ok(self.root.join(relative))
  }

  async fn read_payload(&self, relative: &str) -> Result<Vec<u8>> {
    let path = self.resolve(relative)?;
    match tokio::fs::read(&path).await {
      Ok(bytes) => Ok(bytes),
      Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::MissingPayload(relative.to_owned())),
      Err(e) => Err(Error::io(&path)(e)),
    }
  }

  async fn read_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
    let path = self.root.join(name);
    let bytes = tokio::fs::read(&path).await.map_err(Error::io(&path))?;
    Ok(serde_json::from_slice(&bytes)?)
  }
}

/// Outcome of [`ManifestBuilder::verify_distribution`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionReport {
  pub dataset_version: String,
  pub species:         usize,
  pub files_checked:   usize,
  pub problems:        Vec<String>,
}

impl DistributionReport {
  pub fn is_ok(&self) -> bool { self.problems.is_empty() }
}
