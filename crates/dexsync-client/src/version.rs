//! Installed-version tracking, release validation and migrations.

use std::cmp::Ordering;

use dexsync_core::{
  hash::{hash_bytes, is_valid_hash},
  layout::is_safe_relative,
  semver::{self, Version},
  store::LocalStore,
  txn::PayloadMigration,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
  migrate::{Migration, MigrationTable},
  Error, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionState {
  Uninitialized,
  Loaded { current: Option<String> },
  UpToDate { current: String },
  UpdateAvailable { current: Option<String>, remote: String },
}

/// Result of [`VersionManager::validate_manifest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestValidation {
  pub valid:  bool,
  pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
  /// Fresh install, or a same-major step without a registered entry.
  NotNeeded,
  /// An explicit no-op entry was registered.
  Noop,
  Migrated { payloads: usize },
}

/// The migration a sync must apply, decided before anything is downloaded.
#[derive(Debug, Clone)]
pub enum MigrationStep {
  NotNeeded,
  Noop,
  Transform(PayloadMigration),
}

#[derive(Debug)]
pub struct VersionManager {
  migrations: MigrationTable,
  state:      VersionState,
}

impl VersionManager {
  pub fn new(migrations: MigrationTable) -> Self {
    Self { migrations, state: VersionState::Uninitialized }
  }

  pub fn state(&self) -> &VersionState { &self.state }

  pub fn current_version(&self) -> Option<&str> {
    match &self.state {
      VersionState::Uninitialized => None,
      VersionState::Loaded { current } | VersionState::UpdateAvailable { current, .. } => {
        current.as_deref()
      }
      VersionState::UpToDate { current } => Some(current),
    }
  }

  /// Load the installed version. `None` means nothing was ever synced.
  pub async fn initialize<S: LocalStore>(&mut self, store: &S) -> Result<Option<String>> {
    let record = store.load_version_record().await.map_err(Error::storage)?;
    self.state = VersionState::Loaded { current: record.current_version.clone() };
    Ok(record.current_version)
  }

  pub fn compare_versions(a: &str, b: &str) -> Result<Ordering> { Ok(semver::compare(a, b)?) }

  /// Decide whether `remote` should be installed. Versions that cannot be
  /// compared count as an available update.
  pub fn check_for_update(&mut self, remote: &str) -> bool {
    let current = self.current_version().map(str::to_owned);
    let available = match current.as_deref() {
      None => true,
      Some(current) => match Self::compare_versions(remote, current) {
        Ok(order) => order == Ordering::Greater,
        Err(e) => {
          warn!(%remote, %current, error = %e, "cannot compare versions, treating as update");
          true
        }
      },
    };

    self.state = match current {
      Some(current) if !available => VersionState::UpToDate { current },
      current => VersionState::UpdateAvailable { current, remote: remote.to_owned() },
    };
    available
  }

  /// Structural check of a `version.json` document.
  pub fn validate_manifest(doc: &Value) -> ManifestValidation {
    let mut errors = Vec::new();

    let Some(obj) = doc.as_object() else {
      return ManifestValidation { valid: false, errors: vec!["document is not an object".into()] };
    };

    match obj.get("version").and_then(Value::as_str) {
      None => errors.push("missing string field `version`".into()),
      Some(v) => {
        if let Err(e) = v.parse::<Version>() {
          errors.push(format!("`version`: {e}"));
        }
      }
    }
    if obj.get("timestamp").and_then(Value::as_i64).is_none() {
      errors.push("missing integer field `timestamp`".into());
    }
    let total_size = obj.get("totalSize").and_then(Value::as_u64);
    if total_size.is_none() {
      errors.push("missing integer field `totalSize`".into());
    }

    match obj.get("files").and_then(Value::as_array) {
      None => errors.push("missing array field `files`".into()),
      Some(files) => {
        let mut sum = 0u64;
        for (i, file) in files.iter().enumerate() {
          match file.get("path").and_then(Value::as_str) {
            None => errors.push(format!("files[{i}]: missing `path`")),
            Some(p) if !is_safe_relative(p) => errors.push(format!("files[{i}]: unsafe path {p:?}")),
            Some(_) => {}
          }
          match file.get("size").and_then(Value::as_u64) {
            None => errors.push(format!("files[{i}]: missing `size`")),
            Some(size) => sum = sum.saturating_add(size),
          }
          match file.get("hash").and_then(Value::as_str) {
            None => errors.push(format!("files[{i}]: missing `hash`")),
            Some(h) if !is_valid_hash(h) => errors.push(format!("files[{i}]: malformed hash")),
            Some(_) => {}
          }
        }
        if let Some(total) = total_size
          && errors.is_empty()
          && total != sum
        {
          errors.push(format!("`totalSize` is {total} but files add up to {sum}"));
        }
      }
    }

    ManifestValidation { valid: errors.is_empty(), errors }
  }

  /// Whether `data` hashes to `expected`.
  pub fn verify_integrity(data: &[u8], expected: &str) -> bool {
    is_valid_hash(expected) && hash_bytes(data) == expected
  }

  /// Decide which migration moving from `from` to `to` requires.
  ///
  /// A missing entry is fatal only when the major version changes or either
  /// version cannot be parsed.
  pub fn resolve_migration(&self, from: Option<&str>, to: &str) -> Result<MigrationStep> {
    let Some(from) = from else { return Ok(MigrationStep::NotNeeded) };
    if from == to {
      return Ok(MigrationStep::NotNeeded);
    }

    match self.migrations.lookup(from, to) {
      Some(Migration::Noop) => Ok(MigrationStep::Noop),
      Some(Migration::Transform(transform)) => Ok(MigrationStep::Transform(PayloadMigration {
        from_version: from.to_owned(),
        to_version:   to.to_owned(),
        transform:    transform.clone(),
      })),
      None => {
        let missing = || Error::MigrationMissing { from: from.to_owned(), to: to.to_owned() };
        let (a, b) = match (from.parse::<Version>(), to.parse::<Version>()) {
          (Ok(a), Ok(b)) => (a, b),
          _ => return Err(missing()),
        };
        if a.major == b.major { Ok(MigrationStep::NotNeeded) } else { Err(missing()) }
      }
    }
  }

  /// Resolve and immediately run the migration from `from` to `to` against
  /// payloads already in the store.
  pub async fn migrate_data<S: LocalStore>(
    &self,
    store: &S,
    from: Option<&str>,
    to: &str,
  ) -> Result<MigrationOutcome> {
    match self.resolve_migration(from, to)? {
      MigrationStep::NotNeeded => Ok(MigrationOutcome::NotNeeded),
      MigrationStep::Noop => Ok(MigrationOutcome::Noop),
      MigrationStep::Transform(migration) => {
        let payloads = store.migrate_payloads(migration).await.map_err(Error::storage)?;
        info!(from = ?from, %to, payloads, "local data migrated");
        Ok(MigrationOutcome::Migrated { payloads })
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use dexsync_core::{
    species::SpeciesId,
    tidbit::{QualityScore, Tidbit, TidbitPayload},
    txn::{StagedChunk, SyncCompletion},
  };
  use dexsync_store_sqlite::SqliteStore;
  use serde_json::json;

  use super::*;

  fn hash(c: char) -> String { std::iter::repeat_n(c, 64).collect() }

  fn release() -> Value {
    json!({
      "version": "1.2.0",
      "timestamp": 1_700_000_000_000i64,
      "files": [
        { "path": "species/0001/tidbits.v1.json", "size": 10, "hash": hash('a') },
        { "path": "species/0004/tidbits.v3.json", "size": 5, "hash": hash('b') }
      ],
      "totalSize": 15
    })
  }

  #[test]
  fn valid_release_passes() {
    let result = VersionManager::validate_manifest(&release());
    assert!(result.valid, "{:?}", result.errors);
  }

  #[test]
  fn missing_and_malformed_fields_are_all_reported() {
    let mut doc = release();
    doc.as_object_mut().unwrap().remove("timestamp");
    doc["files"][0]["hash"] = json!("ABC");
    doc["files"][1].as_object_mut().unwrap().remove("size");
    doc["files"][1]["path"] = json!("../escape.json");

    let result = VersionManager::validate_manifest(&doc);
    assert!(!result.valid);
    assert_eq!(result.errors.len(), 4, "{:?}", result.errors);
  }

  #[test]
  fn total_size_must_match_files() {
    let mut doc = release();
    doc["totalSize"] = json!(99);
    assert!(!VersionManager::validate_manifest(&doc).valid);
  }

  #[test]
  fn integrity_compares_sha256() {
    let expected = hash_bytes(b"payload");
    assert!(VersionManager::verify_integrity(b"payload", &expected));
    assert!(!VersionManager::verify_integrity(b"payload!", &expected));
    assert!(!VersionManager::verify_integrity(b"payload", &expected.to_uppercase()));
  }

  #[test]
  fn update_detection() {
    let mut vm = VersionManager::new(MigrationTable::new());
    vm.state = VersionState::Loaded { current: None };
    assert!(vm.check_for_update("1.0.0"));

    vm.state = VersionState::Loaded { current: Some("1.2.0".into()) };
    assert!(!vm.check_for_update("1.2.0"));
    assert_eq!(vm.state(), &VersionState::UpToDate { current: "1.2.0".into() });

    vm.state = VersionState::Loaded { current: Some("1.2.0".into()) };
    assert!(!vm.check_for_update("1.1.9"));

    vm.state = VersionState::Loaded { current: Some("1.2.0".into()) };
    assert!(vm.check_for_update("1.10.0"));

    vm.state = VersionState::Loaded { current: Some("garbage".into()) };
    assert!(vm.check_for_update("1.0.0"));
  }

  #[tokio::test]
  async fn initialize_reads_current_version() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let mut vm = VersionManager::new(MigrationTable::new());
    assert_eq!(vm.initialize(&store).await.unwrap(), None);

    store
      .finish_sync(SyncCompletion {
        version:          "1.0.0".into(),
        completed_at:     chrono::Utc::now(),
        total_entities:   0,
        sync_duration_ms: 0,
        retain_species:   vec![],
        migration:        None,
      })
      .await
      .unwrap();
    assert_eq!(vm.initialize(&store).await.unwrap().as_deref(), Some("1.0.0"));
    assert_eq!(vm.current_version(), Some("1.0.0"));
  }

  #[tokio::test]
  async fn migration_outcomes() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let mut table = MigrationTable::new();
    table.register_noop("1.0.0", "2.0.0");
    let vm = VersionManager::new(table);

    assert_eq!(vm.migrate_data(&store, None, "3.0.0").await.unwrap(), MigrationOutcome::NotNeeded);
    assert_eq!(vm.migrate_data(&store, Some("1.0.0"), "1.4.0").await.unwrap(), MigrationOutcome::NotNeeded);
    assert_eq!(vm.migrate_data(&store, Some("1.0.0"), "2.0.0").await.unwrap(), MigrationOutcome::Noop);

    let err = vm.migrate_data(&store, Some("2.0.0"), "3.0.0").await.unwrap_err();
    assert!(matches!(err, Error::MigrationMissing { .. }));
    assert_eq!(err.kind(), crate::SyncFailureKind::MigrationMissing);
  }

  #[test]
  fn transform_step_names_both_versions() {
    let mut table = MigrationTable::new();
    table.register("1.0.0", "2.0.0", Arc::new(|v: Value| -> Result<Value, String> { Ok(v) }));
    let vm = VersionManager::new(table);

    let MigrationStep::Transform(migration) =
      vm.resolve_migration(Some("1.0.0"), "2.0.0").unwrap()
    else {
      panic!("expected a transform step");
    };
    assert_eq!(migration.from_version, "1.0.0");
    assert_eq!(migration.to_version, "2.0.0");
    assert!(matches!(vm.resolve_migration(Some("1.0.0"), "1.0.0").unwrap(), MigrationStep::NotNeeded));
    assert!(vm.resolve_migration(Some("garbage"), "2.0.0").is_err());
  }

  #[tokio::test]
  async fn transform_migration_rewrites_store() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let mut chunk = StagedChunk::new("1.0.0", 0);
    chunk.stage(TidbitPayload {
      species_id:      SpeciesId::new(1),
      tidbit_revision: 1,
      tidbits:         vec![Tidbit {
        tidbit_id:     "0001-a".into(),
        title:         "seed".into(),
        body:          "grows".into(),
        source_refs:   vec![],
        generated_at:  chrono::Utc::now(),
        quality_score: QualityScore::default(),
      }],
    });
    chunk.commit(&store).await.unwrap();

    let mut table = MigrationTable::new();
    table.register(
      "1.0.0",
      "2.0.0",
      Arc::new(|mut v: Value| -> Result<Value, String> {
        v["tidbits"][0]["body"] = json!("migrated");
        Ok(v)
      }),
    );
    let vm = VersionManager::new(table);

    let outcome = vm.migrate_data(&store, Some("1.0.0"), "2.0.0").await.unwrap();
    assert_eq!(outcome, MigrationOutcome::Migrated { payloads: 1 });
    let payload = store.get_payload(SpeciesId::new(1)).await.unwrap().unwrap();
    assert_eq!(payload.tidbits[0].body, "migrated");
  }
}
