//! Layered configuration for the `dexsync` binary.

use std::path::Path;

use anyhow::Context as _;
use dexsync_client::config::ClientConfig;
use dexsync_pipeline::config::PipelineConfig;
use serde::Deserialize;

/// Shape of `dexsync.toml`. Both tables are optional.
///
/// ```toml
/// [pipeline]
/// registry_path     = "data/registry.json"
/// distribution_root = "dist"
///
/// [[pipeline.sources]]
/// name = "bulbapedia"
/// rate_limit = { requests_per_second = 1.0 }
///
/// [client]
/// release  = "https://cdn.example.com/dex"
/// database = "dexsync.db"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
  #[serde(default)]
  pub pipeline: PipelineConfig,
  #[serde(default)]
  pub client:   ClientConfig,
}

impl CliConfig {
  /// Read `path` if it exists, then apply `DEXSYNC_*` environment overrides,
  /// e.g. `DEXSYNC_CLIENT__CHUNK_SIZE=50`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("DEXSYNC")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;

    settings
      .try_deserialize()
      .context("failed to deserialise configuration")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = CliConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.client.chunk_size, 100);
    assert_eq!(config.pipeline.distribution_root, Path::new("dist"));
  }

  #[test]
  fn file_values_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dexsync.toml");
    std::fs::write(
      &path,
      r#"
        [pipeline]
        registry_path = "state/registry.json"

        [[pipeline.sources]]
        name = "bulbapedia"
        breaker = { failure_threshold = 2 }

        [client]
        release = "https://cdn.example.com/dex"
        chunk_size = 25
        retry = { max_attempts = 3 }
      "#,
    )
    .unwrap();

    let config = CliConfig::load(&path).unwrap();
    assert_eq!(config.pipeline.registry_path, Path::new("state/registry.json"));
    assert_eq!(config.pipeline.breaker_for("bulbapedia").failure_threshold, 2);
    assert_eq!(config.client.release, "https://cdn.example.com/dex");
    assert_eq!(config.client.chunk_size, 25);
    assert_eq!(config.client.retry.max_attempts, 3);
    assert_eq!(config.client.retry.base_delay_ms, 500);
  }
}
