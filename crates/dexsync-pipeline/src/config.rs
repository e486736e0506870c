//! Pipeline configuration, deserialised by the binary through the `config`
//! crate. Every field has a default so an empty file is a valid config.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
  /// Path of the registry JSON file. The advisory lock lives next to it.
  #[serde(default = "default_registry_path")]
  pub registry_path:     PathBuf,
  /// Directory that receives payloads, `manifest.json` and `version.json`.
  #[serde(default = "default_distribution_root")]
  pub distribution_root: PathBuf,
  /// Limits applied to every source without its own entry.
  #[serde(default)]
  pub rate_limit:        RateLimitConfig,
  #[serde(default)]
  pub breaker:           BreakerConfig,
  /// Sources to crawl, in crawl order.
  #[serde(default)]
  pub sources:           Vec<SourceConfig>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      registry_path:     default_registry_path(),
      distribution_root: default_distribution_root(),
      rate_limit:        RateLimitConfig::default(),
      breaker:           BreakerConfig::default(),
      sources:           Vec::new(),
    }
  }
}

impl PipelineConfig {
  pub fn source_names(&self) -> Vec<String> {
    self.sources.iter().map(|s| s.name.clone()).collect()
  }

  pub fn rate_limit_for(&self, source: &str) -> &RateLimitConfig {
    self
      .sources
      .iter()
      .find(|s| s.name == source)
      .and_then(|s| s.rate_limit.as_ref())
      .unwrap_or(&self.rate_limit)
  }

  pub fn breaker_for(&self, source: &str) -> &BreakerConfig {
    self
      .sources
      .iter()
      .find(|s| s.name == source)
      .and_then(|s| s.breaker.as_ref())
      .unwrap_or(&self.breaker)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
  pub name:       String,
  #[serde(default)]
  pub rate_limit: Option<RateLimitConfig>,
  #[serde(default)]
  pub breaker:    Option<BreakerConfig>,
}

impl SourceConfig {
  pub fn named(name: impl Into<String>) -> Self {
    Self { name: name.into(), rate_limit: None, breaker: None }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
  #[serde(default = "default_per_second")]
  pub requests_per_second: f64,
  #[serde(default = "default_per_minute")]
  pub requests_per_minute: f64,
  /// Requests allowed back to back before the per-second rate applies.
  #[serde(default = "default_burst")]
  pub burst:               u32,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      requests_per_second: default_per_second(),
      requests_per_minute: default_per_minute(),
      burst:               default_burst(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
  /// Consecutive failures that open the circuit.
  #[serde(default = "default_failure_threshold")]
  pub failure_threshold: u32,
  #[serde(default = "default_cooldown_secs")]
  pub cooldown_secs:     u64,
}

impl Default for BreakerConfig {
  fn default() -> Self {
    Self {
      failure_threshold: default_failure_threshold(),
      cooldown_secs:     default_cooldown_secs(),
    }
  }
}

fn default_registry_path() -> PathBuf { PathBuf::from("data/registry.json") }
fn default_distribution_root() -> PathBuf { PathBuf::from("dist") }
fn default_per_second() -> f64 { 2.0 }
fn default_per_minute() -> f64 { 60.0 }
fn default_burst() -> u32 { 4 }
fn default_failure_threshold() -> u32 { 5 }
fn default_cooldown_secs() -> u64 { 60 }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn per_source_overrides_fall_back_to_defaults() {
    let config: PipelineConfig = serde_json::from_value(serde_json::json!({
      "sources": [
        { "name": "bulbapedia", "rate_limit": { "requests_per_second": 0.5 } },
        { "name": "serebii" }
      ]
    }))
    .unwrap();

    assert_eq!(config.source_names(), ["bulbapedia", "serebii"]);
    assert_eq!(config.rate_limit_for("bulbapedia").requests_per_second, 0.5);
    assert_eq!(config.rate_limit_for("bulbapedia").burst, 4);
    assert_eq!(config.rate_limit_for("serebii").requests_per_second, 2.0);
    assert_eq!(config.breaker_for("serebii").failure_threshold, 5);
    assert_eq!(config.registry_path, PathBuf::from("data/registry.json"));
  }
}
