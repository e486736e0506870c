//! Client configuration, deserialised by the binary through the `config`
//! crate.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
  /// Where releases are published: an `http(s)://` base URL or a directory.
  #[serde(default = "default_release")]
  pub release:              String,
  /// SQLite file holding the local dataset.
  #[serde(default = "default_database")]
  pub database:             PathBuf,
  #[serde(default = "default_chunk_size")]
  pub chunk_size:           usize,
  #[serde(default)]
  pub retry:                RetryPolicy,
  /// Re-downloads of one file after a hash mismatch before giving up.
  #[serde(default = "default_integrity_retries")]
  pub integrity_retries:    u32,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      release:              default_release(),
      database:             default_database(),
      chunk_size:           default_chunk_size(),
      retry:                RetryPolicy::default(),
      integrity_retries:    default_integrity_retries(),
      request_timeout_secs: default_request_timeout_secs(),
    }
  }
}

impl ClientConfig {
  pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
}

fn default_release() -> String { "dist".into() }
fn default_database() -> PathBuf { PathBuf::from("dexsync.db") }
fn default_chunk_size() -> usize { 100 }
fn default_integrity_retries() -> u32 { 2 }
fn default_request_timeout_secs() -> u64 { 30 }
