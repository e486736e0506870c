//! Error types for `dexsync-pipeline`.

use std::{path::PathBuf, time::Duration};

use dexsync_core::species::SpeciesId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The registry exists but cannot be read or parsed. Fatal unless the
  /// operator explicitly allows starting from an empty registry.
  #[error("registry at {path:?} is unreadable: {reason}")]
  RegistryCorruption { path: PathBuf, reason: String },

  #[error("registry at {0:?} is locked by another pipeline run")]
  RegistryLocked(PathBuf),

  #[error("i/o error at {path:?}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("source {source_name:?} is unavailable for another {retry_after:?}")]
  SourceUnavailable { source_name: String, retry_after: Duration },

  #[error("species {species}: {reason}")]
  EntityProcessing { species: SpeciesId, reason: String },

  #[error("manifest references missing payload {0:?}")]
  MissingPayload(String),

  #[error("dataset version {requested} does not follow published version {published}")]
  VersionNotIncreasing { requested: String, published: String },

  #[error("core error: {0}")]
  Core(#[from] dexsync_core::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

impl Error {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| Self::Io { path, source }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
