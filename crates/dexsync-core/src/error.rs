//! Error types for `dexsync-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid species id: {0:?}")]
  InvalidSpeciesId(String),

  #[error("invalid source page id: {0:?}")]
  InvalidSourcePageId(String),

  #[error("invalid version {0:?}: {1}")]
  InvalidVersion(String, &'static str),

  #[error("invalid hash {0:?}: expected 64 lowercase hex characters")]
  InvalidHash(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
