//! Error types for `dexsync-client`.

use thiserror::Error;

/// Why a single fetch from a release source failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// Timeouts, refused connections, 5xx and 429. Worth retrying.
  #[error("transient failure: {0}")]
  Transient(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("unexpected status {status} for {url}")]
  Status { status: u16, url: String },

  #[error("refusing unsafe path {0:?}")]
  InvalidPath(String),

  #[error("i/o error: {0}")]
  Io(String),
}

impl FetchError {
  pub fn is_transient(&self) -> bool { matches!(self, Self::Transient(_)) }
}

/// Coarse classification reported to the user when a sync attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFailureKind {
  TransientNetwork,
  IntegrityMismatch,
  ManifestInvalid,
  MigrationMissing,
  Storage,
  Payload,
  NotFound,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("failed to fetch {path}: {source}")]
  Fetch {
    path:   String,
    #[source]
    source: FetchError,
  },

  #[error("integrity mismatch for {path}: expected {expected}, got {actual}")]
  IntegrityMismatch { path: String, expected: String, actual: String },

  #[error("release manifest is invalid: {}", .0.join("; "))]
  ManifestInvalid(Vec<String>),

  #[error("no migration registered from {from} to {to}")]
  MigrationMissing { from: String, to: String },

  #[error("local store error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("payload {path} is unreadable: {reason}")]
  Payload { path: String, reason: String },

  #[error("sync failed at chunk {} of {total_chunks}, will retry: {cause}", .chunk_index + 1)]
  ChunkFailed {
    chunk_index:  usize,
    total_chunks: usize,
    #[source]
    cause:        Box<Error>,
  },

  #[error("core error: {0}")]
  Core(#[from] dexsync_core::Error),
}

impl Error {
  pub(crate) fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Storage(Box::new(e))
  }

  pub fn kind(&self) -> SyncFailureKind {
    match self {
      Self::Fetch { source: FetchError::NotFound(_), .. } => SyncFailureKind::NotFound,
      Self::Fetch { source: FetchError::InvalidPath(_), .. } => SyncFailureKind::ManifestInvalid,
      Self::Fetch { .. } => SyncFailureKind::TransientNetwork,
      Self::IntegrityMismatch { .. } => SyncFailureKind::IntegrityMismatch,
      Self::ManifestInvalid(_) | Self::Core(_) => SyncFailureKind::ManifestInvalid,
      Self::MigrationMissing { .. } => SyncFailureKind::MigrationMissing,
      Self::Storage(_) => SyncFailureKind::Storage,
      Self::Payload { .. } => SyncFailureKind::Payload,
      Self::ChunkFailed { cause, .. } => cause.kind(),
    }
  }

  /// Index of the chunk the attempt failed in, if it got that far.
  pub fn failed_chunk(&self) -> Option<usize> {
    match self {
      Self::ChunkFailed { chunk_index, .. } => Some(*chunk_index),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chunk_failure_reports_cause_class_and_index() {
    let err = Error::ChunkFailed {
      chunk_index:  1,
      total_chunks: 3,
      cause:        Box::new(Error::IntegrityMismatch {
        path:     "species/0001/tidbits.v1.json".into(),
        expected: "a".into(),
        actual:   "b".into(),
      }),
    };
    assert_eq!(err.kind(), SyncFailureKind::IntegrityMismatch);
    assert_eq!(err.failed_chunk(), Some(1));
    assert!(err.to_string().starts_with("sync failed at chunk 2 of 3"));
  }

  #[test]
  fn fetch_errors_are_classified() {
    let transient = Error::Fetch { path: "x".into(), source: FetchError::Transient("t".into()) };
    let missing = Error::Fetch { path: "x".into(), source: FetchError::NotFound("x".into()) };
    assert_eq!(transient.kind(), SyncFailureKind::TransientNetwork);
    assert_eq!(missing.kind(), SyncFailureKind::NotFound);
    assert!(transient.failed_chunk().is_none());
  }
}
