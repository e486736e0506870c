//! Where a client reads releases from.

use std::{
  future::Future,
  io::ErrorKind,
  path::PathBuf,
  time::Duration,
};

use dexsync_core::layout::{is_safe_relative, VERSION_FILE};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::FetchError;

/// Read access to a published distribution root.
pub trait ReleaseSource: Send + Sync {
  /// Raw bytes of `version.json`.
  fn fetch_version(&self) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send + '_ {
    self.fetch_file(VERSION_FILE)
  }

  /// Raw bytes of a file, by its path relative to the distribution root.
  fn fetch_file<'a>(
    &'a self,
    path: &'a str,
  ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send + 'a;
}

// ─── HTTP ────────────────────────────────────────────────────────────────────

/// A distribution served over HTTP(S).
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpSource {
  client:   Client,
  base_url: String,
}

impl HttpSource {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, base_url: base_url.into() })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/{}", self.base_url.trim_end_matches('/'), path)
  }
}

impl ReleaseSource for HttpSource {
  async fn fetch_file<'a>(&'a self, path: &'a str) -> Result<Vec<u8>, FetchError> {
    if !is_safe_relative(path) {
      return Err(FetchError::InvalidPath(path.to_owned()));
    }
    let url = self.url(path);
    debug!(%url, "GET");

    let resp = self
      .client
      .get(&url)
      .send()
      .await
      .map_err(|e| FetchError::Transient(format!("GET {url}: {e}")))?;

    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
      return Err(FetchError::NotFound(url));
    }
    if status.is_server_error()
      || status == StatusCode::TOO_MANY_REQUESTS
      || status == StatusCode::REQUEST_TIMEOUT
    {
      return Err(FetchError::Transient(format!("GET {url} → {status}")));
    }
    if !status.is_success() {
      return Err(FetchError::Status { status: status.as_u16(), url });
    }

    let body = resp
      .bytes()
      .await
      .map_err(|e| FetchError::Transient(format!("reading {url}: {e}")))?;
    Ok(body.to_vec())
  }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// A distribution root on the local filesystem, e.g. a mounted share or the
/// pipeline's own output directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
  root: PathBuf,
}

impl DirectorySource {
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }
}

impl ReleaseSource for DirectorySource {
  async fn fetch_file<'a>(&'a self, path: &'a str) -> Result<Vec<u8>, FetchError> {
    if !is_safe_relative(path) {
      return Err(FetchError::InvalidPath(path.to_owned()));
    }
    let full = self.root.join(path);
    tokio::fs::read(&full).await.map_err(|e| match e.kind() {
      ErrorKind::NotFound => FetchError::NotFound(full.display().to_string()),
      ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
        FetchError::Transient(format!("{}: {e}", full.display()))
      }
      _ => FetchError::Io(format!("{}: {e}", full.display())),
    })
  }
}

// ─── Runtime choice ──────────────────────────────────────────────────────────

/// Either source, picked from a configured location string.
#[derive(Clone)]
pub enum AnySource {
  Http(HttpSource),
  Directory(DirectorySource),
}

impl AnySource {
  /// `http://` and `https://` locations use HTTP; anything else is a path.
  pub fn from_location(location: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
    if location.starts_with("http://") || location.starts_with("https://") {
      Ok(Self::Http(HttpSource::new(location, timeout)?))
    } else {
      Ok(Self::Directory(DirectorySource::new(location)))
    }
  }
}

impl ReleaseSource for AnySource {
  async fn fetch_file<'a>(&'a self, path: &'a str) -> Result<Vec<u8>, FetchError> {
    match self {
      Self::Http(s) => s.fetch_file(path).await,
      Self::Directory(s) => s.fetch_file(path).await,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn directory_source_reads_and_classifies() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(dir.path().join("species/0001")).await.unwrap();
    tokio::fs::write(dir.path().join("species/0001/tidbits.v1.json"), b"{}").await.unwrap();
    tokio::fs::write(dir.path().join(VERSION_FILE), b"{\"version\":\"1.0.0\"}").await.unwrap();

    let source = DirectorySource::new(dir.path());
    assert_eq!(source.fetch_file("species/0001/tidbits.v1.json").await.unwrap(), b"{}");
    assert!(source.fetch_version().await.unwrap().starts_with(b"{\"version\""));
    assert!(matches!(
      source.fetch_file("species/0002/tidbits.v1.json").await,
      Err(FetchError::NotFound(_))
    ));
    assert!(matches!(
      source.fetch_file("../etc/passwd").await,
      Err(FetchError::InvalidPath(_))
    ));
  }

  #[test]
  fn location_selects_source_kind() {
    let timeout = Duration::from_secs(5);
    assert!(matches!(
      AnySource::from_location("https://cdn.example.com/dex/", timeout).unwrap(),
      AnySource::Http(_)
    ));
    assert!(matches!(AnySource::from_location("./dist", timeout).unwrap(), AnySource::Directory(_)));
  }

  #[test]
  fn http_urls_are_joined_without_double_slashes() {
    let source = HttpSource::new("https://cdn.example.com/dex/", Duration::from_secs(5)).unwrap();
    assert_eq!(source.url("version.json"), "https://cdn.example.com/dex/version.json");
  }
}
