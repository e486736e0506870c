//! Atomic file replacement for everything the pipeline publishes.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt as _;

use crate::{Error, Result};

/// Write `bytes` to `path` so readers observe either the old file or the
/// complete new one: write a sibling temp file, fsync it, rename over, then
/// fsync the directory so the rename itself survives a crash.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
  let parent = match path.parent() {
    Some(p) if !p.as_os_str().is_empty() => p,
    _ => Path::new("."),
  };
  tokio::fs::create_dir_all(parent)
    .await
    .map_err(Error::io(parent))?;

  let tmp = tmp_path(path);
  let mut file = tokio::fs::File::create(&tmp)
    .await
    .map_err(Error::io(&tmp))?;
  file.write_all(bytes).await.map_err(Error::io(&tmp))?;
  file.sync_all().await.map_err(Error::io(&tmp))?;
  drop(file);

  tokio::fs::rename(&tmp, path)
    .await
    .map_err(Error::io(path))?;
  sync_dir(parent).await
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
  let handle = tokio::fs::File::open(dir).await.map_err(Error::io(dir))?;
  handle.sync_all().await.map_err(Error::io(dir))
}

// No portable directory fsync off unix.
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> { Ok(()) }

fn tmp_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().unwrap_or_default().to_os_string();
  name.push(".tmp");
  path.with_file_name(name)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn write_atomic_replaces_file_and_cleans_temp() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("manifest.json");

    write_atomic(&path, b"first").await.unwrap();
    write_atomic(&path, b"second").await.unwrap();

    assert_eq!(tokio::fs::read(&path).await.unwrap(), b"second");
    assert!(!tmp_path(&path).exists());
    let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
      .unwrap()
      .map(|e| e.unwrap().file_name())
      .collect();
    assert_eq!(names, ["manifest.json"]);
  }
}
