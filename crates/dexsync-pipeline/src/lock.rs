//! Advisory lock that keeps two pipeline runs off the same registry.

use std::{
  fs::OpenOptions,
  io::{ErrorKind, Write as _},
  path::{Path, PathBuf},
};

use tracing::warn;

use crate::{Error, Result};

/// Held for the duration of a run. The lock file is `<registry>.lock`; it is
/// created exclusively and removed on drop. A crashed run leaves the file
/// behind and an operator has to remove it.
#[derive(Debug)]
pub struct RegistryLock {
  path: PathBuf,
}

impl RegistryLock {
  pub fn acquire(registry_path: &Path) -> Result<Self> {
    let path = lock_path(registry_path);
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(Error::io(parent))?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
      Ok(file) => file,
      Err(e) if e.kind() == ErrorKind::AlreadyExists => {
        return Err(Error::RegistryLocked(registry_path.to_path_buf()));
      }
      Err(e) => return Err(Error::io(&path)(e)),
    };
    writeln!(file, "{}", std::process::id()).map_err(Error::io(&path))?;

    Ok(Self { path })
  }

  pub fn path(&self) -> &Path { &self.path }
}

impl Drop for RegistryLock {
  fn drop(&mut self) {
    if let Err(e) = std::fs::remove_file(&self.path) {
      warn!(path = ?self.path, error = %e, "failed to release registry lock");
    }
  }
}

fn lock_path(registry_path: &Path) -> PathBuf {
  let mut name = registry_path.file_name().unwrap_or_default().to_os_string();
  name.push(".lock");
  registry_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_acquire_fails_until_first_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let registry = dir.path().join("registry.json");

    let held = RegistryLock::acquire(&registry).unwrap();
    assert!(held.path().ends_with("registry.json.lock"));
    assert!(matches!(
      RegistryLock::acquire(&registry),
      Err(Error::RegistryLocked(_))
    ));

    drop(held);
    assert!(RegistryLock::acquire(&registry).is_ok());
  }
}
