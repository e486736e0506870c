//! Typed table of local data migrations between dataset versions.

use std::{collections::HashMap, fmt};

use dexsync_core::txn::PayloadTransform;

/// What to do with stored payloads when moving between two versions.
#[derive(Clone)]
pub enum Migration {
  /// Registered explicitly as requiring no change.
  Noop,
  Transform(PayloadTransform),
}

impl fmt::Debug for Migration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Noop => f.write_str("Noop"),
      Self::Transform(_) => f.write_str("Transform(..)"),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationTable {
  entries: HashMap<(String, String), Migration>,
}

impl MigrationTable {
  pub fn new() -> Self { Self::default() }

  pub fn register(
    &mut self,
    from: impl Into<String>,
    to: impl Into<String>,
    transform: PayloadTransform,
  ) -> &mut Self {
    self.entries.insert((from.into(), to.into()), Migration::Transform(transform));
    self
  }

  pub fn register_noop(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
    self.entries.insert((from.into(), to.into()), Migration::Noop);
    self
  }

  pub fn lookup(&self, from: &str, to: &str) -> Option<&Migration> {
    self.entries.get(&(from.to_owned(), to.to_owned()))
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;

  #[test]
  fn lookup_is_keyed_by_ordered_pair() {
    let mut table = MigrationTable::new();
    table
      .register_noop("1.0.0", "1.1.0")
      .register("1.1.0", "2.0.0", Arc::new(|v: serde_json::Value| -> Result<serde_json::Value, String> { Ok(v) }));

    assert!(matches!(table.lookup("1.0.0", "1.1.0"), Some(Migration::Noop)));
    assert!(matches!(table.lookup("1.1.0", "2.0.0"), Some(Migration::Transform(_))));
    assert!(table.lookup("1.1.0", "1.0.0").is_none());
    assert_eq!(table.len(), 2);
  }
}
