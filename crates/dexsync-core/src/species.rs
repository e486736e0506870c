//! Identifiers for species and the source pages that describe them.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

// ─── SpeciesId ───────────────────────────────────────────────────────────────

/// National dex number of a species.
///
/// Serialised everywhere as the zero-padded string (`"0025"`) so manifest keys,
/// payload files and directory names all agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpeciesId(u32);

impl SpeciesId {
  pub const fn new(number: u32) -> Self { Self(number) }

  pub const fn number(self) -> u32 { self.0 }

  /// Four-digit padded form used in paths and manifest keys.
  pub fn padded(self) -> String { format!("{:04}", self.0) }
}

impl fmt::Display for SpeciesId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:04}", self.0)
  }
}

impl FromStr for SpeciesId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
      return Err(Error::InvalidSpeciesId(s.to_owned()));
    }
    s.parse::<u32>()
      .map(Self)
      .map_err(|_| Error::InvalidSpeciesId(s.to_owned()))
  }
}

impl Serialize for SpeciesId {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.padded())
  }
}

impl<'de> Deserialize<'de> for SpeciesId {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}

// ─── SourcePageId ────────────────────────────────────────────────────────────

/// Stable key of one crawled page: the species it describes plus the name of
/// the source it came from, e.g. `0025:bulbapedia`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourcePageId {
  species: SpeciesId,
  source:  String,
}

impl SourcePageId {
  pub fn new(species: SpeciesId, source: impl Into<String>) -> Self {
    Self { species, source: source.into() }
  }

  pub fn species(&self) -> SpeciesId { self.species }

  pub fn source(&self) -> &str { &self.source }
}

impl fmt::Display for SourcePageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.species, self.source)
  }
}

impl FromStr for SourcePageId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let (species, source) = s
      .split_once(':')
      .ok_or_else(|| Error::InvalidSourcePageId(s.to_owned()))?;
    if source.is_empty() {
      return Err(Error::InvalidSourcePageId(s.to_owned()));
    }
    let species = species
      .parse()
      .map_err(|_| Error::InvalidSourcePageId(s.to_owned()))?;
    Ok(Self::new(species, source))
  }
}

impl TryFrom<String> for SourcePageId {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { value.parse() }
}

impl From<SourcePageId> for String {
  fn from(value: SourcePageId) -> Self { value.to_string() }
}
