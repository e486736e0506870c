//! Paths inside a distribution root.
//!
//! ```text
//! manifest.json
//! version.json
//! species/
//!   0025/
//!     tidbits.v1.json
//!     tidbits.v2.json
//! ```
//!
//! Payload paths embed the revision, so a published file is never rewritten
//! in place. Only `manifest.json` and `version.json` change between releases.

use crate::species::SpeciesId;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const VERSION_FILE: &str = "version.json";

/// Relative path of the payload file for `species` at `revision`.
pub fn payload_path(species: SpeciesId, revision: u32) -> String {
  format!("species/{}/tidbits.v{revision}.json", species.padded())
}

/// Inverse of [`payload_path`].
pub fn parse_payload_path(path: &str) -> Option<(SpeciesId, u32)> {
  let rest = path.strip_prefix("species/")?;
  let (species, file) = rest.split_once('/')?;
  let revision = file.strip_prefix("tidbits.v")?.strip_suffix(".json")?;
  let id: SpeciesId = species.parse().ok()?;
  if id.padded() != species {
    return None;
  }
  Some((id, revision.parse().ok()?))
}

/// Whether `path` is a safe relative path: no root, no `..`, no backslashes.
pub fn is_safe_relative(path: &str) -> bool {
  !path.is_empty()
    && !path.starts_with('/')
    && !path.contains('\\')
    && path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}
