//! Content hashing: stable SHA-256 digests over payloads and source pages.
//!
//! Structured values are hashed over a canonical JSON encoding (object keys
//! sorted, no insignificant whitespace), so two semantically identical values
//! hash the same regardless of the key order they were built or parsed with.
//!
//! Source pages are hashed over their *normalized* text. Normalization:
//!
//! 1. HTML comments and `<script>`/`<style>` blocks are removed.
//! 2. Lines that are only volatile boilerplate (retrieval/access/last-modified
//!    stamps, bare timestamps, advertisement markers) are dropped.
//! 3. Whitespace runs collapse to a single space and the result is trimmed.
//!
//! Case and punctuation are preserved: any edit to real prose changes the
//! digest, while churn in the stripped boilerplate does not.

use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{Error, Result, species::SpeciesId};

static COMMENTS: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));

static SCRIPTS: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
    .expect("static regex")
});

static VOLATILE_LINE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(concat!(
    r"(?i)^\s*(?:",
    r"(?:this page was )?last (?:modified|updated|edited)\b.*",
    r"|retrieved (?:on|from)\b.*",
    r"|accessed (?:on )?\d.*",
    r"|advertisement\s*",
    r"|\d{4}-\d{2}-\d{2}(?:[t ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:z|[+-]\d{2}:?\d{2})?)?",
    r")\s*$",
  ))
  .expect("static regex")
});

static WHITESPACE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

// ─── Digests ─────────────────────────────────────────────────────────────────

/// SHA-256 of raw bytes, lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String { hex::encode(Sha256::digest(data)) }

/// SHA-256 of the canonical JSON encoding of `value`.
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  let value = serde_json::to_value(value)?;
  let mut out = String::new();
  write_canonical(&value, &mut out)?;
  Ok(hash_bytes(out.as_bytes()))
}

/// SHA-256 of a source page after normalization.
pub fn hash_page(raw: &str) -> String { hash_bytes(normalize_page(raw).as_bytes()) }

/// Apply the page normalization policy described in the module docs.
pub fn normalize_page(raw: &str) -> String {
  let stripped = COMMENTS.replace_all(raw, " ");
  let stripped = SCRIPTS.replace_all(&stripped, " ");

  let kept = stripped
    .lines()
    .filter(|line| !VOLATILE_LINE.is_match(line))
    .collect::<Vec<_>>()
    .join("\n");

  WHITESPACE.replace_all(&kept, " ").trim().to_owned()
}

/// Deterministic id for a tidbit that arrived without one.
///
/// Derived from the species, the generation timestamp and the normalized
/// title, so regenerating the same tidbit in the same batch reproduces the id.
pub fn tidbit_id(species: SpeciesId, generated_at: DateTime<Utc>, title: &str) -> String {
  let title = WHITESPACE
    .replace_all(&title.to_lowercase(), " ")
    .trim()
    .to_owned();
  let seed = format!(
    "{}|{}|{}",
    species.padded(),
    generated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    title
  );
  let digest = hash_bytes(seed.as_bytes());
  format!("{}-{}", species.padded(), &digest[..16])
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Whether `hash` is a SHA-256 digest in lowercase hex.
pub fn is_valid_hash(hash: &str) -> bool {
  hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Reject anything but a 64-character lowercase hex SHA-256 digest.
pub fn validate_hash(hash: &str) -> Result<()> {
  if is_valid_hash(hash) {
    Ok(())
  } else {
    Err(Error::InvalidHash(hash.to_owned()))
  }
}

// ─── Canonical JSON ──────────────────────────────────────────────────────────

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      out.push('{');
      for (i, (key, val)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&serde_json::to_string(key)?);
        out.push(':');
        write_canonical(val, out)?;
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out)?;
      }
      out.push(']');
    }
    scalar => out.push_str(&serde_json::to_string(scalar)?),
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn key_order_does_not_change_digest() {
    let a: Value =
      serde_json::from_str(r#"{"title":"Static","body":"Zap","meta":{"x":1,"y":[1,2]}}"#)
        .unwrap();
    let b: Value =
      serde_json::from_str(r#"{"meta":{"y":[1,2],"x":1},"body":"Zap","title":"Static"}"#)
        .unwrap();
    assert_eq!(hash_json(&a).unwrap(), hash_json(&b).unwrap());
  }

  #[test]
  fn array_order_is_significant() {
    let a = serde_json::json!({ "refs": ["a", "b"] });
    let b = serde_json::json!({ "refs": ["b", "a"] });
    assert_ne!(hash_json(&a).unwrap(), hash_json(&b).unwrap());
  }

  #[test]
  fn hash_bytes_is_known_sha256() {
    assert_eq!(
      hash_bytes(b"abc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }

  #[test]
  fn boilerplate_churn_does_not_change_page_hash() {
    let first = "<html><!-- cache 81 -->\n<h1>Pikachu</h1>\n\
                 <p>Stores electricity in its cheeks.</p>\n\
                 Retrieved on 2024-01-02\n\
                 This page was last edited on 2 January 2024, at 10:00.\n\
                 <script>var t = 1704189600;</script></html>";
    let second = "<html><!-- cache 97 -->\n<h1>Pikachu</h1>\n\
                  <p>Stores   electricity in its cheeks.</p>\n\
                  Retrieved on 2024-03-09\n\
                  This page was last edited on 9 March 2024, at 18:21.\n\
                  2024-03-09T18:21:00Z\n\
                  <script>var t = 1709998860;</script></html>";
    assert_eq!(hash_page(first), hash_page(second));
  }

  #[test]
  fn prose_edits_change_page_hash() {
    let first = "<p>Stores electricity in its cheeks.</p>";
    let second = "<p>Stores electricity in its tail.</p>";
    assert_ne!(hash_page(first), hash_page(second));
  }

  #[test]
  fn volatile_words_inside_prose_are_kept() {
    let normalized =
      normalize_page("Its evolution was last updated in Gen 4 games.\nadvertisement");
    assert_eq!(normalized, "Its evolution was last updated in Gen 4 games.");
  }

  #[test]
  fn tidbit_id_ignores_title_case_and_spacing() {
    let species = SpeciesId::new(25);
    let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let a = tidbit_id(species, ts, "Cheek  Pouches");
    let b = tidbit_id(species, ts, " cheek pouches ");
    assert_eq!(a, b);
    assert!(a.starts_with("0025-"));
    assert_eq!(a.len(), "0025-".len() + 16);

    let later = Utc.timestamp_opt(1_700_000_001, 0).unwrap();
    assert_ne!(a, tidbit_id(species, later, "Cheek Pouches"));
  }

  #[test]
  fn validate_hash_accepts_only_lowercase_sha256_hex() {
    let good = hash_bytes(b"x");
    assert!(validate_hash(&good).is_ok());
    assert!(validate_hash(&good.to_uppercase()).is_err());
    assert!(validate_hash(&good[..63]).is_err());
    assert!(validate_hash("not-a-hash").is_err());
  }
}
