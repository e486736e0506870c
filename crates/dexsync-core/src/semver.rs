//! Strict semantic versions for dataset releases.
//!
//! Accepts `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]` with no leading zeros on
//! numeric components. Precedence follows semver 2.0: build metadata is
//! ignored and a pre-release sorts before its release.

use std::{cmp::Ordering, fmt, str::FromStr};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
  pub major: u64,
  pub minor: u64,
  pub patch: u64,
  pub pre:   Vec<Identifier>,
  pub build: Option<String>,
}

/// One dot-separated pre-release identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
  Numeric(u64),
  Alpha(String),
}

impl Version {
  pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
    Self { major, minor, patch, pre: Vec::new(), build: None }
  }

  /// The next patch release, dropping pre-release and build metadata.
  pub fn bump_patch(&self) -> Self { Self::new(self.major, self.minor, self.patch + 1) }

  /// Precedence comparison; build metadata does not participate.
  pub fn precedence(&self, other: &Self) -> Ordering {
    (self.major, self.minor, self.patch)
      .cmp(&(other.major, other.minor, other.patch))
      .then_with(|| compare_pre(&self.pre, &other.pre))
  }
}

/// Compare two version strings, failing on either being malformed.
pub fn compare(a: &str, b: &str) -> Result<Ordering> {
  let a: Version = a.parse()?;
  let b: Version = b.parse()?;
  Ok(a.precedence(&b))
}

fn compare_pre(a: &[Identifier], b: &[Identifier]) -> Ordering {
  match (a.is_empty(), b.is_empty()) {
    (true, true) => return Ordering::Equal,
    (true, false) => return Ordering::Greater,
    (false, true) => return Ordering::Less,
    (false, false) => {}
  }
  for (x, y) in a.iter().zip(b) {
    let ord = match (x, y) {
      (Identifier::Numeric(x), Identifier::Numeric(y)) => x.cmp(y),
      (Identifier::Numeric(_), Identifier::Alpha(_)) => Ordering::Less,
      (Identifier::Alpha(_), Identifier::Numeric(_)) => Ordering::Greater,
      (Identifier::Alpha(x), Identifier::Alpha(y)) => x.cmp(y),
    };
    if ord != Ordering::Equal {
      return ord;
    }
  }
  a.len().cmp(&b.len())
}

fn parse_numeric(raw: &str, input: &str) -> Result<u64> {
  if raw.is_empty() {
    return Err(Error::InvalidVersion(input.to_owned(), "empty numeric component"));
  }
  if !raw.bytes().all(|b| b.is_ascii_digit()) {
    return Err(Error::InvalidVersion(input.to_owned(), "non-digit in numeric component"));
  }
  if raw.len() > 1 && raw.starts_with('0') {
    return Err(Error::InvalidVersion(input.to_owned(), "leading zero"));
  }
  raw
    .parse()
    .map_err(|_| Error::InvalidVersion(input.to_owned(), "numeric component overflows"))
}

fn valid_ident_chars(raw: &str) -> bool {
  !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

impl FromStr for Version {
  type Err = Error;

  fn from_str(input: &str) -> Result<Self> {
    let (rest, build) = match input.split_once('+') {
      Some((rest, build)) => {
        if !build.split('.').all(valid_ident_chars) {
          return Err(Error::InvalidVersion(input.to_owned(), "invalid build metadata"));
        }
        (rest, Some(build.to_owned()))
      }
      None => (input, None),
    };

    let (core, pre) = match rest.split_once('-') {
      Some((core, pre)) => (core, Some(pre)),
      None => (rest, None),
    };

    let parts: Vec<&str> = core.split('.').collect();
    let [major, minor, patch] = parts.as_slice() else {
      return Err(Error::InvalidVersion(input.to_owned(), "expected MAJOR.MINOR.PATCH"));
    };

    let pre = match pre {
      None => Vec::new(),
      Some(pre) => pre
        .split('.')
        .map(|ident| {
          if !valid_ident_chars(ident) {
            return Err(Error::InvalidVersion(input.to_owned(), "invalid pre-release"));
          }
          if ident.bytes().all(|b| b.is_ascii_digit()) {
            parse_numeric(ident, input).map(Identifier::Numeric)
          } else {
            Ok(Identifier::Alpha(ident.to_owned()))
          }
        })
        .collect::<Result<_>>()?,
    };

    Ok(Self {
      major: parse_numeric(major, input)?,
      minor: parse_numeric(minor, input)?,
      patch: parse_numeric(patch, input)?,
      pre,
      build,
    })
  }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
    for (i, ident) in self.pre.iter().enumerate() {
      f.write_str(if i == 0 { "-" } else { "." })?;
      match ident {
        Identifier::Numeric(n) => write!(f, "{n}")?,
        Identifier::Alpha(s) => f.write_str(s)?,
      }
    }
    if let Some(build) = &self.build {
      write!(f, "+{build}")?;
    }
    Ok(())
  }
}
