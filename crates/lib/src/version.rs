//! Package versions and version ranges.
//!
//! Versions compare segment-wise: numeric segments numerically, text segments
//! lexically, and missing trailing segments count as `0`, so `2.0 == 2.0.0`
//! and `1.10 > 1.9`. A `-suffix` marks a pre-release that sorts before the
//! plain version; a `+suffix` is build metadata and ignored when comparing.
//!
//! Ranges use the bracket syntax found in recipe references:
//!
//! - `[>=2.0 <3.0]`: every comparator must hold
//! - `[>=1.0 <2.0 || >=3.0]`: any alternative may hold
//! - `[~2.5]`: `>=2.5 <2.6`, `[^1.2]`: `>=1.2 <2`
//! - `2.5` (no brackets): exactly `2.5`
//! - `*` or `[*]`: any version
//!
//! Pre-releases only satisfy a range written with `include_prerelease`
//! (`[>=1.0, include_prerelease]`) or an exact pin.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
  #[error("invalid version '{version}': {reason}")]
  InvalidVersion { version: String, reason: String },

  #[error("invalid version range '{range}': {reason}")]
  InvalidRange { range: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Item {
  Number(u64),
  Text(String),
}

fn parse_items(raw: &str, whole: &str) -> Result<Vec<Item>, VersionError> {
  raw
    .split('.')
    .map(|segment| {
      if segment.is_empty() {
        return Err(VersionError::InvalidVersion {
          version: whole.to_string(),
          reason: "empty segment".to_string(),
        });
      }
      if !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(VersionError::InvalidVersion {
          version: whole.to_string(),
          reason: format!("invalid characters in segment '{segment}'"),
        });
      }
      Ok(match segment.parse::<u64>() {
        Ok(n) if segment.chars().all(|c| c.is_ascii_digit()) => Item::Number(n),
        _ => Item::Text(segment.to_ascii_lowercase()),
      })
    })
    .collect()
}

fn compare_items(a: &[Item], b: &[Item]) -> Ordering {
  let zero = Item::Number(0);
  let len = a.len().max(b.len());
  for i in 0..len {
    let left = a.get(i).unwrap_or(&zero);
    let right = b.get(i).unwrap_or(&zero);
    match left.cmp(right) {
      Ordering::Equal => continue,
      other => return other,
    }
  }
  Ordering::Equal
}

/// A package version such as `2.5`, `1.2.13`, `cci.20230101` or `3.0-rc1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
  raw: String,
  main: Vec<Item>,
  pre: Option<Vec<Item>>,
}

impl Version {
  pub fn parse(input: &str) -> Result<Self, VersionError> {
    let raw = input.trim();
    if raw.is_empty() {
      return Err(VersionError::InvalidVersion {
        version: input.to_string(),
        reason: "empty version".to_string(),
      });
    }

    let without_build = raw.split_once('+').map(|(v, _)| v).unwrap_or(raw);
    let (main, pre) = match without_build.split_once('-') {
      Some((main, pre)) => (main, Some(parse_items(pre, raw)?)),
      None => (without_build, None),
    };

    Ok(Self {
      raw: raw.to_string(),
      main: parse_items(main, raw)?,
      pre,
    })
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }

  pub fn is_prerelease(&self) -> bool {
    self.pre.is_some()
  }

  /// The first segment when it is numeric.
  pub fn major(&self) -> Option<u64> {
    match self.main.first() {
      Some(Item::Number(n)) => Some(*n),
      _ => None,
    }
  }

  /// The version with the numeric segment at `index` incremented and
  /// everything after it dropped. Used for tilde and caret upper bounds.
  /// `None` for text segments and for a segment already at `u64::MAX`.
  fn bump(&self, index: usize) -> Option<Version> {
    let mut parts = Vec::with_capacity(index + 1);
    for (i, item) in self.main.iter().take(index + 1).enumerate() {
      match item {
        Item::Number(n) if i == index => parts.push(n.checked_add(1)?.to_string()),
        Item::Number(n) => parts.push(n.to_string()),
        Item::Text(_) => return None,
      }
    }
    Version::parse(&parts.join(".")).ok()
  }
}

impl Ord for Version {
  fn cmp(&self, other: &Self) -> Ordering {
    compare_items(&self.main, &other.main).then_with(|| match (&self.pre, &other.pre) {
      (None, None) => Ordering::Equal,
      (None, Some(_)) => Ordering::Greater,
      (Some(_), None) => Ordering::Less,
      (Some(a), Some(b)) => compare_items(a, b),
    })
  }
}

impl PartialOrd for Version {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for Version {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Version {}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

impl FromStr for Version {
  type Err = VersionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Version::parse(s)
  }
}

impl TryFrom<String> for Version {
  type Error = VersionError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Version::parse(&value)
  }
}

impl From<Version> for String {
  fn from(value: Version) -> Self {
    value.raw
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
  Eq,
  Gt,
  Ge,
  Lt,
  Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
  op: Op,
  version: Version,
}

impl Comparator {
  fn matches(&self, version: &Version) -> bool {
    match self.op {
      Op::Eq => version == &self.version,
      Op::Gt => version > &self.version,
      Op::Ge => version >= &self.version,
      Op::Lt => version < &self.version,
      Op::Le => version <= &self.version,
    }
  }
}

/// A set of acceptable versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
  raw: String,
  /// Alternatives joined by `||`; each is a conjunction of comparators.
  alternatives: Vec<Vec<Comparator>>,
  include_prerelease: bool,
  exact: bool,
}

impl VersionRange {
  /// A range accepting every version.
  pub fn any() -> Self {
    Self {
      raw: "*".to_string(),
      alternatives: vec![Vec::new()],
      include_prerelease: false,
      exact: false,
    }
  }

  pub fn parse(input: &str) -> Result<Self, VersionError> {
    let raw = input.trim();
    let invalid = |reason: &str| VersionError::InvalidRange {
      range: raw.to_string(),
      reason: reason.to_string(),
    };

    if raw.is_empty() || raw == "*" {
      return Ok(Self::any());
    }

    let bracketed = raw.starts_with('[');
    if !bracketed {
      if raw.contains(['<', '>', '~', '^', '=', ' ', '|']) {
        return Err(invalid("range expressions must be enclosed in brackets"));
      }
      let version = Version::parse(raw).map_err(|e| invalid(&e.to_string()))?;
      return Ok(Self {
        raw: raw.to_string(),
        alternatives: vec![vec![Comparator { op: Op::Eq, version }]],
        include_prerelease: false,
        exact: true,
      });
    }

    let inner = raw
      .strip_prefix('[')
      .and_then(|s| s.strip_suffix(']'))
      .ok_or_else(|| invalid("missing closing bracket"))?;

    // Trailing options follow the first comma: `[>=1.0 <2, include_prerelease]`
    let (expr, options) = match inner.split_once(',') {
      Some((expr, options)) => (expr, options),
      None => (inner, ""),
    };
    let mut include_prerelease = false;
    for option in options.split([',', ' ']).map(str::trim).filter(|s| !s.is_empty()) {
      match option {
        "include_prerelease" => include_prerelease = true,
        other => return Err(invalid(&format!("unknown range option '{other}'"))),
      }
    }

    let mut alternatives = Vec::new();
    for alternative in expr.split("||") {
      let mut comparators = Vec::new();
      for token in alternative.split_whitespace() {
        comparators.extend(parse_token(token).map_err(|reason| invalid(&reason))?);
      }
      if comparators.is_empty() && alternative.trim() != "*" {
        return Err(invalid("empty alternative"));
      }
      alternatives.push(comparators);
    }

    Ok(Self {
      raw: raw.to_string(),
      alternatives,
      include_prerelease,
      exact: false,
    })
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }

  /// Whether `version` is inside this range.
  pub fn contains(&self, version: &Version) -> bool {
    if version.is_prerelease() && !self.include_prerelease && !self.exact {
      return false;
    }
    self
      .alternatives
      .iter()
      .any(|alternative| alternative.iter().all(|c| c.matches(version)))
  }

  /// The highest version from `candidates` inside this range.
  pub fn best_match<'a, I>(&self, candidates: I) -> Option<&'a Version>
  where
    I: IntoIterator<Item = &'a Version>,
  {
    candidates.into_iter().filter(|v| self.contains(v)).max()
  }
}

fn parse_token(token: &str) -> Result<Vec<Comparator>, String> {
  if token == "*" {
    return Ok(Vec::new());
  }

  let parse_version = |s: &str| Version::parse(s).map_err(|e| e.to_string());

  if let Some(rest) = token.strip_prefix('~') {
    let lower = parse_version(rest)?;
    let index = if lower.main.len() == 1 { 0 } else { 1 };
    let upper = lower
      .bump(index)
      .ok_or_else(|| format!("'{token}' has no numeric upper bound"))?;
    return Ok(vec![
      Comparator { op: Op::Ge, version: lower },
      Comparator { op: Op::Lt, version: upper },
    ]);
  }

  if let Some(rest) = token.strip_prefix('^') {
    let lower = parse_version(rest)?;
    let index = lower
      .main
      .iter()
      .position(|item| !matches!(item, Item::Number(0)))
      .unwrap_or(lower.main.len().saturating_sub(1));
    let upper = lower
      .bump(index)
      .ok_or_else(|| format!("'{token}' has no numeric upper bound"))?;
    return Ok(vec![
      Comparator { op: Op::Ge, version: lower },
      Comparator { op: Op::Lt, version: upper },
    ]);
  }

  let (op, rest) = if let Some(rest) = token.strip_prefix(">=") {
    (Op::Ge, rest)
  } else if let Some(rest) = token.strip_prefix("<=") {
    (Op::Le, rest)
  } else if let Some(rest) = token.strip_prefix('>') {
    (Op::Gt, rest)
  } else if let Some(rest) = token.strip_prefix('<') {
    (Op::Lt, rest)
  } else if let Some(rest) = token.strip_prefix("==") {
    (Op::Eq, rest)
  } else if let Some(rest) = token.strip_prefix('=') {
    (Op::Eq, rest)
  } else {
    (Op::Eq, token)
  };

  Ok(vec![Comparator {
    op,
    version: parse_version(rest)?,
  }])
}

impl fmt::Display for VersionRange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

impl FromStr for VersionRange {
  type Err = VersionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    VersionRange::parse(s)
  }
}

impl TryFrom<String> for VersionRange {
  type Error = VersionError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    VersionRange::parse(&value)
  }
}

impl From<VersionRange> for String {
  fn from(value: VersionRange) -> Self {
    value.raw
  }
}
