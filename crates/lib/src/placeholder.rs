//! Placeholder parsing and substitution in recipe commands and variables.
//!
//! Build steps and tool variables are written before the scratch directories,
//! option values or dependency locations are known. Placeholders mark where
//! those values go:
//!
//! - `$${source}`, `$${build}`, `$${package}`: the node's working folders
//! - `$${name}`, `$${version}`, `$${jobs}`
//! - `$${option:NAME}`, `$${setting:NAME}`: values from the configuration
//! - `$${dep:NAME}`: the published artifact of a dependency
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` and `$PATH` work without escaping. Use `$$$` before `{` to produce
//! a literal `$${`.
//!
//! ```
//! use kiln_lib::placeholder::{parse, Meta, Placeholder, Segment};
//!
//! let segments = parse("-DZLIB_ROOT=$${dep:zlib} -j$${jobs}").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("-DZLIB_ROOT=".to_string()),
//!     Segment::Placeholder(Placeholder::Dep("zlib".to_string())),
//!     Segment::Literal(" -j".to_string()),
//!     Segment::Placeholder(Placeholder::Meta(Meta::Jobs)),
//! ]);
//! ```

use thiserror::Error;

use crate::recipe::Folder;

/// Node metadata available to commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meta {
  Name,
  Version,
  Jobs,
}

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  /// `$${source}`, `$${build}`, `$${package}`
  Folder(Folder),
  /// `$${name}`, `$${version}`, `$${jobs}`
  Meta(Meta),
  /// `$${option:NAME}`
  Option(String),
  /// `$${setting:NAME}`
  Setting(String),
  /// `$${dep:NAME}`
  Dep(String),
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder type: {0}")]
  UnknownType(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("option '{0}' is not part of the configuration")]
  UnresolvedOption(String),

  #[error("setting '{0}' is not part of the configuration")]
  UnresolvedSetting(String),

  #[error("'{0}' is not a dependency of this package")]
  UnresolvedDependency(String),
}

/// Supplies placeholder values for one node.
pub trait Resolver {
  fn resolve_folder(&self, folder: Folder) -> Result<String, PlaceholderError>;

  fn resolve_meta(&self, meta: Meta) -> Result<String, PlaceholderError>;

  fn resolve_option(&self, name: &str) -> Result<String, PlaceholderError>;

  fn resolve_setting(&self, name: &str) -> Result<String, PlaceholderError>;

  fn resolve_dep(&self, name: &str) -> Result<String, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed, has an unknown type, or is
/// missing its argument.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    if !matches!(chars.peek(), Some((_, '$'))) {
      // A lone $ (shell variable)
      literal.push('$');
      continue;
    }
    chars.next();

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();
        if matches!(chars.peek(), Some((_, '{'))) {
          // Escaped: $$${ -> $${
          chars.next();
          literal.push_str("$${");
        } else {
          literal.push_str("$$$");
        }
      }
      Some((_, '{')) => {
        chars.next();
        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut content = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            closed = true;
            break;
          }
          content.push(c);
        }
        if !closed {
          return Err(PlaceholderError::Unclosed(pos));
        }

        segments.push(Segment::Placeholder(parse_placeholder_content(&content)?));
      }
      _ => literal.push_str("$$"),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse the content between `$${` and `}`.
fn parse_placeholder_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  match content {
    "source" => return Ok(Placeholder::Folder(Folder::Source)),
    "build" => return Ok(Placeholder::Folder(Folder::Build)),
    "package" => return Ok(Placeholder::Folder(Folder::Package)),
    "name" => return Ok(Placeholder::Meta(Meta::Name)),
    "version" => return Ok(Placeholder::Meta(Meta::Version)),
    "jobs" => return Ok(Placeholder::Meta(Meta::Jobs)),
    _ => {}
  }

  let (kind, arg) = content
    .split_once(':')
    .ok_or_else(|| PlaceholderError::UnknownType(content.to_string()))?;
  if arg.is_empty() {
    return Err(PlaceholderError::Malformed(format!("'{kind}' placeholder needs a name")));
  }

  match kind {
    "option" => Ok(Placeholder::Option(arg.to_string())),
    "setting" => Ok(Placeholder::Setting(arg.to_string())),
    "dep" => Ok(Placeholder::Dep(arg.to_string())),
    _ => Err(PlaceholderError::UnknownType(kind.to_string())),
  }
}

/// Parse and substitute in one step.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

/// Substitute placeholders in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(p) => {
        let value = match p {
          Placeholder::Folder(folder) => resolver.resolve_folder(*folder)?,
          Placeholder::Meta(meta) => resolver.resolve_meta(*meta)?,
          Placeholder::Option(name) => resolver.resolve_option(name)?,
          Placeholder::Setting(name) => resolver.resolve_setting(name)?,
          Placeholder::Dep(name) => resolver.resolve_dep(name)?,
        };
        result.push_str(&value);
      }
    }
  }

  Ok(result)
}
