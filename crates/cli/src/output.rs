//! Terminal output.
//!
//! Text mode prints one colored line per package plus `label: value` summary
//! fields; `--output json` prints the serialized result instead.

use std::fmt::Display;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// Leading marker of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
  Done,
  Reused,
  Failed,
  Warn,
}

impl Mark {
  fn symbol(self) -> &'static str {
    match self {
      Mark::Done => symbols::SUCCESS,
      Mark::Reused => symbols::INFO,
      Mark::Failed => symbols::ERROR,
      Mark::Warn => symbols::WARNING,
    }
  }

  pub fn painted(self, stream: Stream) -> String {
    let symbol = self.symbol();
    match self {
      Mark::Done => symbol.if_supports_color(stream, |s| s.green()).to_string(),
      Mark::Reused => symbol.if_supports_color(stream, |s| s.blue()).to_string(),
      Mark::Failed => symbol.if_supports_color(stream, |s| s.red()).to_string(),
      Mark::Warn => symbol.if_supports_color(stream, |s| s.yellow()).to_string(),
    }
  }
}

/// First 12 hex digits of a package ID or revision.
pub fn short_id(id: &str) -> &str {
  &id[..id.len().min(12)]
}

/// Byte count in binary units (`1.5 KiB`).
pub fn human_size(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
  if bytes < 1024 {
    return format!("{bytes} B");
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{value:.1} {}", UNITS[unit])
}

/// Elapsed time at millisecond precision (`1m 5s`, `1s 500ms`).
pub fn human_elapsed(elapsed: Duration) -> String {
  let millis = Duration::from_millis(elapsed.as_millis() as u64);
  if millis.is_zero() {
    return "0ms".to_string();
  }
  humantime::format_duration(millis).to_string()
}

/// A headline on stdout, e.g. `✓ Exported zlib`.
pub fn headline(mark: Mark, message: &str) {
  println!("{} {}", mark.painted(Stream::Stdout), message);
}

/// A package line: `  ✓ zlib/1.3.1 (3f9a0c1e5b7d, built in 2s)`.
pub fn package_line(mark: Mark, reference: &str, detail: impl Display) {
  let detail = format!("({detail})");
  println!(
    "  {} {} {}",
    mark.painted(Stream::Stdout),
    reference,
    detail.if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

pub fn field(label: &str, value: impl Display) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// An error headline on stderr.
pub fn problem(message: &str) {
  eprintln!(
    "{} {}",
    Mark::Failed.painted(Stream::Stderr),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn emit_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
  println!("{json}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_id_keeps_twelve_digits() {
    assert_eq!(short_id("3f9a0c1e5b7d2a4c6e8f0a1b2c3d4e5f60718293"), "3f9a0c1e5b7d");
    assert_eq!(short_id("abc"), "abc");
  }

  #[test]
  fn sizes_use_binary_units() {
    assert_eq!(human_size(512), "512 B");
    assert_eq!(human_size(1536), "1.5 KiB");
    assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    assert_eq!(human_size(3 << 30), "3.0 GiB");
  }

  #[test]
  fn elapsed_drops_sub_millisecond_noise() {
    assert_eq!(human_elapsed(Duration::from_micros(1_500_250)), "1s 500ms");
    assert_eq!(human_elapsed(Duration::from_secs(65)), "1m 5s");
    assert_eq!(human_elapsed(Duration::from_micros(10)), "0ms");
  }
}
