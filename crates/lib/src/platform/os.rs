use std::fmt;

/// Host operating systems kiln can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
  FreeBsd,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      "freebsd" => Some(Self::FreeBsd),
      _ => None,
    }
  }

  /// Returns the value used for the `os` setting
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "Linux",
      Self::MacOs => "Macos",
      Self::Windows => "Windows",
      Self::FreeBsd => "FreeBSD",
    }
  }

  /// Default compiler, compiler version, C++ standard and standard library for this OS.
  pub fn default_toolchain(&self) -> (&'static str, &'static str, &'static str, Option<&'static str>) {
    match self {
      Self::Linux => ("gcc", "13", "gnu17", Some("libstdc++11")),
      Self::MacOs => ("apple-clang", "15", "gnu17", Some("libc++")),
      Self::Windows => ("msvc", "193", "14", None),
      Self::FreeBsd => ("clang", "16", "gnu17", Some("libc++")),
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
