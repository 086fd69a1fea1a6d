//! Host platform detection and filesystem layout.

pub mod arch;
pub mod os;
pub mod paths;

use std::collections::BTreeMap;
use std::fmt;

use arch::Arch;
use os::Os;

/// Host platform (e.g. `Linux-x86_64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  /// Settings describing a default build for this platform.
  pub fn default_settings(&self) -> BTreeMap<String, String> {
    let (compiler, version, cppstd, libcxx) = self.os.default_toolchain();
    let mut settings = BTreeMap::new();
    settings.insert("os".to_string(), self.os.as_str().to_string());
    settings.insert("arch".to_string(), self.arch.as_str().to_string());
    settings.insert("build_type".to_string(), "Release".to_string());
    settings.insert("compiler".to_string(), compiler.to_string());
    settings.insert("compiler.version".to_string(), version.to_string());
    settings.insert("compiler.cppstd".to_string(), cppstd.to_string());
    if let Some(libcxx) = libcxx {
      settings.insert("compiler.libcxx".to_string(), libcxx.to_string());
    }
    settings
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.os, self.arch)
  }
}
