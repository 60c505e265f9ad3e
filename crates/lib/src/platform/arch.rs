use std::fmt;

/// CPU architecture variants a build can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
  X86_64,
  Aarch64,
  Armv7,
}

impl Arch {
  /// Returns the toolchain string identifier for this architecture
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::Aarch64 => "aarch64",
      Self::Armv7 => "armv7",
    }
  }

  /// Returns the container-image architecture name (`amd64`, `arm64`, `arm`)
  pub fn image_name(&self) -> &'static str {
    match self {
      Self::X86_64 => "amd64",
      Self::Aarch64 => "arm64",
      Self::Armv7 => "arm",
    }
  }

  /// Returns the container-image architecture variant, if any
  pub fn image_variant(&self) -> Option<&'static str> {
    match self {
      Self::Armv7 => Some("v7"),
      _ => None,
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn armv7_carries_image_variant() {
    assert_eq!(Arch::Armv7.image_name(), "arm");
    assert_eq!(Arch::Armv7.image_variant(), Some("v7"));
    assert_eq!(Arch::X86_64.image_variant(), None);
  }
}
