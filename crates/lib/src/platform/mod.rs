//! Build and target platforms.
//!
//! A platform is identified by an `os/arch` string such as `linux/amd64`. Each
//! known platform carries the toolchain triples exposed to manifests as
//! variables.

pub mod arch;

use std::fmt;
use std::str::FromStr;

use arch::Arch;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::vars::Variables;

/// A toolchain platform (e.g. `linux/arm64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub id: &'static str,
  pub arch: Arch,
  pub target: &'static str,
  pub build: &'static str,
  pub host: &'static str,
}

pub const LINUX_AMD64: Platform = Platform {
  id: "linux/amd64",
  arch: Arch::X86_64,
  target: "x86_64-pkgsmith-linux-musl",
  build: "x86_64-linux-musl",
  host: "x86_64-linux-musl",
};

pub const LINUX_ARM64: Platform = Platform {
  id: "linux/arm64",
  arch: Arch::Aarch64,
  target: "aarch64-pkgsmith-linux-musl",
  build: "aarch64-linux-musl",
  host: "aarch64-linux-musl",
};

pub const LINUX_ARMV7: Platform = Platform {
  id: "linux/armv7",
  arch: Arch::Armv7,
  target: "armv7-pkgsmith-linux-musleabihf",
  build: "armv7-linux-musleabihf",
  host: "armv7-linux-musleabihf",
};

/// Every platform the compiler knows how to target.
pub const PLATFORMS: &[Platform] = &[LINUX_AMD64, LINUX_ARM64, LINUX_ARMV7];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("platform {0:?} is not defined")]
pub struct UnknownPlatform(pub String);

impl Platform {
  /// Variables describing the machine the build runs on.
  pub fn build_variables(&self) -> Variables {
    [("BUILD", self.build), ("HOST", self.host)].into_iter().collect()
  }

  /// Variables describing the machine the build produces artifacts for.
  pub fn target_variables(&self) -> Variables {
    [("ARCH", self.arch.as_str()), ("TARGET", self.target)].into_iter().collect()
  }

  /// The OCI platform string (`linux/arm/v7` for armv7).
  pub fn oci(&self) -> String {
    match self.arch.image_variant() {
      Some(variant) => format!("linux/{}/{}", self.arch.image_name(), variant),
      None => format!("linux/{}", self.arch.image_name()),
    }
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.id)
  }
}

impl FromStr for Platform {
  type Err = UnknownPlatform;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    PLATFORMS
      .iter()
      .find(|p| p.id == s)
      .copied()
      .ok_or_else(|| UnknownPlatform(s.to_string()))
  }
}

impl Serialize for Platform {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.id)
  }
}

impl<'de> Deserialize<'de> for Platform {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let id = String::deserialize(deserializer)?;
    id.parse().map_err(serde::de::Error::custom)
  }
}
