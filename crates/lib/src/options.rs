//! Build options shared by the loader, the resolver and the compiler.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{BUILD_ARG_PREFIX, DEFAULT_PATH, MAX_SOURCE_DATE_EPOCH};
use crate::platform::{LINUX_AMD64, Platform};
use crate::vars::Variables;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
  #[error("source date epoch {seconds} is out of range (max {max})")]
  SourceDateEpochOutOfRange { seconds: u64, max: u64 },
}

/// Proxy settings forwarded to every executed instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyEnv {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub http_proxy: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub https_proxy: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ftp_proxy: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub no_proxy: Option<String>,
}

impl ProxyEnv {
  /// Pick proxy settings out of `NAME=VALUE` style arguments, matching names
  /// case-insensitively. Returns `None` when no proxy is configured.
  pub fn from_args<'a>(args: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<Self> {
    let mut proxy = ProxyEnv::default();
    let mut found = false;

    for (name, value) in args {
      let slot = match name.to_ascii_lowercase().as_str() {
        "http_proxy" => &mut proxy.http_proxy,
        "https_proxy" => &mut proxy.https_proxy,
        "ftp_proxy" => &mut proxy.ftp_proxy,
        "no_proxy" => &mut proxy.no_proxy,
        _ => continue,
      };
      *slot = Some(value.to_string());
      found = true;
    }

    found.then_some(proxy)
  }
}

/// Options for one compilation.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  pub build_platform: Platform,
  pub target_platform: Platform,
  /// Name of the package to build.
  pub target: String,
  /// Prepended to every operation name (set to `"<platform> "` in
  /// multi-platform mode).
  pub common_prefix: String,
  /// Fixed timestamp applied to finalize copies for reproducible output.
  pub source_date_epoch: Option<SystemTime>,
  /// Namespace for persistent cache mounts.
  pub cache_namespace: String,
  pub proxy: Option<ProxyEnv>,
  /// Extra variables from `--build-arg NAME=VALUE`, already prefixed.
  pub build_args: Variables,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      build_platform: LINUX_AMD64,
      target_platform: LINUX_AMD64,
      target: String::new(),
      common_prefix: String::new(),
      source_date_epoch: None,
      cache_namespace: String::new(),
      proxy: None,
      build_args: Variables::new(),
    }
  }
}

impl BuildOptions {
  pub fn new(target: impl Into<String>) -> Self {
    Self {
      target: target.into(),
      ..Self::default()
    }
  }

  /// Use `platform` as both build and target platform.
  pub fn with_platform(mut self, platform: Platform) -> Self {
    self.build_platform = platform;
    self.target_platform = platform;
    self
  }

  /// Fix the build timestamp; fails past [`MAX_SOURCE_DATE_EPOCH`].
  pub fn with_source_date_epoch(mut self, seconds: u64) -> Result<Self, OptionsError> {
    let out_of_range = || OptionsError::SourceDateEpochOutOfRange {
      seconds,
      max: MAX_SOURCE_DATE_EPOCH,
    };
    if seconds > MAX_SOURCE_DATE_EPOCH {
      return Err(out_of_range());
    }

    let time = UNIX_EPOCH
      .checked_add(Duration::from_secs(seconds))
      .ok_or_else(out_of_range)?;
    self.source_date_epoch = Some(time);
    Ok(self)
  }

  pub fn with_cache_namespace(mut self, namespace: impl Into<String>) -> Self {
    self.cache_namespace = namespace.into();
    self
  }

  /// Record a `NAME=VALUE` build argument as `BUILD_ARG_NAME`.
  pub fn with_build_arg(mut self, name: &str, value: &str) -> Self {
    self.build_args.insert(format!("{}{}", BUILD_ARG_PREFIX, name), value);
    self
  }

  /// Seconds since the epoch of the fixed build timestamp, if configured.
  pub fn source_date_epoch_secs(&self) -> Option<i64> {
    self
      .source_date_epoch
      .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
      .and_then(|d| i64::try_from(d.as_secs()).ok())
  }

  /// The full variable set: defaults, then build platform, then target
  /// platform, then build args.
  pub fn variables(&self) -> Variables {
    default_variables()
      .merge(&self.build_platform.build_variables())
      .merge(&self.target_platform.target_variables())
      .merge(&self.build_args)
  }
}

/// Default values for build environment variables.
pub fn default_variables() -> Variables {
  [
    ("CFLAGS", "-g0 -Os".to_string()),
    ("CXXFLAGS", "-g0 -Os".to_string()),
    ("LDFLAGS", "-s".to_string()),
    ("VENDOR", "pkgsmith".to_string()),
    ("SYSROOT", "/pkgsmith".to_string()),
    ("TOOLCHAIN", "/toolchain".to_string()),
    ("PATH", format!("/toolchain/bin:{}", DEFAULT_PATH)),
  ]
  .into_iter()
  .collect()
}
