mod compile;
mod dump;
mod graph;
mod rehash;
mod sbom;
mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;

use pkgsmith_lib::consts::{CACHE_NS_ENV, MAX_SOURCE_DATE_EPOCH, SOURCE_DATE_EPOCH_ENV};
use pkgsmith_lib::context::{PlatformContext, PlatformContextCache};
use pkgsmith_lib::loader::FilesystemLoader;
use pkgsmith_lib::options::{BuildOptions, ProxyEnv};
use pkgsmith_lib::platform::{LINUX_AMD64, Platform};

pub use compile::{CompileArgs, cmd_compile};
pub use dump::{DumpArgs, cmd_dump};
pub use graph::{GraphArgs, cmd_graph};
pub use rehash::{RehashArgs, cmd_rehash};
pub use sbom::{SbomArgs, cmd_sbom};
pub use validate::{ValidateArgs, cmd_validate};

/// Where packages are loaded from and for which platform.
#[derive(Debug, Clone, Args)]
pub struct LoadArgs {
  /// Root directory of the package tree
  #[arg(long, default_value = ".")]
  pub root: PathBuf,

  /// Target platform (repeat for a multi-platform compile)
  #[arg(long = "platform", default_value = "linux/amd64")]
  pub platforms: Vec<Platform>,

  /// Build argument exposed to manifests as BUILD_ARG_<NAME>
  #[arg(long = "build-arg", value_name = "NAME=VALUE", value_parser = parse_build_arg)]
  pub build_args: Vec<(String, String)>,
}

impl LoadArgs {
  pub fn options(&self, target: &str) -> BuildOptions {
    let mut options = BuildOptions::new(target).with_platform(self.primary_platform());
    for (name, value) in &self.build_args {
      options = options.with_build_arg(name, value);
    }
    options.proxy = ProxyEnv::from_args(self.build_args.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    options
  }

  pub fn primary_platform(&self) -> Platform {
    self.platforms.first().copied().unwrap_or(LINUX_AMD64)
  }

  /// A context cache over the package tree at `--root`.
  pub fn cache(&self, options: BuildOptions) -> Result<Arc<PlatformContextCache>> {
    if !self.root.is_dir() {
      bail!("Package root not found: {}", self.root.display());
    }

    let loader = Arc::new(FilesystemLoader::new(&self.root));
    Ok(Arc::new(
      PlatformContextCache::new(loader, options).with_platform_prefix(self.platforms.len() > 1),
    ))
  }

  /// Load the registry of the primary platform.
  pub fn load(&self, target: &str) -> Result<Arc<PlatformContext>> {
    let platform = self.primary_platform();
    self
      .cache(self.options(target))?
      .get(platform)
      .with_context(|| format!("Failed to load packages from {}", self.root.display()))
  }
}

/// Reproducibility and caching settings of a compile.
#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
  /// Fixed timestamp (seconds since the epoch) applied to finalized files
  #[arg(
    long,
    env = SOURCE_DATE_EPOCH_ENV,
    value_parser = clap::value_parser!(u64).range(..=MAX_SOURCE_DATE_EPOCH)
  )]
  pub source_date_epoch: Option<u64>,

  /// Namespace for persistent cache mounts
  #[arg(long, env = CACHE_NS_ENV, default_value = "")]
  pub cache_namespace: String,
}

impl BuildArgs {
  pub fn apply(&self, mut options: BuildOptions) -> Result<BuildOptions> {
    if let Some(seconds) = self.source_date_epoch {
      options = options.with_source_date_epoch(seconds)?;
    }
    Ok(options.with_cache_namespace(self.cache_namespace.clone()))
  }
}

fn parse_build_arg(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
    _ => Err(format!("expected NAME=VALUE, got {:?}", s)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn build_arg_requires_name() {
    assert_eq!(
      parse_build_arg("TAG=v1=rc").unwrap(),
      ("TAG".to_string(), "v1=rc".to_string())
    );
    assert!(parse_build_arg("=v1").is_err());
    assert!(parse_build_arg("TAG").is_err());
  }

  #[test]
  fn build_args_reject_out_of_range_epoch() {
    let args = BuildArgs {
      source_date_epoch: Some(u64::MAX),
      cache_namespace: String::new(),
    };
    assert!(args.apply(BuildOptions::new("app")).is_err());

    let args = BuildArgs {
      source_date_epoch: Some(1_700_000_000),
      cache_namespace: "ci".to_string(),
    };
    let options = args.apply(BuildOptions::new("app")).unwrap();
    assert_eq!(options.source_date_epoch_secs(), Some(1_700_000_000));
    assert_eq!(options.cache_namespace, "ci");
  }

  #[test]
  fn proxy_build_args_are_forwarded() {
    let args = LoadArgs {
      root: PathBuf::from("."),
      platforms: vec![LINUX_AMD64],
      build_args: vec![("https_proxy".to_string(), "http://proxy:3128".to_string())],
    };

    let options = args.options("app");
    assert_eq!(
      options.proxy.and_then(|p| p.https_proxy).as_deref(),
      Some("http://proxy:3128")
    );
    assert_eq!(options.build_args.get("BUILD_ARG_https_proxy"), Some("http://proxy:3128"));
  }
}
