//! Per-platform package registries and concurrent multi-platform builds.
//!
//! Every target platform loads its own registry because manifests expand
//! differently per platform (`ARCH`, `TARGET`, ...). [`PlatformContextCache`]
//! loads each registry at most once and is shared by every compiler running
//! in the process, including compilers that cross into another platform to
//! build a platform-qualified dependency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::convert::{CompileError, GraphCompiler, PlatformResolver};
use crate::llb::Definition;
use crate::loader::PackageLoader;
use crate::options::BuildOptions;
use crate::platform::Platform;
use crate::solver::{Packages, RegistryError};

#[derive(Debug, Error)]
pub enum ContextError {
  #[error("failed to load packages for {platform}: {source}")]
  Registry {
    platform: Platform,
    #[source]
    source: RegistryError,
  },

  #[error("platform context cache is poisoned")]
  Poisoned,
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("{platform}: {source}")]
  Compile {
    platform: Platform,
    #[source]
    source: CompileError,
  },

  #[error("compile task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// Shared flag telling compilers to stop before the next package.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Registry and options of one target platform.
#[derive(Debug)]
pub struct PlatformContext {
  pub platform: Platform,
  pub options: BuildOptions,
  pub packages: Packages,
}

/// Lazily loaded [`PlatformContext`]s, keyed by platform id.
pub struct PlatformContextCache {
  loader: Arc<dyn PackageLoader + Send + Sync>,
  base: BuildOptions,
  prefix_with_platform: bool,
  contexts: Mutex<HashMap<&'static str, Arc<PlatformContext>>>,
  loads: AtomicUsize,
}

impl PlatformContextCache {
  /// `base` supplies everything but the target platform.
  pub fn new(loader: Arc<dyn PackageLoader + Send + Sync>, base: BuildOptions) -> Self {
    Self {
      loader,
      base,
      prefix_with_platform: false,
      contexts: Mutex::new(HashMap::new()),
      loads: AtomicUsize::new(0),
    }
  }

  /// Prefix operation names with the platform id, for builds that produce
  /// several platforms at once.
  pub fn with_platform_prefix(mut self, enabled: bool) -> Self {
    self.prefix_with_platform = enabled;
    self
  }

  /// Number of registries loaded so far.
  pub fn load_count(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }

  /// The context of `platform`, loading it on first use.
  ///
  /// The lock is held while loading, so concurrent callers for the same
  /// platform wait and then reuse the loaded context.
  pub fn get(&self, platform: Platform) -> Result<Arc<PlatformContext>, ContextError> {
    let mut contexts = self.contexts.lock().map_err(|_| ContextError::Poisoned)?;

    if let Some(context) = contexts.get(platform.id) {
      return Ok(Arc::clone(context));
    }

    let options = self.options_for(platform);
    debug!(%platform, "loading platform context");
    let packages = Packages::load(self.loader.as_ref(), &options.variables())
      .map_err(|source| ContextError::Registry { platform, source })?;
    self.loads.fetch_add(1, Ordering::SeqCst);
    info!(%platform, packages = packages.len(), "platform context loaded");

    let context = Arc::new(PlatformContext {
      platform,
      options,
      packages,
    });
    contexts.insert(platform.id, Arc::clone(&context));

    Ok(context)
  }

  fn options_for(&self, platform: Platform) -> BuildOptions {
    let mut options = self.base.clone();
    options.target_platform = platform;
    if self.prefix_with_platform {
      options.common_prefix = format!("{} ", platform.id);
    }
    options
  }
}

impl PlatformResolver for PlatformContextCache {
  fn context_for(&self, platform: Platform) -> Result<Arc<PlatformContext>, ContextError> {
    self.get(platform)
  }
}

/// Resolve and compile `target` for one platform.
pub fn compile_platform(
  cache: &Arc<PlatformContextCache>,
  platform: Platform,
  target: &str,
  cancel: CancelToken,
) -> Result<Definition, CompileError> {
  let context = cache.get(platform)?;
  let graph = context.packages.resolve(target)?;
  let resolver: Arc<dyn PlatformResolver> = Arc::clone(cache) as Arc<dyn PlatformResolver>;

  GraphCompiler::new(&graph, &context.options)
    .with_resolver(resolver)
    .with_cancel(cancel)
    .marshal()
}

/// Compile `target` for every platform concurrently, one blocking task per
/// platform.
///
/// The first failure cancels the remaining tasks and is returned. On success
/// definitions come back in the order of `platforms`.
pub async fn compile_platforms(
  cache: Arc<PlatformContextCache>,
  target: &str,
  platforms: &[Platform],
) -> Result<Vec<(Platform, Definition)>, BuildError> {
  info!(target, platforms = platforms.len(), "compiling platforms");

  let cancel = CancelToken::new();
  let mut join_set = JoinSet::new();

  for (index, platform) in platforms.iter().copied().enumerate() {
    let cache = Arc::clone(&cache);
    let cancel = cancel.clone();
    let target = target.to_string();

    join_set.spawn_blocking(move || {
      let result = compile_platform(&cache, platform, &target, cancel);
      (index, platform, result)
    });
  }

  let mut results: Vec<Option<(Platform, Definition)>> = vec![None; platforms.len()];

  while let Some(join_result) = join_set.join_next().await {
    match join_result {
      Ok((index, platform, Ok(definition))) => {
        debug!(%platform, ops = definition.ops.len(), "platform compiled");
        results[index] = Some((platform, definition));
      }
      Ok((_, platform, Err(source))) => {
        error!(%platform, error = %source, "platform compile failed");
        cancel.cancel();
        join_set.abort_all();
        return Err(BuildError::Compile { platform, source });
      }
      Err(e) => {
        error!(error = %e, "compile task panicked");
        cancel.cancel();
        join_set.abort_all();
        return Err(BuildError::Join(e));
      }
    }
  }

  Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::llb::Op;
  use crate::loader::StaticLoader;
  use crate::pkg::{Dependency, Package, Step};
  use crate::platform::{LINUX_AMD64, LINUX_ARM64, LINUX_ARMV7};
  use crate::solver::ResolveError;

  fn cache(pkgs: Vec<Package>) -> Arc<PlatformContextCache> {
    let loader = Arc::new(StaticLoader::new(pkgs));
    Arc::new(PlatformContextCache::new(loader, BuildOptions::new("app").with_platform(LINUX_AMD64)))
  }

  fn app() -> Vec<Package> {
    vec![
      Package::new("base").with_finalize("/", "/"),
      Package::new("app")
        .with_dependency(Dependency::stage("base"))
        .with_step(Step::new().with_build("make"))
        .with_finalize("/out", "/"),
    ]
  }

  mod cache {
    use super::*;

    #[test]
    fn loads_each_platform_once() {
      let cache = cache(app());

      let contexts: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| cache.get(LINUX_ARM64).unwrap())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
      });

      assert_eq!(cache.load_count(), 1);
      assert!(contexts.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));

      cache.get(LINUX_AMD64).unwrap();
      assert_eq!(cache.load_count(), 2);
    }

    #[test]
    fn packages_see_platform_variables() {
      let cache = cache(app());

      let arm = cache.get(LINUX_ARM64).unwrap();
      let pkg = arm.packages.get("app").unwrap();
      assert_eq!(pkg.context.get("ARCH"), Some("aarch64"));
      assert_eq!(arm.options.target_platform, LINUX_ARM64);
      assert_eq!(arm.options.common_prefix, "");
    }

    #[test]
    fn platform_prefix_is_applied() {
      let loader = Arc::new(StaticLoader::new(app()));
      let cache = PlatformContextCache::new(loader, BuildOptions::new("app")).with_platform_prefix(true);

      assert_eq!(cache.get(LINUX_ARMV7).unwrap().options.common_prefix, "linux/armv7 ");
    }

    #[test]
    fn duplicate_packages_fail_to_load() {
      let cache = cache(vec![Package::new("app"), Package::new("app")]);
      let err = cache.get(LINUX_AMD64).unwrap_err();
      assert!(matches!(err, ContextError::Registry { source: RegistryError::Duplicate { .. }, .. }));
    }
  }

  mod cross_platform {
    use super::*;

    #[test]
    fn foreign_platform_dependency_is_imported() {
      let cache = cache(vec![
        Package::new("tool").with_step(Step::new().with_build("make")).with_finalize("/out", "/"),
        Package::new("app")
          .with_dependency(Dependency::stage("tool").with_platform(LINUX_ARM64).with_to("/tools"))
          .with_finalize("/", "/"),
      ]);

      let def = compile_platform(&cache, LINUX_AMD64, "app", CancelToken::new()).unwrap();

      let imported = def
        .ops
        .values()
        .find_map(|entry| match &entry.op {
          Op::Import { platform, definition } => Some((platform.clone(), definition.clone())),
          _ => None,
        })
        .unwrap();
      assert_eq!(imported.0, "linux/arm64");
      assert_eq!(imported.1.platform, LINUX_ARM64);
      assert!(imported.1.find(|n| n == "tool:build-0").next().is_some());
      assert_eq!(cache.load_count(), 2);
    }

    #[test]
    fn same_platform_dependency_is_inlined() {
      let cache = cache(vec![
        Package::new("tool").with_finalize("/out", "/"),
        Package::new("app")
          .with_dependency(Dependency::stage("tool").with_platform(LINUX_AMD64).with_to("/tools"))
          .with_finalize("/", "/"),
      ]);

      let def = compile_platform(&cache, LINUX_AMD64, "app", CancelToken::new()).unwrap();

      assert!(!def.ops.values().any(|e| matches!(e.op, Op::Import { .. })));
      assert!(def.find(|n| n == "tool:finalize /out -> /").next().is_some());
    }

    #[test]
    fn platform_cycle_is_detected() {
      let cache = cache(vec![
        Package::new("tool")
          .with_dependency(Dependency::stage("app").with_platform(LINUX_AMD64))
          .with_finalize("/", "/"),
        Package::new("app")
          .with_dependency(Dependency::stage("tool").with_platform(LINUX_ARM64))
          .with_finalize("/", "/"),
      ]);

      let err = compile_platform(&cache, LINUX_AMD64, "app", CancelToken::new()).unwrap_err();
      match err {
        CompileError::PlatformCycle { chain } => {
          assert_eq!(chain, vec!["app@linux/amd64", "tool@linux/arm64", "app@linux/amd64"]);
        }
        other => panic!("expected a platform cycle, got {other}"),
      }
    }
  }

  mod multi_platform {
    use super::*;

    #[tokio::test]
    async fn returns_definitions_in_request_order() {
      let loader = Arc::new(StaticLoader::new(app()));
      let cache = Arc::new(PlatformContextCache::new(loader, BuildOptions::new("app")).with_platform_prefix(true));

      let results = compile_platforms(Arc::clone(&cache), "app", &[LINUX_ARM64, LINUX_AMD64])
        .await
        .unwrap();

      let platforms: Vec<_> = results.iter().map(|(p, _)| *p).collect();
      assert_eq!(platforms, vec![LINUX_ARM64, LINUX_AMD64]);
      assert_eq!(results[0].1.platform, LINUX_ARM64);
      assert!(results[0].1.find(|n| n == "linux/arm64 app:build-0").next().is_some());
      assert!(results[1].1.find(|n| n == "linux/amd64 app:build-0").next().is_some());
      assert_eq!(cache.load_count(), 2);
    }

    #[tokio::test]
    async fn unknown_target_fails_fast() {
      let cache = cache(app());

      let err = compile_platforms(cache, "ghost", &[LINUX_AMD64, LINUX_ARM64, LINUX_ARMV7])
        .await
        .unwrap_err();

      match err {
        BuildError::Compile { source, .. } => assert!(matches!(
          source,
          CompileError::Resolve(ResolveError::PackageNotFound { ref name }) if name == "ghost"
        )),
        other => panic!("expected a compile error, got {other}"),
      }
    }

    #[test]
    fn cancel_token_is_shared() {
      let token = CancelToken::new();
      let clone = token.clone();
      clone.cancel();
      assert!(token.is_cancelled());
    }
  }
}
