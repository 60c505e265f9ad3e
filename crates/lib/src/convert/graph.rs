use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::{CompileError, PlatformResolver};
use crate::consts::{DEFAULT_BASE_IMAGE, DEFAULT_DIR_MODE, LOCAL_CONTEXT_NAME, PKG_DIR, PKG_YAML};
use crate::context::CancelToken;
use crate::llb::{Definition, FileActions, RunOptions, State};
use crate::options::BuildOptions;
use crate::pkg::{NetworkMode, Variant};
use crate::platform::Platform;
use crate::solver::{NodeId, PackageGraph};
use crate::vars::Variables;

/// Compiles one resolved graph for one target platform.
///
/// Holds the states shared by every package (base images, the checksummer
/// and the local context) and caches compiled packages by
/// (name, platform) for its whole lifetime.
pub struct GraphCompiler<'g> {
  pub(super) graph: &'g PackageGraph,
  pub(super) options: BuildOptions,
  resolver: Option<Arc<dyn PlatformResolver>>,
  cancel: CancelToken,

  alpine_base: State,
  scratch_base: State,
  pub(super) checksummer: State,
  pub(super) local_context: State,

  cache: HashMap<(String, Platform), State>,
  /// (package, platform) pairs being compiled, outermost first, including
  /// those of the compilers that spawned this one.
  in_progress: Vec<(String, Platform)>,
  compiled: usize,
}

impl<'g> GraphCompiler<'g> {
  pub fn new(graph: &'g PackageGraph, options: &BuildOptions) -> Self {
    let vars = options.variables();
    let prefix = options.common_prefix.as_str();

    let alpine = State::image(DEFAULT_BASE_IMAGE, None)
      .named(format!("{}base", prefix))
      .run(
        shlex("apk --no-cache --update add bash"),
        RunOptions::new(format!("{}base-apkinstall", prefix)).with_network(NetworkMode::Default),
      )
      .run(
        shlex("ln -svf /bin/bash /bin/sh"),
        RunOptions::new(format!("{}base-symlink", prefix)),
      );

    let checksummer = State::image(DEFAULT_BASE_IMAGE, None)
      .named(format!("{}cksum", prefix))
      .run(
        shlex("apk --no-cache --update add coreutils"),
        RunOptions::new(format!("{}cksum-apkinstall", prefix)).with_network(NetworkMode::Default),
      );

    let local_context = State::local(LOCAL_CONTEXT_NAME, &["**/.*", &format!("**/{}", PKG_YAML)])
      .named(format!("{}context", prefix));

    Self {
      graph,
      options: options.clone(),
      resolver: None,
      cancel: CancelToken::new(),
      alpine_base: prepare_base(alpine, prefix, &vars),
      scratch_base: prepare_base(State::scratch(), prefix, &vars),
      checksummer,
      local_context,
      cache: HashMap::new(),
      in_progress: Vec::new(),
      compiled: 0,
    }
  }

  /// Allow platform-qualified dependencies, resolved through `resolver`.
  pub fn with_resolver(mut self, resolver: Arc<dyn PlatformResolver>) -> Self {
    self.resolver = Some(resolver);
    self
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  fn with_in_progress(mut self, in_progress: Vec<(String, Platform)>) -> Self {
    self.in_progress = in_progress;
    self
  }

  pub fn options(&self) -> &BuildOptions {
    &self.options
  }

  /// Number of packages lowered by this compiler; cache hits don't count.
  pub fn compiled_count(&self) -> usize {
    self.compiled
  }

  pub(super) fn base_for(&self, variant: Variant) -> &State {
    match variant {
      Variant::Alpine => &self.alpine_base,
      Variant::Scratch => &self.scratch_base,
    }
  }

  /// Prepare a promoted dependency the way shared bases are prepared.
  pub(super) fn prepare_promoted(&self, state: State, prefix: &str) -> State {
    prepare_base(state, prefix, &self.options.variables())
  }

  /// Compile the node `id` for the target platform.
  pub fn compile(&mut self, id: NodeId) -> Result<State, CompileError> {
    let graph = self.graph;
    let node = graph.get(id).ok_or_else(|| CompileError::MissingNode {
      name: format!("#{}", id.0),
    })?;
    let key = (node.name.clone(), self.options.target_platform);

    if let Some(state) = self.cache.get(&key) {
      debug!(package = %node.name, platform = %key.1, "cache hit");
      return Ok(state.clone());
    }

    if self.cancel.is_cancelled() {
      return Err(CompileError::Cancelled);
    }

    self.check_cycle(&key)?;
    self.in_progress.push(key.clone());
    let result = self.lower(node);
    self.in_progress.pop();

    let state = result?;
    self.compiled += 1;
    self.cache.insert(key, state.clone());
    Ok(state)
  }

  /// Compile `name` against the registry of `platform`.
  ///
  /// The result of another platform is embedded as an opaque import; the
  /// target platform's result is used as is.
  pub(super) fn compile_for_platform(&mut self, name: &str, platform: Platform) -> Result<State, CompileError> {
    let key = (name.to_string(), platform);

    if let Some(state) = self.cache.get(&key) {
      return Ok(state.clone());
    }

    if self.cancel.is_cancelled() {
      return Err(CompileError::Cancelled);
    }

    self.check_cycle(&key)?;

    let resolver = self.resolver.clone().ok_or_else(|| CompileError::NoPlatformResolver {
      name: name.to_string(),
      platform,
    })?;

    debug!(package = name, %platform, "compiling in platform context");
    let context = resolver.context_for(platform)?;
    let graph = context.packages.resolve(name)?;

    let mut sub = GraphCompiler::new(&graph, &context.options)
      .with_resolver(resolver)
      .with_cancel(self.cancel.clone())
      .with_in_progress(self.in_progress.clone());
    let state = sub.compile(graph.root())?;

    let state = if platform == self.options.target_platform {
      state
    } else {
      State::import(state.marshal(platform)?)
    };

    self.cache.insert(key, state.clone());
    Ok(state)
  }

  fn check_cycle(&self, key: &(String, Platform)) -> Result<(), CompileError> {
    if !self.in_progress.contains(key) {
      return Ok(());
    }

    let chain = self
      .in_progress
      .iter()
      .chain(std::iter::once(key))
      .map(|(name, platform)| format!("{}@{}", name, platform))
      .collect();
    Err(CompileError::PlatformCycle { chain })
  }

  /// Compile the graph root and serialize the result.
  pub fn marshal(&mut self) -> Result<Definition, CompileError> {
    let root = self.compile(self.graph.root())?;
    let definition = root.marshal(self.options.target_platform)?;

    info!(
      target = %self.options.target,
      platform = %self.options.target_platform,
      ops = definition.ops.len(),
      "compiled build graph"
    );
    Ok(definition)
  }
}

/// Create `/pkg`, enter it and export the build variables.
fn prepare_base(state: State, prefix: &str, vars: &Variables) -> State {
  let mut state = state
    .file(
      FileActions::new().mkdir(PKG_DIR, DEFAULT_DIR_MODE, true),
      format!("{}mkdir {}", prefix, PKG_DIR),
    )
    .dir(PKG_DIR);

  for (key, value) in vars.iter() {
    state = state.add_env(key, value);
  }

  state
}

pub(super) fn shlex(command: &str) -> Vec<String> {
  command.split_whitespace().map(str::to_string).collect()
}
