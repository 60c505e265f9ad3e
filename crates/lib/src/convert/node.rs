use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, warn};

use super::graph::shlex;
use super::{CompileError, GraphCompiler};
use crate::consts::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, PKG_DIR};
use crate::llb::{CacheMount, CacheSharing, CopyOptions, FileActions, RunOptions, State};
use crate::pkg::{DependencyRef, Instruction, NetworkMode, Package, Step, Variant};
use crate::sbom;
use crate::solver::{PackageDependency, PackageNode};

/// Directory created by the test branch; only its (empty) contents reach
/// the package root.
const TEST_SENTINEL: &str = "/.pkgsmith-test";

impl<'g> GraphCompiler<'g> {
  pub(super) fn lower(&mut self, node: &'g PackageNode) -> Result<State, CompileError> {
    let pkg = &node.pkg;
    let prefix = format!("{}{}:", self.options.common_prefix, node.name);
    debug!(package = %node.name, variant = %pkg.variant, "lowering package");

    let deps = self.collect_dependencies(node);
    let mut deps = deps.as_slice();

    let base = match deps.first() {
      Some(first) if pkg.variant == Variant::Scratch && first.dependency.is_root_copy() => {
        debug!(package = %node.name, base = first.dependency.name(), "promoting dependency to base");
        let state = self.dependency_state(first)?;
        deps = &deps[1..];
        self.prepare_promoted(state, &prefix)
      }
      _ => self.base_for(pkg.variant).clone(),
    };

    let mut layers = vec![base];
    for dep in deps {
      let state = self.dependency_state(dep)?;
      let dependency = &dep.dependency;

      if dependency.is_root_copy() {
        layers.push(state);
        continue;
      }

      let (src, dest) = (dependency.src(), dependency.dest());
      layers.push(State::scratch().file(
        FileActions::new().copy(&state, src, dest, CopyOptions::standard()),
        format!("{}copy --from {} {} -> {}", prefix, dependency.name(), src, dest),
      ));
    }
    let mut root = State::merge(&layers, format!("{}merge dependencies", prefix));

    if !pkg.install.is_empty() {
      let mut args = shlex("/sbin/apk add --no-cache");
      args.extend(pkg.install.iter().cloned());
      root = root.run(
        args,
        RunOptions::new(format!("{}apk-install", prefix)).with_network(NetworkMode::Default),
      );
    }

    root = self.inject_context(root, pkg, &prefix);

    for (index, step) in pkg.steps.iter().enumerate() {
      root = self.lower_step(root, pkg, step, index, &prefix);
    }

    Ok(self.finalize(&root, pkg, &prefix))
  }

  /// Direct dependencies, each followed by the runtime closure of the
  /// resolved ones, deduplicated by identity key in first-seen order.
  fn collect_dependencies(&self, node: &'g PackageNode) -> Vec<&'g PackageDependency> {
    let graph = self.graph;
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for dep in &node.depends_on {
      let closure = dep.node.map(|id| graph.runtime_dependencies(id)).unwrap_or_default();

      for candidate in std::iter::once(dep).chain(closure) {
        if seen.insert(candidate.dependency.identity_key()) {
          out.push(candidate);
        }
      }
    }

    out
  }

  fn dependency_state(&mut self, dep: &PackageDependency) -> Result<State, CompileError> {
    let dependency = &dep.dependency;

    match (&dependency.reference, dep.node, dependency.platform) {
      (DependencyRef::Image(reference), _, platform) => Ok(State::image(reference, platform.as_ref())),
      (DependencyRef::Stage(_), Some(id), _) => self.compile(id),
      (DependencyRef::Stage(name), None, Some(platform)) => self.compile_for_platform(name, platform),
      (DependencyRef::Stage(name), None, None) => Err(CompileError::MissingNode { name: name.clone() }),
    }
  }

  /// Copy the package directory and its templated files into `/pkg`.
  fn inject_context(&self, root: State, pkg: &Package, prefix: &str) -> State {
    let src = format!("/{}", pkg.base_dir.trim_start_matches('/'));
    let mut root = root.file(
      FileActions::new().copy(&self.local_context, &src, PKG_DIR, CopyOptions::standard()),
      format!("{}context {} -> {}", prefix, src, PKG_DIR),
    );

    if !pkg.templated_files.is_empty() {
      let actions = pkg.templated_files.iter().fold(FileActions::new(), |actions, file| {
        actions.mkfile(
          &format!("{}/{}", PKG_DIR, file.path),
          DEFAULT_FILE_MODE,
          file.content.clone(),
        )
      });
      root = root.file(actions, format!("{}templated files", prefix));
    }

    root
  }

  fn lower_step(&self, root: State, pkg: &Package, step: &Step, index: usize, prefix: &str) -> State {
    let tmp_dir = step.tmp_dir(index);
    let mut root = root
      .file(
        FileActions::new().mkdir(&tmp_dir, DEFAULT_DIR_MODE, true),
        format!("{}mkdir {}", prefix, tmp_dir),
      )
      .dir(&tmp_dir);

    if !step.sources.is_empty() {
      root = self.fetch_sources(root, step, &tmp_dir, prefix);
    }

    for (key, value) in &step.env {
      root = root.add_env(key, value);
    }

    let shell = pkg.shell.get();
    let mounts = self.cache_mounts(step);
    let run = |state: State, instruction: &Instruction, name: String| {
      state.run(
        vec![shell.to_string(), "-c".to_string(), instruction.script()],
        RunOptions::new(name)
          .with_network(step.network)
          .with_mounts(mounts.clone())
          .with_proxy(self.options.proxy.clone()),
      )
    };

    for (phase, instructions) in step.persistent_phases() {
      for instruction in instructions {
        root = run(root, instruction, format!("{}{}-{}", prefix, phase, index));
      }
    }

    if !step.test.is_empty() {
      let mut branch = root.clone();
      for instruction in &step.test {
        branch = run(branch, instruction, format!("{}test-{}", prefix, index));
      }

      let sentinel = branch.file(
        FileActions::new().mkdir(TEST_SENTINEL, DEFAULT_DIR_MODE, true),
        format!("{}test-{} sentinel", prefix, index),
      );
      let result = State::scratch().file(
        FileActions::new().copy(&sentinel, TEST_SENTINEL, "/", CopyOptions::standard()),
        format!("{}test-{} result", prefix, index),
      );
      root = State::merge(&[root, result], format!("{}test-{} merge", prefix, index));
    }

    if let Some(meta) = step.sbom.as_ref().filter(|s| !s.output_path.is_empty()) {
      match sbom::render(meta, self.options.source_date_epoch) {
        Ok(document) => {
          let path = if meta.output_path.starts_with('/') {
            meta.output_path.clone()
          } else {
            format!("{}/{}", root.get_dir().trim_end_matches('/'), meta.output_path)
          };

          let mut actions = FileActions::new();
          if let Some(parent) = Path::new(&path).parent().and_then(|p| p.to_str()).filter(|p| *p != "/") {
            actions = actions.mkdir(parent, DEFAULT_DIR_MODE, true);
          }
          root = root.file(
            actions.mkfile(&path, DEFAULT_FILE_MODE, document),
            format!("{}sbom {}", prefix, path),
          );
        }
        Err(err) => warn!(package = %pkg.name, step = index, error = %err, "skipping SBOM generation"),
      }
    }

    root
  }

  /// Download every source into the working directory, each verified by a
  /// checksummer branch whose empty output is merged alongside.
  fn fetch_sources(&self, root: State, step: &Step, tmp_dir: &str, prefix: &str) -> State {
    let mut downloads = Vec::with_capacity(step.sources.len());
    let mut verified = Vec::with_capacity(step.sources.len());

    for source in &step.sources {
      let destination = source.destination.trim_start_matches('/');
      let filename = format!("/{}", destination);

      let download = State::http(&source.url, &filename, &source.sha256)
        .named(format!("{}download {} -> {}", prefix, source.url, destination));

      let checked = self
        .checksummer
        .file(
          FileActions::new()
            .mkfile("/checksums", DEFAULT_FILE_MODE, source.to_sha512_sum())
            .copy(&download, &filename, &filename, CopyOptions::standard())
            .mkdir("/empty", DEFAULT_DIR_MODE, false),
          format!("{}cksum-prepare", prefix),
        )
        .run(
          shlex("sha512sum -c --strict /checksums"),
          RunOptions::new(format!("{}cksum-verify", prefix)),
        );

      let target = format!("{}/{}", tmp_dir.trim_end_matches('/'), destination);
      downloads.push(State::scratch().file(
        FileActions::new().copy(&download, &filename, &target, CopyOptions::standard()),
        format!("{}copy {} -> {}", prefix, filename, target),
      ));
      verified.push(State::scratch().file(
        FileActions::new().copy(&checked, "/empty", "/", CopyOptions::standard()),
        format!("{}cksum-result", prefix),
      ));
    }

    let layers: Vec<State> = std::iter::once(root).chain(downloads).chain(verified).collect();
    State::merge(&layers, format!("{}download finalize", prefix))
  }

  fn cache_mounts(&self, step: &Step) -> Vec<CacheMount> {
    let namespace = &self.options.cache_namespace;

    step
      .cache_paths
      .iter()
      .map(|path| CacheMount {
        target: path.clone(),
        id: if namespace.is_empty() {
          path.clone()
        } else {
          format!("{}:{}", namespace, path)
        },
        sharing: CacheSharing::Locked,
      })
      .collect()
  }

  fn finalize(&self, root: &State, pkg: &Package, prefix: &str) -> State {
    let created = self.options.source_date_epoch_secs();

    let layers: Vec<State> = pkg
      .finalize
      .iter()
      .map(|rule| {
        State::scratch().file(
          FileActions::new().copy(
            root,
            &rule.from,
            &rule.to,
            CopyOptions::standard().with_chown(0, 0).with_created_time(created),
          ),
          format!("{}finalize {} -> {}", prefix, rule.from, rule.to),
        )
      })
      .collect();

    State::merge(&layers, format!("{}finalize", prefix))
  }
}
