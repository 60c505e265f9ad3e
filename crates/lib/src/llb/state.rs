use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::Definition;
use super::ops::{CacheMount, CopyOptions, ExecOp, FileAction, Op, Vertex};
use crate::options::ProxyEnv;
use crate::pkg::NetworkMode;
use crate::platform::Platform;
use crate::util::hash::{HashError, Hashable, ObjectHash};

/// A filesystem produced by the graph, plus the environment and working
/// directory later execs inherit.
///
/// States are immutable: every method returns a new state sharing the
/// existing graph.
#[derive(Debug, Clone)]
pub struct State {
  vertex: Arc<Vertex>,
  env: BTreeMap<String, String>,
  dir: String,
}

/// Filesystem actions applied together by [`State::file`].
#[derive(Debug, Clone, Default)]
pub struct FileActions(Vec<FileAction<Arc<Vertex>>>);

/// Settings of a single [`State::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  pub name: String,
  pub network: NetworkMode,
  pub mounts: Vec<CacheMount>,
  pub proxy: Option<ProxyEnv>,
}

impl FileActions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn mkdir(mut self, path: &str, mode: u32, make_parents: bool) -> Self {
    self.0.push(FileAction::Mkdir {
      path: path.to_string(),
      mode,
      make_parents,
    });
    self
  }

  pub fn mkfile(mut self, path: &str, mode: u32, data: impl Into<String>) -> Self {
    self.0.push(FileAction::Mkfile {
      path: path.to_string(),
      mode,
      data: data.into(),
    });
    self
  }

  pub fn copy(mut self, from: &State, src: &str, dest: &str, options: CopyOptions) -> Self {
    self.0.push(FileAction::Copy {
      from: Arc::clone(&from.vertex),
      src: src.to_string(),
      dest: dest.to_string(),
      options,
    });
    self
  }
}

impl RunOptions {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  pub fn with_network(mut self, network: NetworkMode) -> Self {
    self.network = network;
    self
  }

  pub fn with_mounts(mut self, mounts: Vec<CacheMount>) -> Self {
    self.mounts = mounts;
    self
  }

  pub fn with_proxy(mut self, proxy: Option<ProxyEnv>) -> Self {
    self.proxy = proxy;
    self
  }
}

impl State {
  fn from_op(op: Op<Arc<Vertex>>, name: Option<String>) -> Self {
    Self {
      vertex: Arc::new(Vertex { op, name }),
      env: BTreeMap::new(),
      dir: "/".to_string(),
    }
  }

  fn derive(&self, op: Op<Arc<Vertex>>, name: String) -> Self {
    Self {
      vertex: Arc::new(Vertex { op, name: Some(name) }),
      env: self.env.clone(),
      dir: self.dir.clone(),
    }
  }

  pub fn scratch() -> Self {
    Self::from_op(Op::Scratch, None)
  }

  pub fn image(reference: &str, platform: Option<&Platform>) -> Self {
    Self::from_op(
      Op::Image {
        reference: reference.to_string(),
        platform: platform.map(Platform::oci),
      },
      None,
    )
  }

  pub fn local(name: &str, exclude: &[&str]) -> Self {
    Self::from_op(
      Op::Local {
        name: name.to_string(),
        exclude: exclude.iter().map(|s| s.to_string()).collect(),
      },
      None,
    )
  }

  /// Download `url` as `filename`, pinned to `sha256`.
  pub fn http(url: &str, filename: &str, sha256: &str) -> Self {
    Self::from_op(
      Op::Http {
        url: url.to_string(),
        filename: filename.to_string(),
        checksum: format!("sha256:{}", sha256),
      },
      None,
    )
  }

  /// Embed a build compiled for another platform.
  pub fn import(definition: Definition) -> Self {
    Self::from_op(
      Op::Import {
        platform: definition.platform.id.to_string(),
        definition: Box::new(definition),
      },
      None,
    )
  }

  /// Union of `states`. Environment and working directory come from the first
  /// state; a single state is returned unchanged.
  pub fn merge(states: &[State], name: impl Into<String>) -> Self {
    match states {
      [] => Self::scratch(),
      [only] => only.clone(),
      [first, ..] => first.derive(
        Op::Merge {
          inputs: states.iter().map(|s| Arc::clone(&s.vertex)).collect(),
        },
        name.into(),
      ),
    }
  }

  /// Label the operation producing this state.
  pub fn named(mut self, name: impl Into<String>) -> Self {
    Arc::make_mut(&mut self.vertex).name = Some(name.into());
    self
  }

  pub fn file(&self, actions: FileActions, name: impl Into<String>) -> Self {
    self.derive(
      Op::File {
        input: Arc::clone(&self.vertex),
        actions: actions.0,
      },
      name.into(),
    )
  }

  /// Run `args` in this state's environment and working directory.
  pub fn run(&self, args: Vec<String>, options: RunOptions) -> Self {
    let env = self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

    self.derive(
      Op::Exec(ExecOp {
        input: Arc::clone(&self.vertex),
        args,
        env,
        cwd: self.dir.clone(),
        network: options.network,
        mounts: options.mounts,
        proxy: options.proxy,
      }),
      options.name,
    )
  }

  pub fn add_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  /// Change the working directory; relative paths resolve against the
  /// current one.
  pub fn dir(mut self, dir: &str) -> Self {
    self.dir = if dir.starts_with('/') {
      dir.to_string()
    } else {
      format!("{}/{}", self.dir.trim_end_matches('/'), dir)
    };
    self
  }

  pub fn env(&self) -> &BTreeMap<String, String> {
    &self.env
  }

  pub fn get_dir(&self) -> &str {
    &self.dir
  }

  pub fn vertex(&self) -> &Arc<Vertex> {
    &self.vertex
  }

  /// Serialize the graph reachable from this state.
  pub fn marshal(&self, platform: Platform) -> Result<Definition, HashError> {
    let mut marshaler = Marshaler::default();
    let root = marshaler.visit(&self.vertex)?;

    Ok(Definition {
      platform,
      root,
      ops: marshaler.ops,
    })
  }
}

#[derive(Default)]
struct Marshaler {
  ops: BTreeMap<ObjectHash, super::OpEntry>,
  seen: HashMap<*const Vertex, ObjectHash>,
}

impl Marshaler {
  fn visit(&mut self, vertex: &Arc<Vertex>) -> Result<ObjectHash, HashError> {
    let key = Arc::as_ptr(vertex);
    if let Some(digest) = self.seen.get(&key) {
      return Ok(digest.clone());
    }

    let op = vertex.op.try_map_inputs(|input| self.visit(input))?;
    let digest = op.compute_hash()?;

    self.ops.entry(digest.clone()).or_insert_with(|| super::OpEntry {
      name: vertex.name.clone(),
      op,
    });
    self.seen.insert(key, digest.clone());

    Ok(digest)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::LINUX_AMD64;

  #[test]
  fn run_captures_env_and_dir() {
    let state = State::scratch()
      .add_env("B", "2")
      .add_env("A", "1")
      .dir("/pkg")
      .run(vec!["make".to_string()], RunOptions::new("build"));

    let def = state.marshal(LINUX_AMD64).unwrap();
    let Op::Exec(exec) = &def.ops[&def.root].op else {
      panic!("root is not an exec");
    };
    assert_eq!(exec.env, vec!["A=1", "B=2"]);
    assert_eq!(exec.cwd, "/pkg");
    assert_eq!(exec.network, NetworkMode::None);
  }

  #[test]
  fn dir_resolves_relative_paths() {
    let state = State::scratch().dir("/tmp").dir("build");
    assert_eq!(state.get_dir(), "/tmp/build");
  }

  #[test]
  fn shared_vertices_marshal_once() {
    let base = State::image("docker.io/alpine:3.20", None);
    let a = base.run(vec!["a".to_string()], RunOptions::new("a"));
    let b = base.run(vec!["b".to_string()], RunOptions::new("b"));
    let merged = State::merge(&[a, b], "merge");

    let def = merged.marshal(LINUX_AMD64).unwrap();
    // image, two execs, merge
    assert_eq!(def.ops.len(), 4);
  }

  #[test]
  fn identical_subgraphs_collapse() {
    let one = State::scratch().file(FileActions::new().mkdir("/pkg", 0o755, false), "mkdir");
    let two = State::scratch().file(FileActions::new().mkdir("/pkg", 0o755, false), "mkdir again");
    let merged = State::merge(&[one, two], "merge");

    let def = merged.marshal(LINUX_AMD64).unwrap();
    // scratch, mkdir, merge
    assert_eq!(def.ops.len(), 3);
  }

  #[test]
  fn merge_of_single_state_is_identity() {
    let state = State::image("docker.io/alpine:3.20", None).add_env("K", "V");
    let merged = State::merge(std::slice::from_ref(&state), "merge");
    assert!(Arc::ptr_eq(merged.vertex(), state.vertex()));
    assert_eq!(merged.env().get("K").map(String::as_str), Some("V"));
  }

  #[test]
  fn http_pins_sha256() {
    let def = State::http("https://example.com/a.tar.gz", "/a.tar.gz", "abc")
      .marshal(LINUX_AMD64)
      .unwrap();
    let Op::Http { checksum, .. } = &def.ops[&def.root].op else {
      panic!("root is not http");
    };
    assert_eq!(checksum, "sha256:abc");
  }
}
