use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Definition;
use crate::options::ProxyEnv;
use crate::pkg::NetworkMode;
use crate::util::hash::Hashable;

/// One operation of the build graph.
///
/// `I` is how inputs are referenced: [`Arc<Vertex>`] while the graph is being
/// built, [`crate::util::hash::ObjectHash`] once it is marshaled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op<I> {
  /// Empty filesystem.
  Scratch,
  /// Filesystem of a container image.
  Image {
    reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    platform: Option<String>,
  },
  /// Directory handed over by the client running the build.
  Local {
    name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    exclude: Vec<String>,
  },
  /// A single downloaded file, verified against `checksum`.
  Http {
    url: String,
    filename: String,
    checksum: String,
  },
  /// Filesystem actions applied in order on top of `input`.
  File { input: I, actions: Vec<FileAction<I>> },
  /// A process run on top of `input`; its output is the mutated root.
  Exec(ExecOp<I>),
  /// Union of every input, later inputs winning on conflicts.
  Merge { inputs: Vec<I> },
  /// Result of a build compiled for another platform.
  Import { platform: String, definition: Box<Definition> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileAction<I> {
  Mkdir {
    path: String,
    mode: u32,
    make_parents: bool,
  },
  Mkfile {
    path: String,
    mode: u32,
    data: String,
  },
  Copy {
    from: I,
    src: String,
    dest: String,
    options: CopyOptions,
  },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CopyOptions {
  pub contents_only: bool,
  pub create_dest_path: bool,
  pub follow_symlinks: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub chown: Option<Chown>,
  /// Modification time forced on every copied file, in seconds since the epoch.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_time: Option<i64>,
}

impl CopyOptions {
  /// Copy directory contents, creating the destination and following links.
  pub fn standard() -> Self {
    Self {
      contents_only: true,
      create_dest_path: true,
      follow_symlinks: true,
      chown: None,
      created_time: None,
    }
  }

  pub fn with_chown(mut self, user: u32, group: u32) -> Self {
    self.chown = Some(Chown { user, group });
    self
  }

  pub fn with_created_time(mut self, created_time: Option<i64>) -> Self {
    self.created_time = created_time;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chown {
  pub user: u32,
  pub group: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOp<I> {
  pub input: I,
  pub args: Vec<String>,
  /// `KEY=VALUE` pairs sorted by key.
  pub env: Vec<String>,
  pub cwd: String,
  pub network: NetworkMode,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub mounts: Vec<CacheMount>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub proxy: Option<ProxyEnv>,
}

/// A persistent cache directory mounted into an exec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheMount {
  pub target: String,
  pub id: String,
  pub sharing: CacheSharing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSharing {
  Shared,
  Private,
  #[default]
  Locked,
}

/// A node of the graph under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
  pub op: Op<Arc<Vertex>>,
  /// Human-readable label for progress output; not part of the digest.
  pub name: Option<String>,
}

impl Hashable for Op<crate::util::hash::ObjectHash> {}

impl<I> Op<I> {
  /// Every input reference, in order.
  pub fn inputs(&self) -> Vec<&I> {
    match self {
      Op::Scratch | Op::Image { .. } | Op::Local { .. } | Op::Http { .. } | Op::Import { .. } => Vec::new(),
      Op::File { input, actions } => {
        let mut inputs = vec![input];
        for action in actions {
          if let FileAction::Copy { from, .. } = action {
            inputs.push(from);
          }
        }
        inputs
      }
      Op::Exec(exec) => vec![&exec.input],
      Op::Merge { inputs } => inputs.iter().collect(),
    }
  }

  /// The same operation with every input reference converted by `f`.
  pub fn try_map_inputs<J, E>(&self, mut f: impl FnMut(&I) -> Result<J, E>) -> Result<Op<J>, E> {
    Ok(match self {
      Op::Scratch => Op::Scratch,
      Op::Image { reference, platform } => Op::Image {
        reference: reference.clone(),
        platform: platform.clone(),
      },
      Op::Local { name, exclude } => Op::Local {
        name: name.clone(),
        exclude: exclude.clone(),
      },
      Op::Http { url, filename, checksum } => Op::Http {
        url: url.clone(),
        filename: filename.clone(),
        checksum: checksum.clone(),
      },
      Op::File { input, actions } => {
        let input = f(input)?;
        let mut mapped = Vec::with_capacity(actions.len());
        for action in actions {
          mapped.push(match action {
            FileAction::Mkdir {
              path,
              mode,
              make_parents,
            } => FileAction::Mkdir {
              path: path.clone(),
              mode: *mode,
              make_parents: *make_parents,
            },
            FileAction::Mkfile { path, mode, data } => FileAction::Mkfile {
              path: path.clone(),
              mode: *mode,
              data: data.clone(),
            },
            FileAction::Copy {
              from,
              src,
              dest,
              options,
            } => FileAction::Copy {
              from: f(from)?,
              src: src.clone(),
              dest: dest.clone(),
              options: options.clone(),
            },
          });
        }
        Op::File { input, actions: mapped }
      }
      Op::Exec(exec) => Op::Exec(ExecOp {
        input: f(&exec.input)?,
        args: exec.args.clone(),
        env: exec.env.clone(),
        cwd: exec.cwd.clone(),
        network: exec.network,
        mounts: exec.mounts.clone(),
        proxy: exec.proxy.clone(),
      }),
      Op::Merge { inputs } => Op::Merge {
        inputs: inputs.iter().map(&mut f).collect::<Result<_, _>>()?,
      },
      Op::Import { platform, definition } => Op::Import {
        platform: platform.clone(),
        definition: definition.clone(),
      },
    })
  }
}
