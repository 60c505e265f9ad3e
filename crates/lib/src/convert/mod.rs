//! Lowering of resolved package graphs into build graphs.
//!
//! [`GraphCompiler`] walks a [`crate::solver::PackageGraph`] and turns every
//! package into filesystem and process operations, memoizing the result per
//! (package, target platform).

mod graph;
mod node;

use std::sync::Arc;

pub use graph::GraphCompiler;
use thiserror::Error;

use crate::context::{ContextError, PlatformContext};
use crate::platform::Platform;
use crate::solver::ResolveError;

#[derive(Debug, Error)]
pub enum CompileError {
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Context(#[from] ContextError),

  #[error("platform dependency cycle detected: {}", chain.join(" -> "))]
  PlatformCycle { chain: Vec<String> },

  #[error("package {name:?} depends on platform {platform}, but no platform resolver is configured")]
  NoPlatformResolver { name: String, platform: Platform },

  #[error("compilation cancelled")]
  Cancelled,

  #[error("dependency {name:?} was not resolved")]
  MissingNode { name: String },

  #[error("failed to marshal build graph: {0}")]
  Marshal(#[from] serde_json::Error),
}

/// Gives the compiler access to other platforms' packages.
pub trait PlatformResolver: Send + Sync {
  fn context_for(&self, platform: Platform) -> Result<Arc<PlatformContext>, ContextError>;
}
