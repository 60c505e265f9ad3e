//! Dependency graph resolution.
//!
//! [`Packages`] is the immutable registry of loaded packages. Resolving a
//! target produces a [`PackageGraph`]: an arena of [`PackageNode`]s with
//! edges pointing from a package to the packages it depends on.

mod graph;
mod packages;
mod set;

pub use graph::{NodeId, PackageDependency, PackageGraph, PackageNode};
pub use packages::Packages;
pub use set::PackageSet;
use thiserror::Error;

use crate::loader::LoadError;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error(transparent)]
  Load(#[from] LoadError),

  #[error("package {name:?} already exists, duplicate in dirs {dir:?} and {existing_dir:?}")]
  Duplicate {
    name: String,
    dir: String,
    existing_dir: String,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
  #[error("package {name:?} not defined")]
  PackageNotFound { name: String },

  #[error("circular dependency detected {path:?} -> {name:?}")]
  CircularDependency { path: Vec<String>, name: String },
}
