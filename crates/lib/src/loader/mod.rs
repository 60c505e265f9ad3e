//! Package loading.
//!
//! The resolver only needs a list of expanded, validated packages plus the
//! global variables they were expanded with. [`PackageLoader`] hides where
//! those come from; [`FilesystemLoader`] reads them from a directory tree.

mod expand;
mod filesystem;

use std::path::PathBuf;

pub use expand::{ExpandError, Expander, VarsExpander};
pub use filesystem::FilesystemLoader;
use thiserror::Error;

use crate::errors::ErrorList;
use crate::pkg::{Package, PkgfileError, ValidationError};
use crate::vars::Variables;

/// Everything a loader produced for one variable context.
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
  /// The context after merging global project variables.
  pub vars: Variables,
  pub pkgs: Vec<Package>,
}

/// Supplies packages for a variable context.
pub trait PackageLoader {
  fn load(&self, context: &Variables) -> Result<LoadResult, LoadError>;
}

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("error reading {path:?}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("error parsing {path:?}: {source}")]
  Pkgfile {
    path: PathBuf,
    #[source]
    source: PkgfileError,
  },

  #[error("error walking package tree: {0}")]
  Walk(#[from] walkdir::Error),

  #[error("{0}")]
  Packages(ErrorList<PackageLoadError>),
}

/// Failure to load one `pkg.yaml`.
#[derive(Debug, Error)]
pub enum PackageLoadError {
  #[error("error loading {path:?}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("error loading {path:?}: {source}")]
  Vars {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("error loading {path:?}: {source}")]
  Expand {
    path: PathBuf,
    #[source]
    source: ExpandError,
  },

  #[error("error loading {path:?}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("error loading {path:?}: {errors}")]
  Invalid {
    path: PathBuf,
    errors: ErrorList<ValidationError>,
  },
}

/// A loader serving a fixed list of packages, for callers that already hold
/// them in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
  vars: Variables,
  pkgs: Vec<Package>,
}

impl StaticLoader {
  pub fn new(pkgs: Vec<Package>) -> Self {
    Self {
      vars: Variables::new(),
      pkgs,
    }
  }

  pub fn with_vars(mut self, vars: Variables) -> Self {
    self.vars = vars;
    self
  }
}

impl PackageLoader for StaticLoader {
  fn load(&self, context: &Variables) -> Result<LoadResult, LoadError> {
    let vars = context.clone().merge(&self.vars);
    let pkgs = self
      .pkgs
      .iter()
      .cloned()
      .map(|pkg| {
        let pkg_vars = vars.clone().merge(&pkg.context);
        pkg.with_context(pkg_vars)
      })
      .collect();

    Ok(LoadResult { vars, pkgs })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn static_loader_layers_context_under_package_vars() {
    let pkg = Package::new("base").with_context([("VENDOR", "acme")].into_iter().collect());
    let loader = StaticLoader::new(vec![pkg]).with_vars([("CHANNEL", "stable")].into_iter().collect());

    let context: Variables = [("VENDOR", "pkgsmith"), ("ARCH", "x86_64")].into_iter().collect();
    let result = loader.load(&context).unwrap();

    assert_eq!(result.vars.get("CHANNEL"), Some("stable"));
    assert_eq!(result.pkgs[0].context.get("VENDOR"), Some("acme"));
    assert_eq!(result.pkgs[0].context.get("ARCH"), Some("x86_64"));
  }
}
