use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::graph::{NodeId, PackageDependency, PackageGraph, PackageNode};
use super::{PackageSet, RegistryError, ResolveError};
use crate::loader::PackageLoader;
use crate::pkg::Package;
use crate::vars::Variables;

/// Name-keyed collection of packages, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Packages {
  packages: HashMap<String, Arc<Package>>,
}

impl Packages {
  /// Index `pkgs` by name, rejecting duplicates.
  pub fn new(pkgs: impl IntoIterator<Item = Package>) -> Result<Self, RegistryError> {
    let mut packages: HashMap<String, Arc<Package>> = HashMap::new();

    for pkg in pkgs {
      if let Some(existing) = packages.get(&pkg.name) {
        return Err(RegistryError::Duplicate {
          name: pkg.name.clone(),
          dir: pkg.base_dir.clone(),
          existing_dir: existing.base_dir.clone(),
        });
      }
      packages.insert(pkg.name.clone(), Arc::new(pkg));
    }

    Ok(Self { packages })
  }

  /// Load packages for `context` and index them.
  pub fn load(loader: &dyn PackageLoader, context: &Variables) -> Result<Self, RegistryError> {
    let result = loader.load(context)?;
    Self::new(result.pkgs)
  }

  pub fn get(&self, name: &str) -> Option<&Arc<Package>> {
    self.packages.get(name)
  }

  pub fn len(&self) -> usize {
    self.packages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.packages.is_empty()
  }

  /// Every package, sorted by name.
  pub fn to_set(&self) -> PackageSet {
    PackageSet::from(self.packages.values().cloned().collect::<Vec<_>>()).sorted()
  }

  /// Resolve `target` and everything it depends on into a graph.
  ///
  /// Stage dependencies qualified with a platform are not followed: they are
  /// resolved against that platform's registry at compile time.
  pub fn resolve(&self, target: &str) -> Result<PackageGraph, ResolveError> {
    let mut resolver = Resolver {
      packages: self,
      path: Vec::new(),
      nodes: Vec::new(),
      index: HashMap::new(),
    };

    let root = resolver.resolve(target)?;
    debug!(target, nodes = resolver.nodes.len(), "resolved package graph");

    Ok(PackageGraph::new(resolver.nodes, resolver.index, root))
  }
}

struct Resolver<'a> {
  packages: &'a Packages,
  path: Vec<String>,
  nodes: Vec<PackageNode>,
  index: HashMap<String, NodeId>,
}

impl Resolver<'_> {
  fn resolve(&mut self, name: &str) -> Result<NodeId, ResolveError> {
    if let Some(&id) = self.index.get(name) {
      return Ok(id);
    }

    if self.path.iter().any(|p| p == name) {
      return Err(ResolveError::CircularDependency {
        path: self.path.clone(),
        name: name.to_string(),
      });
    }

    let pkg = self
      .packages
      .get(name)
      .cloned()
      .ok_or_else(|| ResolveError::PackageNotFound { name: name.to_string() })?;

    self.path.push(name.to_string());

    let mut depends_on = Vec::with_capacity(pkg.dependencies.len());
    for dependency in &pkg.dependencies {
      let node = match dependency.stage_name() {
        Some(stage) if dependency.platform.is_none() => Some(self.resolve(stage)?),
        _ => None,
      };
      depends_on.push(PackageDependency {
        dependency: dependency.clone(),
        node,
      });
    }

    self.path.pop();

    let id = NodeId(self.nodes.len());
    self.nodes.push(PackageNode {
      name: name.to_string(),
      pkg,
      depends_on,
    });
    self.index.insert(name.to_string(), id);

    debug!(name, id = id.0, "resolved package");
    Ok(id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loader::StaticLoader;
  use crate::pkg::Dependency;
  use crate::platform::LINUX_ARM64;

  fn registry(pkgs: Vec<Package>) -> Packages {
    Packages::new(pkgs).unwrap()
  }

  mod registry {
    use super::*;

    #[test]
    fn rejects_duplicate_names() {
      let err = Packages::new(vec![
        Package::new("base").with_base_dir("a"),
        Package::new("base").with_base_dir("b"),
      ])
      .unwrap_err();

      assert_eq!(
        err.to_string(),
        "package \"base\" already exists, duplicate in dirs \"b\" and \"a\""
      );
    }

    #[test]
    fn loads_through_loader() {
      let loader = StaticLoader::new(vec![Package::new("base"), Package::new("app")]);
      let packages = Packages::load(&loader, &Variables::new()).unwrap();
      assert_eq!(packages.len(), 2);
    }

    #[test]
    fn to_set_is_sorted() {
      let packages = registry(vec![Package::new("zlib"), Package::new("base"), Package::new("musl")]);
      let names: Vec<_> = packages.to_set().iter().map(|p| p.name.clone()).collect();
      assert_eq!(names, vec!["base", "musl", "zlib"]);
    }
  }

  mod resolve {
    use super::*;

    #[test]
    fn shared_dependencies_are_resolved_once() {
      // app -> {lib, tools}, lib -> base, tools -> base, app -> base
      let packages = registry(vec![
        Package::new("base"),
        Package::new("lib").with_dependency(Dependency::stage("base")),
        Package::new("tools").with_dependency(Dependency::stage("base")),
        Package::new("app")
          .with_dependency(Dependency::stage("lib"))
          .with_dependency(Dependency::stage("tools"))
          .with_dependency(Dependency::stage("base").with_to("/sysroot")),
      ]);

      let graph = packages.resolve("app").unwrap();
      let set = graph.to_set();

      let mut names: Vec<_> = set.iter().map(|p| p.name.clone()).collect();
      assert_eq!(names.len(), 4);
      names.sort();
      names.dedup();
      assert_eq!(names, vec!["app", "base", "lib", "tools"]);
      assert_eq!(graph.len(), 4);
    }

    #[test]
    fn cycle_reports_full_path() {
      let packages = registry(vec![
        Package::new("a").with_dependency(Dependency::stage("b")),
        Package::new("b").with_dependency(Dependency::stage("c")),
        Package::new("c").with_dependency(Dependency::stage("a")),
      ]);

      let err = packages.resolve("a").unwrap_err();
      assert_eq!(
        err,
        ResolveError::CircularDependency {
          path: vec!["a".to_string(), "b".to_string(), "c".to_string()],
          name: "a".to_string(),
        }
      );
      assert_eq!(
        err.to_string(),
        "circular dependency detected [\"a\", \"b\", \"c\"] -> \"a\""
      );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
      let packages = registry(vec![Package::new("a").with_dependency(Dependency::stage("a"))]);
      assert!(matches!(
        packages.resolve("a"),
        Err(ResolveError::CircularDependency { .. })
      ));
    }

    #[test]
    fn missing_target_is_not_found() {
      let packages = registry(vec![Package::new("a")]);
      assert_eq!(
        packages.resolve("ghost").unwrap_err(),
        ResolveError::PackageNotFound {
          name: "ghost".to_string()
        }
      );
    }

    #[test]
    fn missing_dependency_is_not_found() {
      let packages = registry(vec![Package::new("a").with_dependency(Dependency::stage("ghost"))]);
      assert_eq!(
        packages.resolve("a").unwrap_err(),
        ResolveError::PackageNotFound {
          name: "ghost".to_string()
        }
      );
    }

    #[test]
    fn external_and_platform_qualified_edges_stay_unresolved() {
      let packages = registry(vec![
        Package::new("app")
          .with_dependency(Dependency::image("docker.io/library/alpine:3.20"))
          .with_dependency(Dependency::stage("cross").with_platform(LINUX_ARM64)),
      ]);

      let graph = packages.resolve("app").unwrap();
      let root = graph.node(graph.root());

      assert_eq!(root.depends_on.len(), 2);
      assert!(root.depends_on.iter().all(|d| d.node.is_none()));
      assert_eq!(graph.len(), 1);
    }
  }
}
