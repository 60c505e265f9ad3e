use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::PackageSet;
use crate::pkg::{Dependency, Package};

/// Index of a node inside a [`PackageGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// A dependency edge, pointing at the resolved node for same-platform stages.
#[derive(Debug, Clone)]
pub struct PackageDependency {
  pub dependency: Dependency,
  /// `None` for images and platform-qualified stages.
  pub node: Option<NodeId>,
}

/// A package together with its resolved dependency edges.
#[derive(Debug, Clone)]
pub struct PackageNode {
  pub name: String,
  pub pkg: Arc<Package>,
  pub depends_on: Vec<PackageDependency>,
}

/// Resolved dependency graph rooted at the resolution target.
///
/// Nodes live in an arena addressed by [`NodeId`]; edges only point from a
/// package to its dependencies, never back.
#[derive(Debug, Clone)]
pub struct PackageGraph {
  nodes: Vec<PackageNode>,
  index: HashMap<String, NodeId>,
  root: NodeId,
}

impl PackageGraph {
  pub(super) fn new(nodes: Vec<PackageNode>, index: HashMap<String, NodeId>, root: NodeId) -> Self {
    Self { nodes, index, root }
  }

  pub fn root(&self) -> NodeId {
    self.root
  }

  pub fn node(&self, id: NodeId) -> &PackageNode {
    &self.nodes[id.0]
  }

  pub fn get(&self, id: NodeId) -> Option<&PackageNode> {
    self.nodes.get(id.0)
  }

  pub fn find(&self, name: &str) -> Option<NodeId> {
    self.index.get(name).copied()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Recursive closure of the `runtime` dependencies of `id`, in first-seen
  /// order, deduplicated by dependency identity key.
  pub fn runtime_dependencies(&self, id: NodeId) -> Vec<&PackageDependency> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    self.collect_runtime(id, &mut seen, &mut out);
    out
  }

  fn collect_runtime<'a>(&'a self, id: NodeId, seen: &mut HashSet<String>, out: &mut Vec<&'a PackageDependency>) {
    for dep in &self.node(id).depends_on {
      if !dep.dependency.runtime || !seen.insert(dep.dependency.identity_key()) {
        continue;
      }

      out.push(dep);

      if let Some(child) = dep.node {
        self.collect_runtime(child, seen, out);
      }
    }
  }

  /// Every node reachable from the root through resolved edges, exactly once,
  /// in depth-first pre-order.
  pub fn to_set(&self) -> PackageSet {
    let mut visited = HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![self.root];

    while let Some(id) = stack.pop() {
      if !visited.insert(id) {
        continue;
      }

      let node = self.node(id);
      out.push(Arc::clone(&node.pkg));

      for dep in node.depends_on.iter().rev() {
        if let Some(child) = dep.node
          && !visited.contains(&child)
        {
          stack.push(child);
        }
      }
    }

    PackageSet::from(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::solver::Packages;

  fn graph() -> PackageGraph {
    Packages::new(vec![
      Package::new("musl"),
      Package::new("base").with_dependency(Dependency::stage("musl").with_runtime()),
      Package::new("lib")
        .with_dependency(Dependency::stage("base").with_runtime())
        .with_dependency(Dependency::image("docker.io/library/golang:1.22").with_to("/go")),
      Package::new("app")
        .with_dependency(Dependency::stage("lib"))
        .with_dependency(Dependency::stage("base").with_runtime()),
    ])
    .unwrap()
    .resolve("app")
    .unwrap()
  }

  #[test]
  fn runtime_closure_is_transitive() {
    let graph = graph();
    let lib = graph.find("lib").unwrap();

    let names: Vec<_> = graph
      .runtime_dependencies(lib)
      .iter()
      .map(|d| d.dependency.name().to_string())
      .collect();

    assert_eq!(names, vec!["base", "musl"]);
  }

  #[test]
  fn runtime_closure_skips_non_runtime_edges() {
    let graph = graph();
    let app = graph.find("app").unwrap();

    let names: Vec<_> = graph
      .runtime_dependencies(app)
      .iter()
      .map(|d| d.dependency.name().to_string())
      .collect();

    // `lib` is not runtime, so only `base` and what it carries
    assert_eq!(names, vec!["base", "musl"]);
  }

  #[test]
  fn to_set_is_preorder_from_root() {
    let graph = graph();
    let names: Vec<_> = graph.to_set().iter().map(|p| p.name.clone()).collect();
    assert_eq!(names, vec!["app", "lib", "base", "musl"]);
  }

  #[test]
  fn find_by_name() {
    let graph = graph();
    assert_eq!(graph.node(graph.root()).name, "app");
    assert!(graph.find("ghost").is_none());
  }
}
