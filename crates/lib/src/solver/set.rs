use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::consts::GRAPH_IGNORE_VAR;
use crate::pkg::Package;

/// A flat list of packages, each appearing once.
#[derive(Debug, Clone, Default)]
pub struct PackageSet(Vec<Arc<Package>>);

/// What a vertex of the exported dependency graph stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DotKind {
  Package,
  Image,
  OsPackage,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DotNode {
  label: String,
  kind: DotKind,
}

impl fmt::Display for DotNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.label)
  }
}

impl From<Vec<Arc<Package>>> for PackageSet {
  fn from(pkgs: Vec<Arc<Package>>) -> Self {
    Self(pkgs)
  }
}

impl PackageSet {
  pub fn iter(&self) -> std::slice::Iter<'_, Arc<Package>> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// The same set ordered by package name.
  pub fn sorted(mut self) -> Self {
    self.0.sort_by(|a, b| a.name.cmp(&b.name));
    self
  }

  /// Drop packages whose variables set `GRAPH_IGNORE=true`.
  pub fn without_graph_ignored(self) -> Self {
    Self(
      self
        .0
        .into_iter()
        .filter(|pkg| pkg.context.get(GRAPH_IGNORE_VAR) != Some("true"))
        .collect(),
    )
  }

  /// Render the dependency graph in Graphviz dot format.
  ///
  /// Edges point from a dependency to its dependent. Images and OS packages
  /// are drawn as filled boxes.
  pub fn to_dot(&self) -> String {
    let mut graph: DiGraph<DotNode, &'static str> = DiGraph::new();
    let mut nodes: HashMap<DotNode, NodeIndex> = HashMap::new();

    let mut vertex = |graph: &mut DiGraph<DotNode, &'static str>, label: &str, kind: DotKind| {
      let key = DotNode {
        label: label.to_string(),
        kind,
      };
      *nodes.entry(key.clone()).or_insert_with(|| graph.add_node(key))
    };

    for pkg in &self.0 {
      let node = vertex(&mut graph, &pkg.name, DotKind::Package);

      for stage in pkg.internal_dependencies() {
        let dep = vertex(&mut graph, stage, DotKind::Package);
        graph.update_edge(dep, node, "");
      }

      for image in pkg.external_dependencies() {
        let dep = vertex(&mut graph, image, DotKind::Image);
        graph.update_edge(dep, node, "");
      }

      for install in &pkg.install {
        let dep = vertex(&mut graph, &format!("Alpine: {}", install), DotKind::OsPackage);
        graph.update_edge(dep, node, "");
      }
    }

    let dot = Dot::with_attr_getters(
      &graph,
      &[Config::EdgeNoLabel],
      &|_, _| String::new(),
      &|_, (_, node)| match node.kind {
        DotKind::Package => String::new(),
        DotKind::Image => "shape = box fillcolor = lemonchiffon style = filled".to_string(),
        DotKind::OsPackage => "shape = box fillcolor = aquamarine style = filled".to_string(),
      },
    );

    dot.to_string()
  }

  /// Write every package as one JSON array.
  pub fn dump_json(&self, writer: impl Write) -> serde_json::Result<()> {
    let pkgs: Vec<&Package> = self.0.iter().map(Arc::as_ref).collect();
    serde_json::to_writer_pretty(writer, &pkgs)
  }
}

impl<'a> IntoIterator for &'a PackageSet {
  type Item = &'a Arc<Package>;
  type IntoIter = std::slice::Iter<'a, Arc<Package>>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}
