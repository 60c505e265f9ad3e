//! Low-level build graph.
//!
//! The compiler lowers packages into a DAG of filesystem and process
//! operations. [`State`] is the builder handle used while lowering; a
//! finished graph is marshaled into a [`Definition`], where every operation
//! is keyed by the SHA-256 digest of its JSON encoding so identical
//! operations collapse into one.

mod ops;
mod state;

use std::collections::{BTreeMap, BTreeSet};

pub use ops::{CacheMount, CacheSharing, Chown, CopyOptions, ExecOp, FileAction, Op, Vertex};
use serde::{Deserialize, Serialize};
pub use state::{FileActions, RunOptions, State};

use crate::platform::Platform;
use crate::util::hash::ObjectHash;

/// An operation together with its progress label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpEntry {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub op: Op<ObjectHash>,
}

/// A marshaled build graph handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
  pub platform: Platform,
  pub root: ObjectHash,
  pub ops: BTreeMap<ObjectHash, OpEntry>,
}

impl Definition {
  pub fn get(&self, digest: &ObjectHash) -> Option<&OpEntry> {
    self.ops.get(digest)
  }

  pub fn root_entry(&self) -> Option<&OpEntry> {
    self.ops.get(&self.root)
  }

  /// Operations whose name matches `predicate`, in digest order.
  pub fn find<'a>(&'a self, predicate: impl Fn(&str) -> bool + 'a) -> impl Iterator<Item = &'a OpEntry> + 'a {
    self
      .ops
      .values()
      .filter(move |entry| entry.name.as_deref().is_some_and(&predicate))
  }

  /// Every digest reachable from `start`, including `start`.
  pub fn reachable(&self, start: &ObjectHash) -> BTreeSet<ObjectHash> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![start.clone()];

    while let Some(digest) = stack.pop() {
      if !seen.insert(digest.clone()) {
        continue;
      }
      if let Some(entry) = self.ops.get(&digest) {
        stack.extend(entry.op.inputs().into_iter().cloned());
      }
    }

    seen
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string_pretty(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::LINUX_ARM64;

  #[test]
  fn definition_round_trips_through_json() {
    let state = State::image("docker.io/alpine:3.20", Some(&LINUX_ARM64))
      .file(FileActions::new().mkdir("/pkg", 0o755, false), "mkdir /pkg")
      .dir("/pkg")
      .run(vec!["true".to_string()], RunOptions::new("noop"));

    let def = state.marshal(LINUX_ARM64).unwrap();
    let decoded: Definition = serde_json::from_str(&def.to_json().unwrap()).unwrap();
    assert_eq!(decoded, def);
    assert_eq!(decoded.reachable(&decoded.root).len(), 3);
  }

  #[test]
  fn import_embeds_sub_definition() {
    let inner = State::image("docker.io/alpine:3.20", None).marshal(LINUX_ARM64).unwrap();
    let outer = State::import(inner.clone())
      .marshal(crate::platform::LINUX_AMD64)
      .unwrap();

    let Op::Import { platform, definition } = &outer.root_entry().unwrap().op else {
      panic!("root is not an import");
    };
    assert_eq!(platform, "linux/arm64");
    assert_eq!(**definition, inner);
  }

  #[test]
  fn find_matches_names() {
    let state = State::scratch()
      .file(FileActions::new().mkdir("/a", 0o755, false), "app:mkdir /a")
      .file(FileActions::new().mkdir("/b", 0o755, false), "lib:mkdir /b");

    let def = state.marshal(LINUX_ARM64).unwrap();
    assert_eq!(def.find(|n| n.starts_with("app:")).count(), 1);
  }
}
