//! Variable contexts used for manifest expansion and build environments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A set of variables, ordered by name so that anything derived from it is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, String>);

impl Variables {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.0.insert(key.into(), value.into());
  }

  /// Merge `other` into `self`, overwriting existing keys, and return `self`
  /// for chaining.
  pub fn merge(mut self, other: &Variables) -> Self {
    self.merge_in_place(other);
    self
  }

  pub fn merge_in_place(&mut self, other: &Variables) {
    for (key, value) in &other.0 {
      self.0.insert(key.clone(), value.clone());
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn merge_overwrites_existing_keys() {
    let base: Variables = [("ARCH", "x86_64"), ("VENDOR", "acme")].into_iter().collect();
    let other: Variables = [("ARCH", "aarch64")].into_iter().collect();

    let merged = base.merge(&other);

    assert_eq!(merged.get("ARCH"), Some("aarch64"));
    assert_eq!(merged.get("VENDOR"), Some("acme"));
  }

  #[test]
  fn iteration_is_sorted_by_key() {
    let vars: Variables = [("B", "2"), ("A", "1"), ("C", "3")].into_iter().collect();
    let keys: Vec<_> = vars.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["A", "B", "C"]);
  }
}
