//! Fixtures shared by unit tests: on-disk package trees and lookups into
//! marshaled build graphs.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use crate::llb::{Definition, Op};
use crate::util::hash::ObjectHash;

/// Write `contents` at `rel` under `root`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) {
  let path = root.join(rel);
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  fs::write(path, contents).unwrap();
}

/// A small package tree exercising Pkgfile vars, scoped vars.yaml files,
/// templated files and a hidden directory that must be skipped.
pub fn package_tree() -> TempDir {
  let temp = TempDir::new().unwrap();
  let root = temp.path();

  write_file(root, "Pkgfile", "format: v1alpha2\nvars:\n  CHANNEL: stable\n");
  write_file(root, "vars.yaml", "TOOLS_PREFIX: /toolchain\n");
  write_file(root, "base/pkg.yaml", "name: base\nvariant: scratch\n");
  write_file(
    root,
    "tools/gcc/pkg.yaml",
    "name: gcc\ninstall: [make]\nsteps:\n  - build: ['make PREFIX={{ .TOOLS_PREFIX }}']\nfinalize:\n  - from: /out\n    to: /\n",
  );
  write_file(root, "tools/vars.yaml", "TOOLS_PREFIX: /tools\n");
  write_file(root, "tools/gcc/config.mk.tmpl", "CHANNEL={{ .CHANNEL }}\n");
  write_file(root, ".git/pkg.yaml", "name: hidden\n");

  temp
}

/// The operation labelled `name`; panics when there is none.
pub fn op<'a>(def: &'a Definition, name: &str) -> &'a Op<ObjectHash> {
  def
    .ops
    .values()
    .find(|entry| entry.name.as_deref() == Some(name))
    .map(|entry| &entry.op)
    .unwrap_or_else(|| panic!("no op named {name:?}"))
}

/// Number of operations labelled `name`.
pub fn op_count(def: &Definition, name: &str) -> usize {
  def
    .ops
    .values()
    .filter(|entry| entry.name.as_deref() == Some(name))
    .count()
}

/// Digest of the operation labelled `name`; panics when there is none.
pub fn digest_of(def: &Definition, name: &str) -> ObjectHash {
  def
    .ops
    .iter()
    .find(|(_, entry)| entry.name.as_deref() == Some(name))
    .map(|(digest, _)| digest.clone())
    .unwrap_or_else(|| panic!("no op named {name:?}"))
}
