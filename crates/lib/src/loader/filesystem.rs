use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use super::{Expander, LoadError, LoadResult, PackageLoadError, PackageLoader, VarsExpander};
use crate::consts::{PKG_YAML, PKGFILE, TEMPLATE_EXT, VARS_YAML};
use crate::errors::ErrorList;
use crate::pkg::{Package, Pkgfile, PkgManifest, TemplatedFile};
use crate::vars::Variables;

/// Loads packages from a directory tree.
///
/// Layout:
/// - `<root>/Pkgfile`: optional, declares the format and global variables
/// - `**/vars.yaml`: variables scoped to that directory and its descendants
/// - `**/pkg.yaml`: one package per directory
/// - `**/*.tmpl` next to a `pkg.yaml`: expanded and attached to that package
///
/// Hidden directories are skipped.
pub struct FilesystemLoader {
  root: PathBuf,
  expander: Box<dyn Expander>,
}

impl FilesystemLoader {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      expander: Box::new(VarsExpander),
    }
  }

  pub fn with_expander(mut self, expander: impl Expander + 'static) -> Self {
    self.expander = Box::new(expander);
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn load_pkgfile(&self) -> Result<Option<Pkgfile>, LoadError> {
    let path = self.root.join(PKGFILE);

    let text = match fs::read_to_string(&path) {
      Ok(text) => text,
      Err(err) if err.kind() == ErrorKind::NotFound => {
        debug!(path = %path.display(), "no Pkgfile, using defaults");
        return Ok(None);
      }
      Err(source) => return Err(LoadError::Io { path, source }),
    };

    let pkgfile = Pkgfile::parse(&text).map_err(|source| LoadError::Pkgfile { path, source })?;
    Ok(Some(pkgfile))
  }

  fn load_package(&self, manifest_path: &Path, vars: &Variables) -> Result<Package, PackageLoadError> {
    let text = fs::read_to_string(manifest_path).map_err(|source| PackageLoadError::Read {
      path: manifest_path.to_path_buf(),
      source,
    })?;

    let expanded = self
      .expander
      .expand(PKG_YAML, &text, vars)
      .map_err(|source| PackageLoadError::Expand {
        path: manifest_path.to_path_buf(),
        source,
      })?;

    let manifest = PkgManifest::from_yaml(&expanded).map_err(|source| PackageLoadError::Parse {
      path: manifest_path.to_path_buf(),
      source,
    })?;

    let dir = manifest_path.parent().unwrap_or(&self.root);
    let base_dir = relative_dir(&self.root, dir);

    let mut pkg =
      Package::from_manifest(manifest, &base_dir, vars.clone()).map_err(|errors| PackageLoadError::Invalid {
        path: manifest_path.to_path_buf(),
        errors,
      })?;

    pkg.templated_files = self.load_templated_files(dir, vars)?;
    Ok(pkg)
  }

  /// Expand every `*.tmpl` file of a package directory, sorted by name.
  fn load_templated_files(&self, dir: &Path, vars: &Variables) -> Result<Vec<TemplatedFile>, PackageLoadError> {
    let read_err = |source| PackageLoadError::Read {
      path: dir.to_path_buf(),
      source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
      let entry = entry.map_err(read_err)?;
      let name = entry.file_name().to_string_lossy().to_string();
      if name.ends_with(TEMPLATE_EXT) && entry.file_type().map_err(read_err)?.is_file() {
        names.push(name);
      }
    }
    names.sort();

    let mut files = Vec::with_capacity(names.len());
    for name in names {
      let path = dir.join(&name);
      let text = fs::read_to_string(&path).map_err(|source| PackageLoadError::Read {
        path: path.clone(),
        source,
      })?;
      let content = self
        .expander
        .expand(&name, &text, vars)
        .map_err(|source| PackageLoadError::Expand { path, source })?;

      files.push(TemplatedFile {
        path: name.trim_end_matches(TEMPLATE_EXT).to_string(),
        content,
      });
    }

    Ok(files)
  }
}

impl PackageLoader for FilesystemLoader {
  fn load(&self, context: &Variables) -> Result<LoadResult, LoadError> {
    let mut vars = context.clone();
    if let Some(pkgfile) = self.load_pkgfile()? {
      vars.merge_in_place(&pkgfile.vars);
      info!(path = %self.root.join(PKGFILE).display(), "loaded Pkgfile");
    }

    let mut scoped: HashMap<PathBuf, Variables> = HashMap::new();
    let mut pkgs = Vec::new();
    let mut errors = ErrorList::new();

    let walker = WalkDir::new(&self.root)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| e.depth() == 0 || !is_hidden_dir(e));

    for entry in walker {
      let entry = entry?;
      let path = entry.path();

      if entry.file_type().is_dir() {
        let parent_vars = path
          .parent()
          .and_then(|parent| scoped.get(parent))
          .cloned()
          .filter(|_| entry.depth() > 0)
          .unwrap_or_else(|| vars.clone());

        let dir_vars = match load_vars_file(&path.join(VARS_YAML)) {
          Ok(Some(local)) => parent_vars.merge(&local),
          Ok(None) => parent_vars,
          Err(err) => {
            errors.push(err);
            parent_vars
          }
        };

        scoped.insert(path.to_path_buf(), dir_vars);
        continue;
      }

      if entry.file_name() != PKG_YAML {
        continue;
      }

      let dir_vars = path
        .parent()
        .and_then(|dir| scoped.get(dir))
        .unwrap_or(&vars);

      match self.load_package(path, dir_vars) {
        Ok(pkg) => {
          debug!(name = %pkg.name, path = %path.display(), "loaded package");
          pkgs.push(pkg);
        }
        Err(err) => errors.push(err),
      }
    }

    if !errors.is_empty() {
      return Err(LoadError::Packages(errors));
    }

    info!(count = pkgs.len(), root = %self.root.display(), "loaded packages");
    Ok(LoadResult { vars, pkgs })
  }
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
  entry.file_type().is_dir() && entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

fn load_vars_file(path: &Path) -> Result<Option<Variables>, PackageLoadError> {
  let text = match fs::read_to_string(path) {
    Ok(text) => text,
    Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
    Err(source) => {
      return Err(PackageLoadError::Read {
        path: path.to_path_buf(),
        source,
      });
    }
  };

  serde_yaml::from_str(&text)
    .map(Some)
    .map_err(|source| PackageLoadError::Vars {
      path: path.to_path_buf(),
      source,
    })
}

/// `dir` relative to `root`, with `/` separators; empty for the root itself.
fn relative_dir(root: &Path, dir: &Path) -> String {
  dir
    .strip_prefix(root)
    .unwrap_or(dir)
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Arc, Mutex};

  use crate::loader::ExpandError;
  use crate::pkg::Variant;
  use crate::util::testutil::{package_tree, write_file};
  use tempfile::TempDir;

  #[test]
  fn loads_every_package() {
    let temp = package_tree();
    let result = FilesystemLoader::new(temp.path()).load(&Variables::new()).unwrap();

    let mut names: Vec<_> = result.pkgs.iter().map(|p| p.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["base", "gcc"]);
    assert_eq!(result.vars.get("CHANNEL"), Some("stable"));
  }

  #[test]
  fn records_base_dir_relative_to_root() {
    let temp = package_tree();
    let result = FilesystemLoader::new(temp.path()).load(&Variables::new()).unwrap();

    let gcc = result.pkgs.iter().find(|p| p.name == "gcc").unwrap();
    assert_eq!(gcc.base_dir, "tools/gcc");
    let base = result.pkgs.iter().find(|p| p.name == "base").unwrap();
    assert_eq!(base.base_dir, "base");
    assert_eq!(base.variant, Variant::Scratch);
  }

  #[test]
  fn nested_vars_override_parent_scope() {
    let temp = package_tree();
    let result = FilesystemLoader::new(temp.path()).load(&Variables::new()).unwrap();

    let gcc = result.pkgs.iter().find(|p| p.name == "gcc").unwrap();
    assert_eq!(gcc.steps[0].build[0].0, "make PREFIX=/tools");
    assert_eq!(gcc.context.get("TOOLS_PREFIX"), Some("/tools"));

    let base = result.pkgs.iter().find(|p| p.name == "base").unwrap();
    assert_eq!(base.context.get("TOOLS_PREFIX"), Some("/toolchain"));
  }

  #[test]
  fn attaches_templated_files() {
    let temp = package_tree();
    let result = FilesystemLoader::new(temp.path()).load(&Variables::new()).unwrap();

    let gcc = result.pkgs.iter().find(|p| p.name == "gcc").unwrap();
    assert_eq!(
      gcc.templated_files,
      vec![TemplatedFile {
        path: "config.mk".to_string(),
        content: "CHANNEL=stable\n".to_string(),
      }]
    );
  }

  #[test]
  fn aggregates_package_errors() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "a/pkg.yaml", "name: ''\n");
    write_file(temp.path(), "b/pkg.yaml", "name: b\nvariant: busybox\n");
    write_file(temp.path(), "c/pkg.yaml", "name: '{{ .UNDEFINED }}'\n");

    let err = FilesystemLoader::new(temp.path()).load(&Variables::new()).unwrap_err();
    match err {
      LoadError::Packages(errors) => assert_eq!(errors.len(), 3),
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn unsupported_pkgfile_is_fatal() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "Pkgfile", "format: v1\n");

    let err = FilesystemLoader::new(temp.path()).load(&Variables::new()).unwrap_err();
    assert!(matches!(err, LoadError::Pkgfile { .. }));
  }

  /// Expands `@NAME@` references and records which files it saw.
  #[derive(Default)]
  struct AtExpander {
    seen: Arc<Mutex<Vec<String>>>,
  }

  impl Expander for AtExpander {
    fn expand(&self, name: &str, text: &str, vars: &Variables) -> Result<String, ExpandError> {
      self.seen.lock().unwrap().push(name.to_string());
      Ok(
        vars
          .iter()
          .fold(text.to_string(), |text, (key, value)| text.replace(&format!("@{}@", key), value)),
      )
    }
  }

  #[test]
  fn custom_expander_replaces_default_syntax() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "Pkgfile", "format: v1alpha2\nvars:\n  PREFIX: /opt\n");
    write_file(
      temp.path(),
      "tool/pkg.yaml",
      "name: tool\nsteps:\n  - build: ['make PREFIX=@PREFIX@ {{ .KEPT }}']\nfinalize:\n  - from: /out\n    to: /\n",
    );
    write_file(temp.path(), "tool/env.sh.tmpl", "export PREFIX=@PREFIX@\n");

    let expander = AtExpander::default();
    let seen = Arc::clone(&expander.seen);
    let result = FilesystemLoader::new(temp.path())
      .with_expander(expander)
      .load(&Variables::new())
      .unwrap();

    let tool = &result.pkgs[0];
    assert_eq!(tool.steps[0].build[0].0, "make PREFIX=/opt {{ .KEPT }}");
    assert_eq!(tool.templated_files[0].content, "export PREFIX=/opt\n");

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["env.sh.tmpl", PKG_YAML]);
  }

  #[test]
  fn missing_pkgfile_is_fine() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "pkg.yaml", "name: solo\n");

    let result = FilesystemLoader::new(temp.path()).load(&Variables::new()).unwrap();
    assert_eq!(result.pkgs.len(), 1);
    assert_eq!(result.pkgs[0].base_dir, "");
  }
}
