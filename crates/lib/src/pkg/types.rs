use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_SHELL, TMP_DIR_TEMPLATE};
use crate::platform::Platform;
use crate::vars::Variables;

/// Base filesystem a package build starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
  /// Minimal prebuilt OS image with a shell and a package manager.
  #[default]
  #[serde(alias = "minimal-os")]
  Alpine,
  /// Empty filesystem.
  #[serde(alias = "empty")]
  Scratch,
}

impl fmt::Display for Variant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Variant::Alpine => write!(f, "alpine"),
      Variant::Scratch => write!(f, "scratch"),
    }
  }
}

/// Network access granted to a step's instructions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
  #[default]
  None,
  Default,
  Host,
}

impl fmt::Display for NetworkMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NetworkMode::None => write!(f, "none"),
      NetworkMode::Default => write!(f, "default"),
      NetworkMode::Host => write!(f, "host"),
    }
  }
}

/// Path to the interpreter running instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shell(pub String);

impl Default for Shell {
  fn default() -> Self {
    Self(DEFAULT_SHELL.to_string())
  }
}

impl Shell {
  pub fn get(&self) -> &str {
    if self.0.is_empty() { DEFAULT_SHELL } else { &self.0 }
  }
}

/// A single shell command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instruction(pub String);

impl Instruction {
  /// The command wrapped for `<shell> -c` execution with strict error handling.
  pub fn script(&self) -> String {
    format!("set -eou pipefail\n{}", self.0)
  }
}

impl From<&str> for Instruction {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// What a dependency points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyRef {
  /// External image reference, passed to the executor as is.
  Image(String),
  /// Another package in the same registry.
  Stage(String),
}

/// A filesystem a package copies into its build root before running steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Dependency {
  #[serde(flatten)]
  pub reference: DependencyRef,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub platform: Option<Platform>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub from: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub to: Option<String>,
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  pub runtime: bool,
}

impl Dependency {
  pub fn stage(name: impl Into<String>) -> Self {
    Self::new(DependencyRef::Stage(name.into()))
  }

  pub fn image(reference: impl Into<String>) -> Self {
    Self::new(DependencyRef::Image(reference.into()))
  }

  fn new(reference: DependencyRef) -> Self {
    Self {
      reference,
      platform: None,
      from: None,
      to: None,
      runtime: false,
    }
  }

  pub fn with_platform(mut self, platform: Platform) -> Self {
    self.platform = Some(platform);
    self
  }

  pub fn with_from(mut self, from: impl Into<String>) -> Self {
    self.from = Some(from.into());
    self
  }

  pub fn with_to(mut self, to: impl Into<String>) -> Self {
    self.to = Some(to.into());
    self
  }

  pub fn with_runtime(mut self) -> Self {
    self.runtime = true;
    self
  }

  pub fn is_internal(&self) -> bool {
    matches!(self.reference, DependencyRef::Stage(_))
  }

  /// Stage name for internal dependencies.
  pub fn stage_name(&self) -> Option<&str> {
    match &self.reference {
      DependencyRef::Stage(name) => Some(name),
      DependencyRef::Image(_) => None,
    }
  }

  /// Image or stage name, whichever is set.
  pub fn name(&self) -> &str {
    match &self.reference {
      DependencyRef::Stage(name) | DependencyRef::Image(name) => name,
    }
  }

  /// Copy source inside the dependency's filesystem.
  pub fn src(&self) -> &str {
    self.from.as_deref().filter(|s| !s.is_empty()).unwrap_or("/")
  }

  /// Copy destination inside the package's build root.
  pub fn dest(&self) -> &str {
    self.to.as_deref().filter(|s| !s.is_empty()).unwrap_or("/")
  }

  /// Whether the whole filesystem is taken as is.
  pub fn is_root_copy(&self) -> bool {
    self.src() == "/" && self.dest() == "/"
  }

  /// Key identifying the materialized layer; two dependencies with the same
  /// key produce the same layer.
  pub fn identity_key(&self) -> String {
    format!(
      "{}-{}-{}-{}",
      self.name(),
      self.src(),
      self.dest(),
      self.platform.map(|p| p.id).unwrap_or_default()
    )
  }
}

/// A remote artifact downloaded before a step runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
  pub url: String,
  pub destination: String,
  pub sha256: String,
  pub sha512: String,
}

impl Source {
  /// The declared SHA-512 as a `sha512sum -c` input line.
  pub fn to_sha512_sum(&self) -> String {
    format!("{} *{}\n", self.sha512, self.destination)
  }
}

/// Metadata for the software bill of materials written by a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SbomStep {
  #[serde(default)]
  pub output_path: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub version: String,
  #[serde(default, rename = "cpes")]
  pub cpes: Vec<String>,
  #[serde(default)]
  pub purl: String,
  #[serde(default)]
  pub licenses: Vec<String>,
}

/// One unit of a package build, run in its own empty working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub cache_paths: Vec<String>,
  pub network: NetworkMode,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tmp_dir: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub sources: Vec<Source>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub prepare: Vec<Instruction>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub build: Vec<Instruction>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub install: Vec<Instruction>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub test: Vec<Instruction>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sbom: Option<SbomStep>,
}

impl Step {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_build(mut self, instruction: &str) -> Self {
    self.build.push(instruction.into());
    self
  }

  pub fn with_test(mut self, instruction: &str) -> Self {
    self.test.push(instruction.into());
    self
  }

  pub fn with_source(mut self, source: Source) -> Self {
    self.sources.push(source);
    self
  }

  pub fn with_env(mut self, key: &str, value: &str) -> Self {
    self.env.insert(key.to_string(), value.to_string());
    self
  }

  /// Working directory of the step at position `index`.
  pub fn tmp_dir(&self, index: usize) -> String {
    match &self.tmp_dir {
      Some(dir) if !dir.is_empty() => dir.clone(),
      _ => TMP_DIR_TEMPLATE.replace("{}", &index.to_string()),
    }
  }

  /// Phases whose filesystem changes carry over to later steps, in order.
  pub fn persistent_phases(&self) -> [(&'static str, &[Instruction]); 3] {
    [
      ("prepare", self.prepare.as_slice()),
      ("build", self.build.as_slice()),
      ("install", self.install.as_slice()),
    ]
  }
}

/// Copies `from` of the built root to `to` of the published output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finalize {
  pub from: String,
  pub to: String,
}

/// A file from the package directory, already expanded, injected into the
/// build context at `path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TemplatedFile {
  pub path: String,
  pub content: String,
}

/// A loaded, validated package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
  pub name: String,
  pub variant: Variant,
  pub shell: Shell,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub install: Vec<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub dependencies: Vec<Dependency>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub steps: Vec<Step>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub finalize: Vec<Finalize>,
  /// Directory of the manifest relative to the package root.
  pub base_dir: String,
  #[serde(skip)]
  pub templated_files: Vec<TemplatedFile>,
  /// Variables the manifest was expanded with.
  #[serde(skip)]
  pub context: Variables,
}

impl Package {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      variant: Variant::default(),
      shell: Shell::default(),
      install: Vec::new(),
      dependencies: Vec::new(),
      steps: Vec::new(),
      finalize: Vec::new(),
      base_dir: String::new(),
      templated_files: Vec::new(),
      context: Variables::new(),
    }
  }

  pub fn with_variant(mut self, variant: Variant) -> Self {
    self.variant = variant;
    self
  }

  pub fn with_dependency(mut self, dependency: Dependency) -> Self {
    self.dependencies.push(dependency);
    self
  }

  pub fn with_install(mut self, package: &str) -> Self {
    self.install.push(package.to_string());
    self
  }

  pub fn with_step(mut self, step: Step) -> Self {
    self.steps.push(step);
    self
  }

  pub fn with_finalize(mut self, from: &str, to: &str) -> Self {
    self.finalize.push(Finalize {
      from: from.to_string(),
      to: to.to_string(),
    });
    self
  }

  pub fn with_base_dir(mut self, base_dir: &str) -> Self {
    self.base_dir = base_dir.to_string();
    self
  }

  pub fn with_context(mut self, context: Variables) -> Self {
    self.context = context;
    self
  }

  /// Names of stage dependencies, in declaration order.
  pub fn internal_dependencies(&self) -> impl Iterator<Item = &str> {
    self.dependencies.iter().filter_map(Dependency::stage_name)
  }

  /// External image references, in declaration order.
  pub fn external_dependencies(&self) -> impl Iterator<Item = &str> {
    self
      .dependencies
      .iter()
      .filter(|d| !d.is_internal())
      .map(Dependency::name)
  }
}
