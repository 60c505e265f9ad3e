//! Raw `pkg.yaml` documents and their conversion into validated packages.
//!
//! Parsing is lenient about unknown keys; structural problems are collected
//! into a single [`ErrorList`] so a manifest author sees every issue at once.

use std::collections::BTreeMap;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use super::types::{
  Dependency, DependencyRef, Finalize, Instruction, NetworkMode, Package, SbomStep, Shell, Source, Step, Variant,
};
use crate::errors::ErrorList;
use crate::platform::Platform;
use crate::vars::Variables;

/// A structural problem found while validating a package.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("package name can't be empty")]
  EmptyName,

  #[error("finalize steps are missing, this is going to lead to empty build")]
  MissingFinalize,

  #[error("dependency #{index}: either image or stage must be set")]
  MissingReference { index: usize },

  #[error("dependency #{index}: image {image:?} and stage {stage:?} can't be set at the same time")]
  ConflictingReference { index: usize, image: String, stage: String },

  #[error("dependency #{index}: platform {platform:?} is not defined")]
  UnknownPlatform { index: usize, platform: String },

  #[error("step #{step}: source {destination:?}: {issue}")]
  InvalidSource {
    step: usize,
    destination: String,
    issue: SourceIssue,
  },
}

/// What is wrong with a [`Source`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceIssue {
  #[error("url can't be empty")]
  EmptyUrl,

  #[error("url {url:?} is invalid: {message}")]
  InvalidUrl { url: String, message: String },

  #[error("destination can't be empty")]
  EmptyDestination,

  #[error("{algorithm} should be {expected} hex chars long, got {actual}")]
  DigestLength {
    algorithm: &'static str,
    expected: usize,
    actual: usize,
  },

  #[error("{algorithm} is not a hex string")]
  DigestNotHex { algorithm: &'static str },
}

/// `pkg.yaml` as written by the manifest author, after variable expansion.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkgManifest {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub variant: Variant,
  #[serde(default)]
  pub shell: Option<String>,
  #[serde(default)]
  pub install: Vec<String>,
  #[serde(default)]
  pub dependencies: Vec<RawDependency>,
  #[serde(default)]
  pub steps: Vec<RawStep>,
  #[serde(default)]
  pub finalize: Vec<Finalize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDependency {
  #[serde(default)]
  pub image: Option<String>,
  #[serde(default)]
  pub stage: Option<String>,
  #[serde(default)]
  pub platform: Option<String>,
  #[serde(default)]
  pub from: Option<String>,
  #[serde(default)]
  pub to: Option<String>,
  #[serde(default)]
  pub runtime: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStep {
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub cache_paths: Vec<String>,
  #[serde(default)]
  pub network: NetworkMode,
  #[serde(default)]
  pub tmp_dir: Option<String>,
  #[serde(default)]
  pub sources: Vec<Source>,
  #[serde(default)]
  pub prepare: Vec<Instruction>,
  #[serde(default)]
  pub build: Vec<Instruction>,
  #[serde(default)]
  pub install: Vec<Instruction>,
  #[serde(default)]
  pub test: Vec<Instruction>,
  #[serde(default)]
  pub sbom: Option<SbomStep>,
}

impl PkgManifest {
  pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(text)
  }
}

impl RawDependency {
  fn into_dependency(self, index: usize) -> Result<Dependency, ValidationError> {
    let image = self.image.filter(|s| !s.is_empty());
    let stage = self.stage.filter(|s| !s.is_empty());

    let reference = match (image, stage) {
      (Some(image), None) => DependencyRef::Image(image),
      (None, Some(stage)) => DependencyRef::Stage(stage),
      (None, None) => return Err(ValidationError::MissingReference { index }),
      (Some(image), Some(stage)) => return Err(ValidationError::ConflictingReference { index, image, stage }),
    };

    let platform = match self.platform.filter(|s| !s.is_empty()) {
      Some(id) => Some(
        id.parse::<Platform>()
          .map_err(|_| ValidationError::UnknownPlatform { index, platform: id })?,
      ),
      None => None,
    };

    Ok(Dependency {
      reference,
      platform,
      from: self.from,
      to: self.to,
      runtime: self.runtime,
    })
  }
}

impl From<RawStep> for Step {
  fn from(raw: RawStep) -> Self {
    Step {
      env: raw.env,
      cache_paths: raw.cache_paths,
      network: raw.network,
      tmp_dir: raw.tmp_dir,
      sources: raw.sources,
      prepare: raw.prepare,
      build: raw.build,
      install: raw.install,
      test: raw.test,
      sbom: raw.sbom,
    }
  }
}

impl Package {
  /// Build a package from an expanded manifest, collecting every validation
  /// problem.
  pub fn from_manifest(
    manifest: PkgManifest,
    base_dir: &str,
    context: Variables,
  ) -> Result<Package, ErrorList<ValidationError>> {
    let mut errors = ErrorList::new();
    let mut dependencies = Vec::with_capacity(manifest.dependencies.len());

    for (index, raw) in manifest.dependencies.into_iter().enumerate() {
      match raw.into_dependency(index) {
        Ok(dep) => dependencies.push(dep),
        Err(err) => errors.push(err),
      }
    }

    let pkg = Package {
      name: manifest.name,
      variant: manifest.variant,
      shell: manifest.shell.map(Shell).unwrap_or_default(),
      install: manifest.install,
      dependencies,
      steps: manifest.steps.into_iter().map(Step::from).collect(),
      finalize: manifest.finalize,
      base_dir: base_dir.to_string(),
      templated_files: Vec::new(),
      context,
    };

    if let Err(more) = pkg.validate() {
      errors.extend(more);
    }

    errors.into_result().map(|()| pkg)
  }

  /// Check the package-level invariants.
  pub fn validate(&self) -> Result<(), ErrorList<ValidationError>> {
    let mut errors = ErrorList::new();

    if self.name.is_empty() {
      errors.push(ValidationError::EmptyName);
    }

    if !self.steps.is_empty() && self.finalize.is_empty() {
      errors.push(ValidationError::MissingFinalize);
    }

    for (step_index, step) in self.steps.iter().enumerate() {
      for source in &step.sources {
        for issue in source.issues() {
          errors.push(ValidationError::InvalidSource {
            step: step_index,
            destination: source.destination.clone(),
            issue,
          });
        }
      }
    }

    errors.into_result()
  }
}

impl Source {
  /// Every structural problem with this source.
  pub fn issues(&self) -> Vec<SourceIssue> {
    let mut issues = Vec::new();

    if self.url.is_empty() {
      issues.push(SourceIssue::EmptyUrl);
    } else if let Err(err) = Url::parse(&self.url) {
      issues.push(SourceIssue::InvalidUrl {
        url: self.url.clone(),
        message: err.to_string(),
      });
    }

    if self.destination.is_empty() {
      issues.push(SourceIssue::EmptyDestination);
    }

    for (algorithm, digest, expected) in [("sha256", &self.sha256, 64), ("sha512", &self.sha512, 128)] {
      if digest.len() != expected {
        issues.push(SourceIssue::DigestLength {
          algorithm,
          expected,
          actual: digest.len(),
        });
      } else if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        issues.push(SourceIssue::DigestNotHex { algorithm });
      }
    }

    issues
  }
}
