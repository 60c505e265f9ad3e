use serde::Deserialize;
use thiserror::Error;

use crate::consts::SUPPORTED_FORMAT;
use crate::vars::Variables;

#[derive(Debug, Error)]
pub enum PkgfileError {
  #[error("failed to parse Pkgfile: {0}")]
  Parse(#[from] serde_yaml::Error),

  #[error("unsupported format: {found:?}, supported formats: [{:?}]", SUPPORTED_FORMAT)]
  UnsupportedFormat { found: String },
}

/// Root-level project file: manifest format and global variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Pkgfile {
  pub format: String,
  #[serde(default)]
  pub vars: Variables,
}

impl Pkgfile {
  pub fn parse(text: &str) -> Result<Self, PkgfileError> {
    let pkgfile: Pkgfile = serde_yaml::from_str(text)?;

    if pkgfile.format != SUPPORTED_FORMAT {
      return Err(PkgfileError::UnsupportedFormat { found: pkgfile.format });
    }

    Ok(pkgfile)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_vars() {
    let pkgfile = Pkgfile::parse("format: v1alpha2\nvars:\n  TOOLCHAIN_IMAGE: ghcr.io/acme/toolchain:v1\n").unwrap();
    assert_eq!(pkgfile.vars.get("TOOLCHAIN_IMAGE"), Some("ghcr.io/acme/toolchain:v1"));
  }

  #[test]
  fn rejects_other_formats() {
    let err = Pkgfile::parse("format: v1alpha1\n").unwrap_err();
    assert_eq!(
      err.to_string(),
      "unsupported format: \"v1alpha1\", supported formats: [\"v1alpha2\"]"
    );
  }
}
