//! SPDX documents for packages that declare SBOM metadata.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::pkg::SbomStep;
use crate::util::hash::sha256_hex;

const SPDX_VERSION: &str = "SPDX-2.3";
const NO_ASSERTION: &str = "NOASSERTION";

#[derive(Debug, Error)]
pub enum SbomError {
  #[error("SBOM name can't be empty")]
  MissingName,

  #[error("invalid CPE {cpe:?}, expected a cpe:2.3: formatted string")]
  InvalidCpe { cpe: String },

  #[error("invalid package URL {purl:?}, expected pkg:<type>/<name>")]
  InvalidPurl { purl: String },

  #[error("failed to serialize SBOM: {0}")]
  Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpdxDocument {
  spdx_version: &'static str,
  data_license: &'static str,
  #[serde(rename = "SPDXID")]
  spdx_id: &'static str,
  name: String,
  document_namespace: String,
  creation_info: CreationInfo,
  packages: Vec<SpdxPackage>,
  relationships: Vec<Relationship>,
}

#[derive(Debug, Serialize)]
struct CreationInfo {
  created: String,
  creators: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpdxPackage {
  name: String,
  #[serde(rename = "SPDXID")]
  spdx_id: String,
  #[serde(skip_serializing_if = "String::is_empty")]
  version_info: String,
  download_location: &'static str,
  files_analyzed: bool,
  license_concluded: String,
  license_declared: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  external_refs: Vec<ExternalRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExternalRef {
  reference_category: &'static str,
  reference_type: &'static str,
  reference_locator: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Relationship {
  spdx_element_id: &'static str,
  relationship_type: &'static str,
  related_spdx_element: String,
}

impl SpdxDocument {
  /// Build the document describing `meta`, stamped with `created` (or one
  /// second past the epoch when no build timestamp is fixed).
  pub fn new(meta: &SbomStep, created: Option<SystemTime>) -> Result<Self, SbomError> {
    if meta.name.is_empty() {
      return Err(SbomError::MissingName);
    }

    let mut external_refs = Vec::with_capacity(meta.cpes.len() + 1);
    for cpe in &meta.cpes {
      if !cpe.starts_with("cpe:2.3:") {
        return Err(SbomError::InvalidCpe { cpe: cpe.clone() });
      }
      external_refs.push(ExternalRef {
        reference_category: "SECURITY",
        reference_type: "cpe23Type",
        reference_locator: cpe.clone(),
      });
    }

    if !meta.purl.is_empty() {
      if !meta.purl.starts_with("pkg:") || !meta.purl.contains('/') {
        return Err(SbomError::InvalidPurl {
          purl: meta.purl.clone(),
        });
      }
      external_refs.push(ExternalRef {
        reference_category: "PACKAGE-MANAGER",
        reference_type: "purl",
        reference_locator: meta.purl.clone(),
      });
    }

    let license = if meta.licenses.is_empty() {
      NO_ASSERTION.to_string()
    } else {
      meta.licenses.join(" AND ")
    };

    let created = created.unwrap_or(UNIX_EPOCH + Duration::from_secs(1));
    let package_id = format!("SPDXRef-Package-{}", spdx_ref(&meta.name));
    let namespace_digest = sha256_hex(format!("{}@{}", meta.name, meta.version).as_bytes());

    Ok(Self {
      spdx_version: SPDX_VERSION,
      data_license: "CC0-1.0",
      spdx_id: "SPDXRef-DOCUMENT",
      name: meta.name.clone(),
      document_namespace: format!("https://pkgsmith.dev/spdx/{}-{}", meta.name, &namespace_digest[..16]),
      creation_info: CreationInfo {
        created: humantime::format_rfc3339_seconds(created).to_string(),
        creators: vec![format!("Tool: pkgsmith-{}", env!("CARGO_PKG_VERSION"))],
      },
      packages: vec![SpdxPackage {
        name: meta.name.clone(),
        spdx_id: package_id.clone(),
        version_info: meta.version.clone(),
        download_location: NO_ASSERTION,
        files_analyzed: false,
        license_concluded: license.clone(),
        license_declared: license,
        external_refs,
      }],
      relationships: vec![Relationship {
        spdx_element_id: "SPDXRef-DOCUMENT",
        relationship_type: "DESCRIBES",
        related_spdx_element: package_id,
      }],
    })
  }

  pub fn to_json(&self) -> Result<String, SbomError> {
    Ok(serde_json::to_string_pretty(self)?)
  }
}

/// Render the SPDX JSON document for `meta`.
pub fn render(meta: &SbomStep, created: Option<SystemTime>) -> Result<String, SbomError> {
  SpdxDocument::new(meta, created)?.to_json()
}

/// SPDX identifiers only allow letters, digits, `.` and `-`.
fn spdx_ref(name: &str) -> String {
  name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
    .collect()
}
