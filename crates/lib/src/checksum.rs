//! Eager verification of declared source digests.
//!
//! Build graphs only encode the checks; this module downloads every source
//! up front so mismatches surface before a build is scheduled.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::errors::ErrorList;
use crate::pkg::Source;
use crate::solver::PackageSet;
use crate::util::hash::{SourceDigests, SourceHasher};

#[derive(Debug, Error)]
pub enum ChecksumError {
  #[error("failed to fetch {url}: {message}")]
  Fetch { url: String, message: String },

  #[error("{destination} {algorithm} does not match: expected {expected}, got {actual}")]
  Mismatch {
    destination: String,
    algorithm: &'static str,
    expected: String,
    actual: String,
  },

  #[error("{package}: {source}")]
  Package {
    package: String,
    #[source]
    source: Box<ChecksumError>,
  },

  #[error("{0}")]
  Multiple(ErrorList<ChecksumError>),
}

/// Download `url` and compute both digests over the streamed body.
pub async fn fetch_digests(url: &str) -> Result<SourceDigests, ChecksumError> {
  let fetch_error = |message: String| ChecksumError::Fetch {
    url: url.to_string(),
    message,
  };

  debug!(url, "fetching source");
  let mut response = reqwest::get(url).await.map_err(|e| fetch_error(e.to_string()))?;

  if !response.status().is_success() {
    return Err(fetch_error(format!("HTTP {}", response.status())));
  }

  let mut hasher = SourceHasher::new();
  let mut size = 0usize;
  while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(e.to_string()))? {
    size += chunk.len();
    hasher.update(&chunk);
  }

  debug!(url, size, "source fetched");
  Ok(hasher.finalize())
}

/// Fetch `source` and compare both digests with the declared ones.
///
/// Every mismatch is reported, so a source with both digests wrong yields two
/// entries.
pub async fn validate_checksums(source: &Source) -> Result<SourceDigests, ChecksumError> {
  let digests = fetch_digests(&source.url).await?;

  let mut errors = ErrorList::new();
  for (algorithm, expected, actual) in [
    ("sha256", &source.sha256, &digests.sha256),
    ("sha512", &source.sha512, &digests.sha512),
  ] {
    if expected != actual {
      errors.push(ChecksumError::Mismatch {
        destination: source.destination.clone(),
        algorithm,
        expected: expected.clone(),
        actual: actual.clone(),
      });
    }
  }

  errors.into_result().map_err(ChecksumError::Multiple)?;
  Ok(digests)
}

/// Validate every source of every package in `set`, at most `parallelism`
/// downloads at a time. All failures are collected, each prefixed with its
/// package name.
pub async fn validate_package_checksums(set: &PackageSet, parallelism: usize) -> Result<(), ChecksumError> {
  let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
  let mut join_set = JoinSet::new();

  for pkg in set.iter() {
    for source in pkg.steps.iter().flat_map(|step| step.sources.iter()) {
      let package = pkg.name.clone();
      let source = source.clone();
      let semaphore = Arc::clone(&semaphore);

      join_set.spawn(async move {
        let result = match semaphore.acquire().await {
          Ok(_permit) => validate_checksums(&source).await.map(|_| ()),
          Err(e) => Err(ChecksumError::Fetch {
            url: source.url.clone(),
            message: e.to_string(),
          }),
        };
        (package, result)
      });
    }
  }

  info!(sources = join_set.len(), parallelism, "validating checksums");

  let mut failures = Vec::new();
  while let Some(join_result) = join_set.join_next().await {
    match join_result {
      Ok((_, Ok(()))) => {}
      Ok((package, Err(e))) => {
        error!(package = %package, error = %e, "checksum validation failed");
        failures.push((package, e));
      }
      Err(e) => {
        error!(error = %e, "checksum task panicked");
        failures.push((
          String::new(),
          ChecksumError::Fetch {
            url: "unknown".to_string(),
            message: e.to_string(),
          },
        ));
      }
    }
  }

  // Tasks finish in any order; report by package, then by message.
  failures.sort_by_cached_key(|(package, e)| (package.clone(), e.to_string()));

  let mut errors = ErrorList::new();
  for (package, e) in failures {
    errors.push(if package.is_empty() {
      e
    } else {
      ChecksumError::Package {
        package,
        source: Box::new(e),
      }
    });
  }
  errors.into_result().map_err(ChecksumError::Multiple)
}

/// Number of concurrent downloads used when the caller has no preference.
pub fn default_parallelism() -> usize {
  std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
