//! Aggregated errors.
//!
//! Validation and eager checksum verification report every failure at once
//! instead of stopping at the first one. [`ErrorList`] collects them and
//! renders a single message listing each entry.

use std::fmt;

/// An ordered collection of errors reported together.
#[derive(Debug)]
pub struct ErrorList<E>(Vec<E>);

impl<E> Default for ErrorList<E> {
  fn default() -> Self {
    Self(Vec::new())
  }
}

impl<E> ErrorList<E> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, error: E) {
    self.0.push(error);
  }

  /// Append every error of `other`.
  pub fn extend(&mut self, other: ErrorList<E>) {
    self.0.extend(other.0);
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, E> {
    self.0.iter()
  }

  pub fn into_vec(self) -> Vec<E> {
    self.0
  }

  /// `Ok(())` when nothing was collected, the list itself otherwise.
  pub fn into_result(self) -> Result<(), Self> {
    if self.0.is_empty() { Ok(()) } else { Err(self) }
  }
}

impl<E> From<Vec<E>> for ErrorList<E> {
  fn from(errors: Vec<E>) -> Self {
    Self(errors)
  }
}

impl<E> IntoIterator for ErrorList<E> {
  type Item = E;
  type IntoIter = std::vec::IntoIter<E>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}

impl<E: fmt::Display> fmt::Display for ErrorList<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.0.len() {
      1 => writeln!(f, "1 error occurred:")?,
      n => writeln!(f, "{} errors occurred:", n)?,
    }
    for error in &self.0 {
      writeln!(f, "\t* {}", error)?;
    }
    Ok(())
  }
}

impl<E: std::error::Error> std::error::Error for ErrorList<E> {}
