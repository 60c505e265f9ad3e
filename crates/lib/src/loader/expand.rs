//! Variable expansion of manifest text.
//!
//! Manifests reference variables as `{{ .NAME }}`. [`VarsExpander`] performs
//! plain substitution of those references and nothing else; richer template
//! engines plug in through the [`Expander`] trait.

use thiserror::Error;

use crate::vars::Variables;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
  #[error("{template}: unknown variable {name:?}")]
  UnknownVariable { template: String, name: String },

  #[error("{template}: unterminated expression at byte {offset}")]
  Unterminated { template: String, offset: usize },

  #[error("{template}: unsupported expression {expression:?}")]
  Unsupported { template: String, expression: String },
}

/// Resolves manifest text against a variable context.
pub trait Expander: Send + Sync {
  /// Expand `text`, using `name` only to label errors.
  fn expand(&self, name: &str, text: &str, vars: &Variables) -> Result<String, ExpandError>;
}

/// Substitutes `{{ .NAME }}` references, failing on unknown names.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarsExpander;

impl Expander for VarsExpander {
  fn expand(&self, name: &str, text: &str, vars: &Variables) -> Result<String, ExpandError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut consumed = 0;

    while let Some(start) = rest.find("{{") {
      out.push_str(&rest[..start]);

      let after_open = &rest[start + 2..];
      let Some(end) = after_open.find("}}") else {
        return Err(ExpandError::Unterminated {
          template: name.to_string(),
          offset: consumed + start,
        });
      };

      let expression = after_open[..end].trim();
      let key = expression
        .strip_prefix('.')
        .filter(|key| !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .ok_or_else(|| ExpandError::Unsupported {
          template: name.to_string(),
          expression: expression.to_string(),
        })?;

      let value = vars.get(key).ok_or_else(|| ExpandError::UnknownVariable {
        template: name.to_string(),
        name: key.to_string(),
      })?;
      out.push_str(value);

      let advance = start + 2 + end + 2;
      consumed += advance;
      rest = &rest[advance..];
    }

    out.push_str(rest);
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars() -> Variables {
    [("TOOLCHAIN", "/toolchain"), ("ARCH", "aarch64")].into_iter().collect()
  }

  #[test]
  fn substitutes_references() {
    let out = VarsExpander
      .expand("pkg.yaml", "prefix: {{ .TOOLCHAIN }}/{{.ARCH}}\n", &vars())
      .unwrap();
    assert_eq!(out, "prefix: /toolchain/aarch64\n");
  }

  #[test]
  fn text_without_references_is_unchanged() {
    let text = "name: plain\nsteps: []\n";
    assert_eq!(VarsExpander.expand("pkg.yaml", text, &vars()).unwrap(), text);
  }

  #[test]
  fn unknown_variable_fails() {
    let err = VarsExpander.expand("pkg.yaml", "{{ .MISSING }}", &vars()).unwrap_err();
    assert_eq!(
      err,
      ExpandError::UnknownVariable {
        template: "pkg.yaml".to_string(),
        name: "MISSING".to_string()
      }
    );
  }

  #[test]
  fn unterminated_expression_reports_offset() {
    let err = VarsExpander.expand("pkg.yaml", "a: {{ .ARCH }}\nb: {{ .ARCH", &vars()).unwrap_err();
    assert_eq!(
      err,
      ExpandError::Unterminated {
        template: "pkg.yaml".to_string(),
        offset: 18
      }
    );
  }

  #[test]
  fn rejects_non_variable_expressions() {
    let err = VarsExpander.expand("pkg.yaml", "{{ if .ARCH }}", &vars()).unwrap_err();
    assert!(matches!(err, ExpandError::Unsupported { .. }));
  }
}
