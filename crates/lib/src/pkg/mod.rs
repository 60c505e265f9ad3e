//! Package manifests.
//!
//! A [`Package`] is the immutable, validated form of one `pkg.yaml`. It is
//! built once from expanded manifest text and never changes afterwards.

mod manifest;
mod pkgfile;
mod types;

pub use manifest::*;
pub use pkgfile::*;
pub use types::*;
