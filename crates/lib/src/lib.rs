//! pkgsmith-lib: package build orchestration
//!
//! This crate turns a tree of package manifests into build graphs:
//! - `loader`: reads and expands manifests into validated `Package`s
//! - `solver`: resolves dependency graphs from a package registry
//! - `convert`: lowers a resolved graph into an `llb::Definition`
//! - `context`: per-platform registries and concurrent multi-platform builds
//! - `checksum`: eager verification of declared source digests

pub mod checksum;
pub mod consts;
pub mod context;
pub mod convert;
pub mod errors;
pub mod llb;
pub mod loader;
pub mod options;
pub mod pkg;
pub mod platform;
pub mod sbom;
pub mod solver;
pub mod util;
pub mod vars;
