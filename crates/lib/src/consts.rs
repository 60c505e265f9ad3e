//! Well-known names, paths and defaults shared across the crate.

/// File name of a package manifest.
pub const PKG_YAML: &str = "pkg.yaml";

/// File name of the root-level project file holding the format and global vars.
pub const PKGFILE: &str = "Pkgfile";

/// File name of a directory-scoped variables file.
pub const VARS_YAML: &str = "vars.yaml";

/// Suffix of files attached to a package after variable expansion.
pub const TEMPLATE_EXT: &str = ".tmpl";

/// The only manifest format understood by the loader.
pub const SUPPORTED_FORMAT: &str = "v1alpha2";

/// Base image for the minimal-OS variant and the checksummer.
pub const DEFAULT_BASE_IMAGE: &str = "docker.io/alpine:3.20";

/// UNIX mode for directories created by the compiler.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// UNIX mode for files written by the compiler.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default `PATH` handed to every build.
pub const DEFAULT_PATH: &str = "/bin:/usr/bin:/sbin:/usr/sbin";

/// Default shell for instructions.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Where the package context is injected inside the build root.
pub const PKG_DIR: &str = "/pkg";

/// Per-step working directory, `{}` is replaced by the step index.
pub const TMP_DIR_TEMPLATE: &str = "/tmp/build/{}";

/// Name of the local build context handed to the executor.
pub const LOCAL_CONTEXT_NAME: &str = "context";

/// Environment variable read for the cache-mount namespace.
pub const CACHE_NS_ENV: &str = "PKGSMITH_CACHE_NS";

/// Environment variable read for the reproducible build timestamp.
pub const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";

/// Latest accepted build timestamp, 9999-12-31T23:59:59Z.
pub const MAX_SOURCE_DATE_EPOCH: u64 = 253_402_300_799;

/// Variable a package can set to hide itself from graph output.
pub const GRAPH_IGNORE_VAR: &str = "GRAPH_IGNORE";

/// Prefix applied to `--build-arg` names when exposed as variables.
pub const BUILD_ARG_PREFIX: &str = "BUILD_ARG_";
