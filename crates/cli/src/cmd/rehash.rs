//! Implementation of the `pkgsmith rehash` command.

use anyhow::{Context, Result};
use clap::Args;

use pkgsmith_lib::checksum::fetch_digests;

use crate::output::{OutputFormat, print_json, print_stat};

#[derive(Debug, Args)]
pub struct RehashArgs {
  /// URL of the source to digest
  pub url: String,

  /// Output format
  #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
  pub output: OutputFormat,
}

/// Print the digests to paste into a manifest after bumping a source URL.
pub fn cmd_rehash(args: RehashArgs) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let digests = rt
    .block_on(fetch_digests(&args.url))
    .with_context(|| format!("Failed to fetch {}", args.url))?;

  if args.output.is_json() {
    print_json(&digests)?;
  } else {
    print_stat("sha256", &digests.sha256);
    print_stat("sha512", &digests.sha512);
  }

  Ok(())
}
