//! Implementation of the `pkgsmith validate` command.
//!
//! Loading already validates every manifest and reports all issues at once;
//! with `--checksums` every declared source is also downloaded and verified.

use anyhow::{Context, Result};
use clap::{ArgAction, Args};

use pkgsmith_lib::checksum::{default_parallelism, validate_package_checksums};

use super::LoadArgs;
use crate::output::{print_info, print_success};

#[derive(Debug, Args)]
pub struct ValidateArgs {
  #[command(flatten)]
  pub load: LoadArgs,

  /// Download every source and verify its declared digests
  #[arg(long, default_value_t = true, action = ArgAction::Set)]
  pub checksums: bool,

  /// Maximum number of concurrent downloads (default: available parallelism)
  #[arg(long)]
  pub parallelism: Option<usize>,
}

pub fn cmd_validate(args: ValidateArgs) -> Result<()> {
  let context = args.load.load("")?;
  let set = context.packages.to_set();
  print_info(&format!("Loaded {} package(s)", set.len()));

  if args.checksums {
    let parallelism = args.parallelism.unwrap_or_else(default_parallelism);
    let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    rt.block_on(validate_package_checksums(&set, parallelism))
      .context("Checksum validation failed")?;
  }

  print_success("All packages are valid");
  Ok(())
}
