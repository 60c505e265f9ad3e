//! Implementation of the `pkgsmith sbom` command.

use anyhow::{Context, Result, bail};
use clap::Args;

use pkgsmith_lib::sbom;

use super::{BuildArgs, LoadArgs};

#[derive(Debug, Args)]
pub struct SbomArgs {
  /// Package whose SBOM documents are printed
  pub package: String,

  #[command(flatten)]
  pub load: LoadArgs,

  #[command(flatten)]
  pub build: BuildArgs,
}

/// Print the SPDX document of every step of `package` that declares SBOM
/// metadata, one JSON document per line.
pub fn cmd_sbom(args: SbomArgs) -> Result<()> {
  let options = args.build.apply(args.load.options(&args.package))?;
  let context = args.load.cache(options.clone())?.get(args.load.primary_platform())?;
  let pkg = context
    .packages
    .get(&args.package)
    .with_context(|| format!("Package {:?} not defined", args.package))?;

  let mut rendered = 0;
  for (index, step) in pkg.steps.iter().enumerate() {
    let Some(meta) = &step.sbom else {
      continue;
    };
    let document = sbom::render(meta, options.source_date_epoch)
      .with_context(|| format!("Failed to render SBOM of step {}", index))?;
    let value: serde_json::Value = serde_json::from_str(&document).context("Failed to parse SBOM")?;
    println!("{}", serde_json::to_string(&value).context("Failed to serialize SBOM")?);
    rendered += 1;
  }

  if rendered == 0 {
    bail!("Package {:?} declares no SBOM", args.package);
  }
  Ok(())
}
