//! Implementation of the `pkgsmith dump` command.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;

use pkgsmith_lib::solver::PackageSet;

use super::LoadArgs;

#[derive(Debug, Args)]
pub struct DumpArgs {
  /// Only dump these packages and their dependencies (default: every package)
  pub targets: Vec<String>,

  #[command(flatten)]
  pub load: LoadArgs,
}

pub fn cmd_dump(args: DumpArgs) -> Result<()> {
  let context = args.load.load(args.targets.first().map(String::as_str).unwrap_or_default())?;

  let set = if args.targets.is_empty() {
    context.packages.to_set()
  } else {
    let mut selected = BTreeMap::new();
    for target in &args.targets {
      let graph = context
        .packages
        .resolve(target)
        .with_context(|| format!("Failed to resolve {}", target))?;
      for pkg in graph.to_set().iter() {
        selected.entry(pkg.name.clone()).or_insert_with(|| pkg.clone());
      }
    }
    PackageSet::from(selected.into_values().collect::<Vec<_>>())
  };

  let mut stdout = std::io::stdout().lock();
  set.sorted().dump_json(&mut stdout).context("Failed to write packages")?;
  writeln!(stdout).context("Failed to write packages")?;
  Ok(())
}
