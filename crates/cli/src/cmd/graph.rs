//! Implementation of the `pkgsmith graph` command.

use anyhow::{Context, Result};
use clap::Args;

use super::LoadArgs;

#[derive(Debug, Args)]
pub struct GraphArgs {
  /// Package whose dependency graph is printed
  pub target: String,

  #[command(flatten)]
  pub load: LoadArgs,
}

/// Print the resolved graph of `target` in dot format, leaving out packages
/// that set `GRAPH_IGNORE=true`.
pub fn cmd_graph(args: GraphArgs) -> Result<()> {
  let context = args.load.load(&args.target)?;
  let graph = context
    .packages
    .resolve(&args.target)
    .with_context(|| format!("Failed to resolve {}", args.target))?;

  print!("{}", graph.to_set().without_graph_ignored().to_dot());
  Ok(())
}
