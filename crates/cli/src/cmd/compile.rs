//! Implementation of the `pkgsmith compile` command.
//!
//! Resolves the target package for every requested platform and writes the
//! resulting build graph definitions as JSON.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use pkgsmith_lib::context::compile_platforms;
use pkgsmith_lib::llb::Definition;

use super::{BuildArgs, LoadArgs};
use crate::output::{format_duration, print_success, short_digest};

#[derive(Debug, Args)]
pub struct CompileArgs {
  /// Package to compile
  pub target: String,

  #[command(flatten)]
  pub load: LoadArgs,

  #[command(flatten)]
  pub build: BuildArgs,

  /// Write the definition to a file instead of stdout
  #[arg(short, long)]
  pub output: Option<PathBuf>,
}

pub fn cmd_compile(args: CompileArgs) -> Result<()> {
  let started = Instant::now();
  let options = args.build.apply(args.load.options(&args.target))?;
  let cache = args.load.cache(options)?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let results = rt
    .block_on(compile_platforms(cache, &args.target, &args.load.platforms))
    .with_context(|| format!("Failed to compile {}", args.target))?;

  for (platform, definition) in &results {
    info!(
      %platform,
      root = short_digest(&definition.root.0),
      ops = definition.ops.len(),
      "compiled"
    );
  }

  let definitions: Vec<&Definition> = results.iter().map(|(_, def)| def).collect();
  let json = match definitions.as_slice() {
    [single] => serde_json::to_string_pretty(single),
    many => serde_json::to_string_pretty(many),
  }
  .context("Failed to serialize definition")?;

  match &args.output {
    Some(path) => {
      fs::write(path, &json).with_context(|| format!("Failed to write definition: {}", path.display()))?;
      print_success(&format!(
        "Compiled {} for {} platform(s) in {} -> {}",
        args.target,
        results.len(),
        format_duration(started.elapsed()),
        path.display()
      ));
    }
    None => println!("{}", json),
  }

  Ok(())
}
