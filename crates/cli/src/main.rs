mod cmd;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{CompileArgs, DumpArgs, GraphArgs, RehashArgs, SbomArgs, ValidateArgs};
use output::print_error;

/// pkgsmith - compile package manifests into build graphs
#[derive(Parser)]
#[command(name = "pkgsmith")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Compile a package into a build graph definition
  Compile(CompileArgs),

  /// Print the dependency graph of a package in dot format
  Graph(GraphArgs),

  /// Print loaded packages as JSON
  Dump(DumpArgs),

  /// Load and validate every package, optionally verifying source checksums
  Validate(ValidateArgs),

  /// Print the SPDX documents declared by a package
  Sbom(SbomArgs),

  /// Download a URL and print its sha256 and sha512 digests
  Rehash(RehashArgs),
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Compile(args) => cmd::cmd_compile(args),
    Commands::Graph(args) => cmd::cmd_graph(args),
    Commands::Dump(args) => cmd::cmd_dump(args),
    Commands::Validate(args) => cmd::cmd_validate(args),
    Commands::Sbom(args) => cmd::cmd_sbom(args),
    Commands::Rehash(args) => cmd::cmd_rehash(args),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}
