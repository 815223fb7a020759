//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "routing-orchestrator")]
#[command(about = "Asynchronous routing-operation orchestrator", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
	/// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
	#[arg(long, env = "ROUTING_LOG_LEVEL", default_value = "info", global = true)]
	pub log_level: String,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Validate a configuration file
	#[command(about = "Load and validate an orchestrator configuration file")]
	Validate {
		/// Configuration file to validate
		#[arg(short, long, value_name = "FILE")]
		config: PathBuf,
	},

	/// Run a scripted planning session against the in-process solver
	#[command(about = "Build routes, then delete orders across schedule versions")]
	Demo {
		/// Optional configuration file; defaults apply otherwise
		#[arg(short, long, value_name = "FILE")]
		config: Option<PathBuf>,
	},
}
