mod commands;
mod log;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use crate::commands::MembraneCommand;
use crate::commands::check::CheckCommand;
use crate::commands::layout::LayoutCommand;
use crate::commands::run::RunCommand;

#[derive(Parser, Debug)]
#[command(name = "membrane", version, about = "Call into WASM guest modules across a typed memory boundary")]
struct Cli {
	#[arg(help = "Increase the log output verbosity")]
	#[arg(short, long, action = ArgAction::Count, global = true)]
	verbose: u8,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	#[command(about = "Call an entry point of a guest module")]
	Run {
		#[arg(help = "The entry point to call")]
		entry: String,
		#[arg(help = "The input value, as JSON")]
		#[arg(short, long)]
		input: String,
		#[arg(help = "Path to the runtime configuration")]
		#[arg(short, long, default_value = "membrane.toml")]
		config: PathBuf,
	},
	#[command(about = "Print the packed layout of the configured types")]
	Layout {
		#[arg(help = "Only print this type")]
		name: Option<String>,
		#[arg(help = "Path to the runtime configuration")]
		#[arg(short, long, default_value = "membrane.toml")]
		config: PathBuf,
	},
	#[command(about = "Check that a guest module exports every configured entry point")]
	Check {
		#[arg(help = "Path to the runtime configuration")]
		#[arg(short, long, default_value = "membrane.toml")]
		config: PathBuf,
	},
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	log::init(cli.verbose)?;
	match cli.command {
		Commands::Run {
			entry,
			input,
			config,
		} => RunCommand {
			config,
			entry,
			input,
		}
		.run(),
		Commands::Layout {
			name,
			config,
		} => LayoutCommand {
			config,
			name,
		}
		.run(),
		Commands::Check {
			config,
		} => CheckCommand {
			config,
		}
		.run(),
	}
}
