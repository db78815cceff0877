use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install a compact stderr logger. `RUST_LOG` takes precedence over the
/// verbosity flags.
pub fn init(verbose: u8) -> Result<()> {
	let level = match verbose {
		0 => "membrane=info",
		1 => "membrane=debug",
		_ => "membrane=trace",
	};
	let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
	tracing_subscriber::fmt()
		.compact()
		.with_env_filter(filter)
		.with_target(true)
		.with_writer(std::io::stderr)
		.try_init()
		.map_err(|e| anyhow::anyhow!("Failed to install the logger: {e}"))
}
