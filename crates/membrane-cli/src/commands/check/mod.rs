use std::path::PathBuf;

use anyhow::{Result, bail};
use membrane_runtime::{Controller, RuntimeConfig};
use membrane_types::err::PrefixError;

use crate::commands::MembraneCommand;

pub struct CheckCommand {
	pub config: PathBuf,
}

impl MembraneCommand for CheckCommand {
	fn run(self) -> Result<()> {
		let config = RuntimeConfig::from_file(&self.config)?;
		let path = config.module_path()?;
		let mut controller =
			Controller::from_file(path, &config.module).prefix_err(|| "Failed to load WASM module")?;
		let exports = controller.list();

		let mut missing = 0;
		for entry in &config.schema.entries {
			if exports.contains(&entry.name) {
				println!("✅ {}({}) -> {}", entry.name, entry.input, entry.output);
			} else {
				println!("❌ {}({}) -> {} is not exported", entry.name, entry.input, entry.output);
				missing += 1;
			}
		}
		if missing > 0 {
			bail!("{missing} entry points are missing from '{}'", path.display());
		}
		Ok(())
	}
}
