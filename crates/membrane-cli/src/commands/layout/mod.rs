use std::path::PathBuf;

use anyhow::Result;
use membrane_runtime::RuntimeConfig;
use membrane_types::{Schema, layout};

use crate::commands::MembraneCommand;

pub struct LayoutCommand {
	pub config: PathBuf,
	pub name: Option<String>,
}

impl MembraneCommand for LayoutCommand {
	fn run(self) -> Result<()> {
		let config = RuntimeConfig::from_file(&self.config)?;
		print!("{}", report(&config.schema, self.name.as_deref())?);
		Ok(())
	}
}

fn report(schema: &Schema, name: Option<&str>) -> Result<String> {
	let names: Vec<&str> = match name {
		Some(name) => {
			schema.get(name)?;
			vec![name]
		}
		None => schema.types.keys().map(String::as_str).collect(),
	};
	let mut out = String::new();
	for name in names {
		let ty = schema.get(name)?;
		let title = format!("{name}: {} bytes, align {}", layout::size_of(ty)?, layout::align_of(ty)?);
		out.push_str(&format!("\n{title}\n{}\n", "=".repeat(title.len())));
		for slot in layout::slots(ty)? {
			out.push_str(&format!("{:>6} {:>6}  {}: {}\n", slot.offset, slot.size, slot.path, slot.ty));
		}
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use membrane_types::{Primitive, TypeDescriptor};

	use super::*;

	#[test]
	fn reports_offsets_of_packed_fields() {
		let schema = Schema::default().with_type(
			"HostToGuest",
			TypeDescriptor::structure([
				("a", Primitive::U8.into()),
				("b", Primitive::F64.into()),
				("c", Primitive::F64.into()),
			]),
		);
		let out = report(&schema, Some("HostToGuest")).unwrap();
		assert!(out.contains("HostToGuest: 17 bytes"), "{out}");
		assert!(out.contains("     1      8  b: f64"), "{out}");
		assert!(out.contains("     9      8  c: f64"), "{out}");
		assert!(report(&schema, Some("Missing")).is_err());
	}

	#[test]
	fn runs_against_a_configuration_file() {
		let dir = tempfile::tempdir().unwrap();
		let config = dir.path().join("membrane.toml");
		std::fs::write(&config, include_str!("../../../../demo/membrane.toml")).unwrap();
		let command = |name: Option<&str>| LayoutCommand {
			config: config.clone(),
			name: name.map(str::to_string),
		};
		command(None).run().unwrap();
		command(Some("GuestToHost")).run().unwrap();
		assert!(command(Some("Missing")).run().is_err());
		let missing = LayoutCommand {
			config: dir.path().join("missing.toml"),
			name: None,
		};
		let err = missing.run().unwrap_err();
		assert!(err.to_string().contains("missing.toml"), "{err}");
	}
}
