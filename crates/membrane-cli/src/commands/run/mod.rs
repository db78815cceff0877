use std::path::PathBuf;

use anyhow::Result;
use membrane_runtime::{Boundary, Controller, RuntimeConfig};
use membrane_types::err::PrefixError;
use membrane_types::{TypeDescriptor, Value};

use crate::commands::MembraneCommand;

pub struct RunCommand {
	pub config: PathBuf,
	pub entry: String,
	pub input: String,
}

impl MembraneCommand for RunCommand {
	fn run(self) -> Result<()> {
		let config = RuntimeConfig::from_file(&self.config)?;
		let input: Value = serde_json::from_str(&self.input).prefix_err(|| "Failed to parse the input value")?;

		// Load the WASM module
		let controller = Controller::from_file(config.module_path()?, &config.module)
			.prefix_err(|| "Failed to load WASM module")?;
		let mut boundary = Boundary::new(controller, config.schema)?;

		// Invoke the entry point with the provided input
		match boundary.invoke(&self.entry, &input) {
			Ok(output) => {
				let (_, ty) = boundary.schema().entry(&self.entry)?;
				println!("✅ {}", serde_json::to_string_pretty(&output)?);
				for (name, text) in texts(ty, &output) {
					println!("{name}: {text}");
				}
			}
			Err(e) => {
				eprintln!("❌ {e:#}");
				return Err(e);
			}
		}

		Ok(())
	}
}

/// The top-level fields of an output which hold UTF-8 text.
fn texts(ty: &TypeDescriptor, value: &Value) -> Vec<(String, String)> {
	let TypeDescriptor::Struct(fields) = ty else {
		return Vec::new();
	};
	fields
		.iter()
		.filter_map(|field| {
			let bytes = value.field(ty, &field.name)?.as_bytes()?;
			let text = String::from_utf8(bytes).ok()?;
			Some((field.name.clone(), text))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use membrane_types::Primitive;

	use super::*;

	#[test]
	fn text_fields_are_extracted() {
		let ty = TypeDescriptor::structure([
			("msg", TypeDescriptor::growable(Primitive::U8.into())),
			("n", Primitive::U32.into()),
			("raw", TypeDescriptor::growable(Primitive::U8.into())),
		]);
		let value = Value::Struct(vec![Value::bytes(b"hello"), Value::U32(3), Value::bytes(&[0xff])]);
		assert_eq!(texts(&ty, &value), vec![("msg".to_string(), "hello".to_string())]);
	}
}
