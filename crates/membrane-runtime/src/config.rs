use std::path::{Path, PathBuf};

use anyhow::Result;
use membrane_types::Schema;
use membrane_types::err::PrefixError;
use serde::{Deserialize, Serialize};

/// The contents of a `membrane.toml` file.
///
/// ```toml
/// root = "HostToGuest"
///
/// [module]
/// path = "demo.wasm"
///
/// [types.HostToGuest]
/// struct = [
/// 	{ name = "a", type = { primitive = "u8" } },
/// 	{ name = "b", type = { primitive = "f64" } },
/// 	{ name = "c", type = { primitive = "f64" } },
/// ]
///
/// [types.GuestToHost]
/// struct = [{ name = "msg", type = { growable_array = { primitive = "u8" } } }]
///
/// [[entry]]
/// name = "process_data"
/// input = "HostToGuest"
/// output = "GuestToHost"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
	#[serde(default)]
	pub module: ModuleConfig,
	#[serde(flatten)]
	pub schema: Schema,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
	/// The guest module, relative to the configuration file
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<PathBuf>,
	/// The largest size in bytes guest memory may grow to
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_memory: Option<usize>,
}

impl RuntimeConfig {
	/// Parse and validate a configuration.
	pub fn parse(s: &str) -> Result<Self> {
		let config: RuntimeConfig = toml::from_str(s)?;
		config.schema.validate().prefix_err(|| "Invalid schema in configuration")?;
		Ok(config)
	}

	/// Load a configuration file. A relative module path is resolved against
	/// the directory holding the file.
	pub fn from_file(path: &Path) -> Result<Self> {
		let contents = std::fs::read_to_string(path)
			.prefix_err(|| format!("Failed to read configuration file '{}'", path.display()))?;
		let mut config = RuntimeConfig::parse(&contents)
			.prefix_err(|| format!("Failed to parse '{}'", path.display()))?;
		if let (Some(module), Some(dir)) = (&config.module.path, path.parent()) {
			if module.is_relative() {
				config.module.path = Some(dir.join(module));
			}
		}
		Ok(config)
	}

	pub fn to_string(&self) -> Result<String> {
		Ok(toml::to_string(self)?)
	}

	/// The guest module path, which running a real module requires.
	pub fn module_path(&self) -> Result<&Path> {
		self.module.path.as_deref().prefix_err(|| "The configuration does not name a module, set 'module.path'")
	}
}

#[cfg(test)]
mod tests {
	use membrane_types::{Primitive, TypeDescriptor};
	use rstest::rstest;

	use super::*;

	const CALCULATOR: &str = r#"
root = "HostToGuest"

[module]
path = "demo.wasm"
max_memory = 1048576

[types.HostToGuest]
struct = [
	{ name = "a", type = { primitive = "u8" } },
	{ name = "b", type = { primitive = "f64" } },
	{ name = "c", type = { primitive = "f64" } },
]

[types.GuestToHost]
struct = [{ name = "msg", type = { growable_array = { primitive = "u8" } } }]

[[entry]]
name = "process_data"
input = "HostToGuest"
output = "GuestToHost"
"#;

	#[test]
	fn parses_modules_types_and_entries() {
		let config = RuntimeConfig::parse(CALCULATOR).unwrap();
		assert_eq!(config.module.path.as_deref(), Some(Path::new("demo.wasm")));
		assert_eq!(config.module.max_memory, Some(1 << 20));
		assert_eq!(config.schema.root_size().unwrap(), 17);
		let (_, output) = config.schema.entry("process_data").unwrap();
		assert_eq!(
			output,
			&TypeDescriptor::structure([("msg", TypeDescriptor::growable(Primitive::U8.into()))])
		);
	}

	#[test]
	fn renders_back_to_an_equivalent_configuration() {
		let config = RuntimeConfig::parse(CALCULATOR).unwrap();
		let rendered = config.to_string().unwrap();
		assert_eq!(RuntimeConfig::parse(&rendered).unwrap(), config);
	}

	#[rstest]
	#[case::unknown_output("output = \"GuestToHost\"", "output = \"Missing\"", "unknown type 'Missing'")]
	#[case::unknown_root("root = \"HostToGuest\"", "root = \"Nope\"", "unknown type 'Nope'")]
	#[case::empty_struct("struct = [{ name = \"msg\"", "struct = [] #", "type 'GuestToHost'")]
	#[case::bad_discriminant(
		"type = { growable_array = { primitive = \"u8\" } }",
		"type = { tagged_union = { discriminant = 3, variants = [{ tag = 0, type = { primitive = \"u8\" } }] } }",
		"discriminant width must be 1, 2, 4 or 8"
	)]
	#[case::duplicate_entry("[[entry]]", "[[entry]]\nname = \"process_data\"\ninput = \"HostToGuest\"\noutput = \"GuestToHost\"\n\n[[entry]]", "duplicate entry point")]
	fn rejects_broken_configurations(#[case] from: &str, #[case] to: &str, #[case] reason: &str) {
		let broken = CALCULATOR.replace(from, to);
		assert_ne!(broken, CALCULATOR);
		let err = RuntimeConfig::parse(&broken).unwrap_err();
		assert!(err.to_string().contains(reason), "{err}");
	}

	#[test]
	fn module_paths_are_relative_to_the_file() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("membrane.toml");
		std::fs::write(&file, CALCULATOR).unwrap();
		let config = RuntimeConfig::from_file(&file).unwrap();
		assert_eq!(config.module_path().unwrap(), dir.path().join("demo.wasm"));
		assert!(RuntimeConfig::default().module_path().is_err());
	}
}
