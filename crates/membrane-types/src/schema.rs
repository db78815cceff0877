//! A registry of named type descriptors and the entry points bound to them.
//!
//! Both sides load the same schema ahead of time; nothing about it travels
//! with the bytes. A schema is validated as a whole before it is used, so a
//! malformed descriptor is reported once, by name, and never half way
//! through a call.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::descriptor::TypeDescriptor;
use crate::err::{Error, Result};
use crate::layout;

/// A guest export, bound to the names of its input and output types.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
	pub name: String,
	pub input: String,
	pub output: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
	/// The type whose size [`Schema::root_size`] reports
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub root: Option<String>,
	#[serde(default)]
	pub types: BTreeMap<String, TypeDescriptor>,
	#[serde(default, rename = "entry", skip_serializing_if = "Vec::is_empty")]
	pub entries: Vec<EntryPoint>,
}

impl Schema {
	pub fn with_type(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
		self.types.insert(name.into(), ty);
		self
	}

	pub fn with_root(mut self, name: impl Into<String>) -> Self {
		self.root = Some(name.into());
		self
	}

	pub fn with_entry(
		mut self,
		name: impl Into<String>,
		input: impl Into<String>,
		output: impl Into<String>,
	) -> Self {
		self.entries.push(EntryPoint {
			name: name.into(),
			input: input.into(),
			output: output.into(),
		});
		self
	}

	/// Check every descriptor, and that every name the schema refers to exists.
	pub fn validate(&self) -> Result<()> {
		for (name, ty) in &self.types {
			if name.is_empty() {
				return Err(Error::schema("type names must not be empty"));
			}
			layout::validate(ty).map_err(|e| match e {
				Error::Schema(reason) => Error::schema(format!("type '{name}': {reason}")),
				other => other,
			})?;
		}
		if let Some(root) = &self.root {
			self.get(root)?;
		}
		let mut names = BTreeSet::new();
		for entry in &self.entries {
			if entry.name.is_empty() {
				return Err(Error::schema("entry point names must not be empty"));
			}
			if !names.insert(entry.name.as_str()) {
				return Err(Error::schema(format!("duplicate entry point '{}'", entry.name)));
			}
			self.get(&entry.input)?;
			self.get(&entry.output)?;
		}
		Ok(())
	}

	/// Look up a named type.
	pub fn get(&self, name: &str) -> Result<&TypeDescriptor> {
		self.types.get(name).ok_or_else(|| {
			let available: Vec<&str> = self.types.keys().map(String::as_str).collect();
			Error::schema(format!("unknown type '{name}', available types: {}", available.join(", ")))
		})
	}

	/// The input and output types bound to an entry point.
	pub fn entry(&self, name: &str) -> Result<(&TypeDescriptor, &TypeDescriptor)> {
		let entry = self
			.entries
			.iter()
			.find(|e| e.name == name)
			.ok_or_else(|| Error::schema(format!("unknown entry point '{name}'")))?;
		Ok((self.get(&entry.input)?, self.get(&entry.output)?))
	}

	/// The inline size of the root type.
	pub fn root_size(&self) -> Result<usize> {
		let root = self.root.as_deref().ok_or_else(|| Error::schema("the schema declares no root type"))?;
		layout::size_of(self.get(root)?)
	}

	/// Parse and validate a schema from JSON.
	pub fn from_json(json: &str) -> Result<Self> {
		let schema: Schema =
			serde_json::from_str(json).map_err(|e| Error::schema(format!("unreadable schema: {e}")))?;
		schema.validate()?;
		Ok(schema)
	}

	pub fn to_json(&self) -> Result<String> {
		serde_json::to_string_pretty(self).map_err(|e| Error::schema(format!("unwritable schema: {e}")))
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::descriptor::Primitive;

	fn calculator() -> Schema {
		Schema::default()
			.with_type(
				"HostToGuest",
				TypeDescriptor::structure([
					("a", Primitive::U8.into()),
					("b", Primitive::F64.into()),
					("c", Primitive::F64.into()),
				]),
			)
			.with_type("GuestToHost", TypeDescriptor::structure([("msg", TypeDescriptor::growable(Primitive::U8.into()))]))
			.with_root("HostToGuest")
			.with_entry("process_data", "HostToGuest", "GuestToHost")
	}

	#[test]
	fn entries_resolve_to_their_descriptors() {
		let schema = calculator();
		schema.validate().unwrap();
		let (input, output) = schema.entry("process_data").unwrap();
		assert_eq!(layout::size_of(input).unwrap(), 17);
		assert_eq!(layout::size_of(output).unwrap(), 24);
		assert_eq!(schema.root_size().unwrap(), 17);
		assert!(matches!(schema.entry("missing"), Err(Error::Schema(_))));
	}

	#[test]
	fn schemas_survive_json() {
		let schema = calculator();
		let json = schema.to_json().unwrap();
		assert_eq!(Schema::from_json(&json).unwrap(), schema);
		assert!(matches!(Schema::from_json("{\"types\": 3}"), Err(Error::Schema(_))));
	}

	#[rstest]
	#[case::bad_type(calculator().with_type("Broken", TypeDescriptor::Struct(vec![])), "type 'Broken'")]
	#[case::unknown_input(calculator().with_entry("other", "Nope", "GuestToHost"), "unknown type 'Nope'")]
	#[case::duplicate_entry(calculator().with_entry("process_data", "HostToGuest", "GuestToHost"), "duplicate entry")]
	#[case::unknown_root(calculator().with_root("Nope"), "unknown type 'Nope'")]
	#[case::empty_name(calculator().with_entry("", "HostToGuest", "GuestToHost"), "must not be empty")]
	fn invalid_schemas_are_rejected(#[case] schema: Schema, #[case] expected: &str) {
		let err = schema.validate().unwrap_err();
		assert!(matches!(err, Error::Schema(_)));
		assert!(err.to_string().contains(expected), "{err}");
	}
}
