//! Address-space independent values.
//!
//! A [`Value`] is what a side holds once a value has been read out of some
//! memory: pointers have been followed, growable arrays have become owned
//! vectors and unions have become a tag plus a single payload. Values carry no
//! addresses and are therefore always safe to move between sides.

use serde::{Deserialize, Serialize};

use crate::descriptor::{Primitive, TypeDescriptor};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
	Bool(bool),
	I8(i8),
	U8(u8),
	I16(i16),
	U16(u16),
	I32(i32),
	U32(u32),
	I64(i64),
	U64(u64),
	F32(f32),
	F64(f64),
	/// The elements of a fixed array
	Array(Vec<Value>),
	/// The live elements of a growable array
	Vector(Vec<Value>),
	/// Field values in declaration order
	Struct(Vec<Value>),
	/// The active variant of a tagged union
	Union {
		tag: u64,
		value: Box<Value>,
	},
	/// A possibly null pointer, resolved to its pointee
	Pointer(Option<Box<Value>>),
	/// The name of an enum variant
	Enum(String),
	String(String),
}

impl Value {
	/// A growable array of `u8`.
	pub fn bytes(bytes: &[u8]) -> Self {
		Value::Vector(bytes.iter().copied().map(Value::U8).collect())
	}

	pub fn union(tag: u64, value: Value) -> Self {
		Value::Union {
			tag,
			value: Box::new(value),
		}
	}

	pub fn pointer(value: Value) -> Self {
		Value::Pointer(Some(Box::new(value)))
	}

	/// The default value of a type: zero scalars, empty growable arrays and
	/// strings, null pointers. Unions and enums take their first declared variant.
	pub fn zeroed(ty: &TypeDescriptor) -> Self {
		match ty {
			TypeDescriptor::Primitive(p) => match p {
				Primitive::Bool => Value::Bool(false),
				Primitive::I8 => Value::I8(0),
				Primitive::U8 => Value::U8(0),
				Primitive::I16 => Value::I16(0),
				Primitive::U16 => Value::U16(0),
				Primitive::I32 => Value::I32(0),
				Primitive::U32 => Value::U32(0),
				Primitive::I64 => Value::I64(0),
				Primitive::U64 => Value::U64(0),
				Primitive::F32 => Value::F32(0.0),
				Primitive::F64 => Value::F64(0.0),
			},
			TypeDescriptor::FixedArray {
				element,
				count,
			} => Value::Array(vec![Value::zeroed(element); *count]),
			TypeDescriptor::GrowableArray(_) | TypeDescriptor::HeapArray(_) => Value::Vector(Vec::new()),
			TypeDescriptor::Struct(fields) => {
				Value::Struct(fields.iter().map(|f| Value::zeroed(&f.ty)).collect())
			}
			TypeDescriptor::TaggedUnion {
				variants,
				..
			} => match variants.first() {
				Some(v) => Value::union(v.tag, Value::zeroed(&v.ty)),
				None => Value::Struct(Vec::new()),
			},
			TypeDescriptor::Pointer(_) => Value::Pointer(None),
			TypeDescriptor::Enum {
				variants,
				..
			} => Value::Enum(variants.first().cloned().unwrap_or_default()),
			TypeDescriptor::String => Value::String(String::new()),
		}
	}

	/// The bytes of a growable array of `u8`, or of a string.
	pub fn as_bytes(&self) -> Option<Vec<u8>> {
		match self {
			Value::String(s) => Some(s.as_bytes().to_vec()),
			Value::Vector(items) | Value::Array(items) => items
				.iter()
				.map(|v| match v {
					Value::U8(b) => Some(*b),
					_ => None,
				})
				.collect(),
			_ => None,
		}
	}

	/// A struct field by name, looked up through the struct's descriptor.
	pub fn field<'a>(&'a self, ty: &TypeDescriptor, name: &str) -> Option<&'a Value> {
		let (TypeDescriptor::Struct(fields), Value::Struct(values)) = (ty, self) else {
			return None;
		};
		fields.iter().position(|f| f.name == name).and_then(|i| values.get(i))
	}

	/// A short name for the shape of this value, used in mismatch errors.
	pub fn kind(&self) -> &'static str {
		match self {
			Value::Bool(_) => "bool",
			Value::I8(_) => "i8",
			Value::U8(_) => "u8",
			Value::I16(_) => "i16",
			Value::U16(_) => "u16",
			Value::I32(_) => "i32",
			Value::U32(_) => "u32",
			Value::I64(_) => "i64",
			Value::U64(_) => "u64",
			Value::F32(_) => "f32",
			Value::F64(_) => "f64",
			Value::Array(_) => "array",
			Value::Vector(_) => "vector",
			Value::Struct(_) => "struct",
			Value::Union {
				..
			} => "union",
			Value::Pointer(_) => "pointer",
			Value::Enum(_) => "enum",
			Value::String(_) => "string",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bytes_helpers_agree() {
		let value = Value::bytes(b"hi");
		assert_eq!(value.as_bytes(), Some(b"hi".to_vec()));
		assert_eq!(Value::String("hi".into()).as_bytes(), Some(b"hi".to_vec()));
		assert_eq!(Value::Vector(vec![Value::U16(1)]).as_bytes(), None);
	}

	#[test]
	fn fields_are_found_by_name() {
		let ty = TypeDescriptor::structure([("a", Primitive::U8.into()), ("b", Primitive::F64.into())]);
		let value = Value::Struct(vec![Value::U8(b'X'), Value::F64(2.0)]);
		assert_eq!(value.field(&ty, "b"), Some(&Value::F64(2.0)));
		assert_eq!(value.field(&ty, "c"), None);
	}

	#[test]
	fn zeroed_follows_the_first_variant() {
		let ty = TypeDescriptor::tagged_union(1, [(3, Primitive::U16.into()), (4, TypeDescriptor::String)]);
		assert_eq!(Value::zeroed(&ty), Value::union(3, Value::U16(0)));
	}

	#[test]
	fn values_round_trip_through_json() {
		let value = Value::Struct(vec![Value::U8(88), Value::F64(2.0), Value::bytes(b"ok")]);
		let json = serde_json::to_string(&value).unwrap();
		assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), value);
	}
}
