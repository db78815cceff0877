//! The schema type model.
//!
//! A [`TypeDescriptor`] describes the byte layout of a value independently of
//! how either side of the boundary represents it in its own compiled code.
//! Descriptors are built once, validated once (see [`crate::layout::validate`])
//! and never mutated afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A fixed-width scalar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
	Bool,
	I8,
	U8,
	I16,
	U16,
	I32,
	U32,
	I64,
	U64,
	F32,
	F64,
}

impl Primitive {
	pub const ALL: [Primitive; 11] = [
		Primitive::Bool,
		Primitive::I8,
		Primitive::U8,
		Primitive::I16,
		Primitive::U16,
		Primitive::I32,
		Primitive::U32,
		Primitive::I64,
		Primitive::U64,
		Primitive::F32,
		Primitive::F64,
	];

	/// Size, and alignment, in bytes.
	pub const fn width(self) -> usize {
		match self {
			Primitive::Bool | Primitive::I8 | Primitive::U8 => 1,
			Primitive::I16 | Primitive::U16 => 2,
			Primitive::I32 | Primitive::U32 | Primitive::F32 => 4,
			Primitive::I64 | Primitive::U64 | Primitive::F64 => 8,
		}
	}

	pub const fn name(self) -> &'static str {
		match self {
			Primitive::Bool => "bool",
			Primitive::I8 => "i8",
			Primitive::U8 => "u8",
			Primitive::I16 => "i16",
			Primitive::U16 => "u16",
			Primitive::I32 => "i32",
			Primitive::U32 => "u32",
			Primitive::I64 => "i64",
			Primitive::U64 => "u64",
			Primitive::F32 => "f32",
			Primitive::F64 => "f64",
		}
	}
}

/// A named struct field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
	pub name: String,
	#[serde(rename = "type")]
	pub ty: TypeDescriptor,
}

/// A tagged union variant, selected when the discriminant equals `tag`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
	pub tag: u64,
	#[serde(rename = "type")]
	pub ty: TypeDescriptor,
}

/// The layout of a value, as agreed by host and guest ahead of time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDescriptor {
	Primitive(Primitive),
	/// `count` elements stored inline
	FixedArray {
		element: Box<TypeDescriptor>,
		count: usize,
	},
	/// A `{ address, length, capacity }` handle to out-of-line elements
	GrowableArray(Box<TypeDescriptor>),
	/// A `{ address, length }` handle to a fixed run of out-of-line elements
	HeapArray(Box<TypeDescriptor>),
	/// Packed fields in declaration order
	Struct(Vec<Field>),
	/// `{ discriminant, payload }` where the payload fits the largest variant
	TaggedUnion {
		discriminant: usize,
		variants: Vec<Variant>,
	},
	/// A single, possibly null, reference to one pointee
	Pointer(Box<TypeDescriptor>),
	/// A C-like enum stored as the index of its variant
	Enum {
		discriminant: usize,
		variants: Vec<String>,
	},
	/// UTF-8 text, laid out exactly like a growable array of `u8`
	String,
}

impl TypeDescriptor {
	pub fn primitive(primitive: Primitive) -> Self {
		TypeDescriptor::Primitive(primitive)
	}

	pub fn fixed_array(element: TypeDescriptor, count: usize) -> Self {
		TypeDescriptor::FixedArray {
			element: Box::new(element),
			count,
		}
	}

	pub fn growable(element: TypeDescriptor) -> Self {
		TypeDescriptor::GrowableArray(Box::new(element))
	}

	pub fn heap_array(element: TypeDescriptor) -> Self {
		TypeDescriptor::HeapArray(Box::new(element))
	}

	pub fn pointer(pointee: TypeDescriptor) -> Self {
		TypeDescriptor::Pointer(Box::new(pointee))
	}

	pub fn structure<I, S>(fields: I) -> Self
	where
		I: IntoIterator<Item = (S, TypeDescriptor)>,
		S: Into<String>,
	{
		TypeDescriptor::Struct(
			fields
				.into_iter()
				.map(|(name, ty)| Field {
					name: name.into(),
					ty,
				})
				.collect(),
		)
	}

	pub fn tagged_union<I>(discriminant: usize, variants: I) -> Self
	where
		I: IntoIterator<Item = (u64, TypeDescriptor)>,
	{
		TypeDescriptor::TaggedUnion {
			discriminant,
			variants: variants
				.into_iter()
				.map(|(tag, ty)| Variant {
					tag,
					ty,
				})
				.collect(),
		}
	}

	pub fn enumeration<I, S>(discriminant: usize, variants: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		TypeDescriptor::Enum {
			discriminant,
			variants: variants.into_iter().map(Into::into).collect(),
		}
	}

	/// Whether values of this type can hold an address into another region.
	///
	/// Address-free types are copied as plain bytes by the marshaling engine.
	pub fn contains_addresses(&self) -> bool {
		match self {
			TypeDescriptor::Primitive(_) | TypeDescriptor::Enum { .. } => false,
			TypeDescriptor::GrowableArray(_)
			| TypeDescriptor::HeapArray(_)
			| TypeDescriptor::Pointer(_)
			| TypeDescriptor::String => true,
			TypeDescriptor::FixedArray {
				element,
				..
			} => element.contains_addresses(),
			TypeDescriptor::Struct(fields) => fields.iter().any(|f| f.ty.contains_addresses()),
			TypeDescriptor::TaggedUnion {
				variants,
				..
			} => variants.iter().any(|v| v.ty.contains_addresses()),
		}
	}

	/// The variant selected by `tag`, if the union declares one.
	pub fn variant(&self, tag: u64) -> Option<&Variant> {
		match self {
			TypeDescriptor::TaggedUnion {
				variants,
				..
			} => variants.iter().find(|v| v.tag == tag),
			_ => None,
		}
	}

	/// The named field, if this is a struct declaring one.
	pub fn field(&self, name: &str) -> Option<&Field> {
		match self {
			TypeDescriptor::Struct(fields) => fields.iter().find(|f| f.name == name),
			_ => None,
		}
	}
}

impl From<Primitive> for TypeDescriptor {
	fn from(primitive: Primitive) -> Self {
		TypeDescriptor::Primitive(primitive)
	}
}

impl fmt::Display for TypeDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TypeDescriptor::Primitive(p) => f.write_str(p.name()),
			TypeDescriptor::FixedArray {
				element,
				count,
			} => write!(f, "[{element}; {count}]"),
			TypeDescriptor::GrowableArray(element) => write!(f, "vec<{element}>"),
			TypeDescriptor::HeapArray(element) => write!(f, "heap<{element}>"),
			TypeDescriptor::Pointer(pointee) => write!(f, "*{pointee}"),
			TypeDescriptor::String => f.write_str("string"),
			TypeDescriptor::Struct(fields) => {
				f.write_str("{ ")?;
				for (i, field) in fields.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{}: {}", field.name, field.ty)?;
				}
				f.write_str(" }")
			}
			TypeDescriptor::TaggedUnion {
				discriminant,
				variants,
			} => {
				write!(f, "union<u{}>(", discriminant * 8)?;
				for (i, variant) in variants.iter().enumerate() {
					if i > 0 {
						f.write_str(" | ")?;
					}
					write!(f, "{} => {}", variant.tag, variant.ty)?;
				}
				f.write_str(")")
			}
			TypeDescriptor::Enum {
				discriminant,
				variants,
			} => write!(f, "enum<u{}>({})", discriminant * 8, variants.join(" | ")),
		}
	}
}
