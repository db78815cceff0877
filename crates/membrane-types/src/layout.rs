//! The packed layout rules.
//!
//! Every size and offset is a pure function of the [`TypeDescriptor`]: no
//! compiler-specific padding is ever inserted, so host and guest may be built
//! by different toolchains and still agree byte for byte.
//!
//! | type             | size                                   | align            |
//! |------------------|----------------------------------------|------------------|
//! | primitive        | width                                  | width            |
//! | `[E; n]`         | `size(E) * n`                          | `align(E)`       |
//! | struct           | sum of field sizes                     | 1                |
//! | tagged union     | discriminant + largest variant         | largest of both  |
//! | growable/string  | 24 (`address`, `length`, `capacity`)   | 8                |
//! | heap array       | 16 (`address`, `length`)               | 8                |
//! | pointer          | 8                                      | 8                |
//! | enum             | discriminant                           | discriminant     |
//!
//! Every function validates the descriptor as it walks it, so a malformed
//! descriptor is reported as [`Error::Schema`] before anything is allocated.
//! That includes descriptors whose addresses nest deeper than
//! [`cnf::MAX_NESTING`].

use std::collections::BTreeSet;

use crate::cnf;
use crate::descriptor::TypeDescriptor;
use crate::err::{Error, Result};

/// Width of an address slot.
pub const ADDRESS_WIDTH: usize = 8;

/// Width of a growable array handle.
pub const GROWABLE_WIDTH: usize = ADDRESS_WIDTH + 8 + 8;

/// Offset of the length inside a growable array handle.
pub const GROWABLE_LEN_OFFSET: usize = ADDRESS_WIDTH;

/// Offset of the capacity inside a growable array handle.
pub const GROWABLE_CAPACITY_OFFSET: usize = ADDRESS_WIDTH + 8;

/// Width of a heap array handle.
pub const HEAP_ARRAY_WIDTH: usize = ADDRESS_WIDTH + 8;

/// The discriminant widths a union or enum may declare.
pub const DISCRIMINANT_WIDTHS: [usize; 4] = [1, 2, 4, 8];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Measure {
	size: usize,
	align: usize,
}

/// The number of bytes a value of `ty` occupies inline.
pub fn size_of(ty: &TypeDescriptor) -> Result<usize> {
	measure(ty).map(|m| m.size)
}

/// The natural alignment of `ty`. Informational only: packed values are
/// always read and written unaligned.
pub fn align_of(ty: &TypeDescriptor) -> Result<usize> {
	measure(ty).map(|m| m.align)
}

/// Check the whole descriptor tree for contradictions.
pub fn validate(ty: &TypeDescriptor) -> Result<()> {
	measure(ty).map(|_| ())
}

/// The offset of an inline member, addressed by a dotted path.
///
/// Each path segment is a field name for structs, an element index for
/// fixed arrays, or a variant tag for tagged unions (every variant payload
/// starts right after the discriminant). Paths cannot descend through
/// pointers or growable arrays, whose contents are not inline.
pub fn offset_of(ty: &TypeDescriptor, path: &str) -> Result<usize> {
	validate(ty)?;
	let mut offset = 0;
	let mut current = ty;
	for segment in path.split('.').filter(|s| !s.is_empty()) {
		let (inner, at) = member(current, segment)?;
		offset += at;
		current = inner;
	}
	Ok(offset)
}

/// A flattened view of the inline members of a type, used for layout reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
	pub path: String,
	pub offset: usize,
	pub size: usize,
	pub ty: String,
}

/// List every inline struct member of `ty` in declaration order, descending
/// into nested structs.
pub fn slots(ty: &TypeDescriptor) -> Result<Vec<Slot>> {
	validate(ty)?;
	let mut out = Vec::new();
	collect_slots(ty, "", 0, &mut out)?;
	Ok(out)
}

fn collect_slots(ty: &TypeDescriptor, prefix: &str, base: usize, out: &mut Vec<Slot>) -> Result<()> {
	let TypeDescriptor::Struct(fields) = ty else {
		return Ok(());
	};
	let mut offset = base;
	for field in fields {
		let path = if prefix.is_empty() {
			field.name.clone()
		} else {
			format!("{prefix}.{}", field.name)
		};
		let size = size_of(&field.ty)?;
		out.push(Slot {
			path: path.clone(),
			offset,
			size,
			ty: field.ty.to_string(),
		});
		collect_slots(&field.ty, &path, offset, out)?;
		offset += size;
	}
	Ok(())
}

fn member<'a>(ty: &'a TypeDescriptor, segment: &str) -> Result<(&'a TypeDescriptor, usize)> {
	match ty {
		TypeDescriptor::Struct(fields) => {
			let mut offset = 0;
			for field in fields {
				if field.name == segment {
					return Ok((&field.ty, offset));
				}
				offset += size_of(&field.ty)?;
			}
			Err(Error::schema(format!("no field named '{segment}' in {ty}")))
		}
		TypeDescriptor::FixedArray {
			element,
			count,
		} => {
			let index: usize = segment
				.parse()
				.map_err(|_| Error::schema(format!("'{segment}' is not an array index")))?;
			if index >= *count {
				return Err(Error::schema(format!(
					"index {index} is out of bounds for an array of {count}"
				)));
			}
			Ok((element, index * size_of(element)?))
		}
		TypeDescriptor::TaggedUnion {
			discriminant,
			variants,
		} => {
			let tag: u64 = segment
				.parse()
				.map_err(|_| Error::schema(format!("'{segment}' is not a variant tag")))?;
			variants
				.iter()
				.find(|v| v.tag == tag)
				.map(|v| (&v.ty, *discriminant))
				.ok_or_else(|| Error::schema(format!("no variant with tag {tag} in {ty}")))
		}
		_ => Err(Error::schema(format!("cannot address '{segment}' inside {ty}"))),
	}
}

fn check_discriminant(width: usize, max_value: u64, what: &str) -> Result<()> {
	if !DISCRIMINANT_WIDTHS.contains(&width) {
		return Err(Error::schema(format!("{what} discriminant width must be 1, 2, 4 or 8, not {width}")));
	}
	if width < 8 && max_value >> (width * 8) != 0 {
		return Err(Error::schema(format!(
			"{what} discriminant value {max_value} does not fit in {width} bytes"
		)));
	}
	Ok(())
}

fn measure(ty: &TypeDescriptor) -> Result<Measure> {
	measure_nested(ty, 0)
}

/// Descend one address level below `depth`.
fn deeper(depth: usize) -> Result<usize> {
	let max = *cnf::MAX_NESTING;
	if depth >= max {
		return Err(Error::schema(format!("addresses nest more than {max} levels deep")));
	}
	Ok(depth + 1)
}

fn measure_nested(ty: &TypeDescriptor, depth: usize) -> Result<Measure> {
	let m = match ty {
		TypeDescriptor::Primitive(p) => Measure {
			size: p.width(),
			align: p.width(),
		},
		TypeDescriptor::FixedArray {
			element,
			count,
		} => {
			if *count == 0 {
				return Err(Error::schema("fixed arrays must have at least one element"));
			}
			let inner = measure_nested(element, depth)?;
			Measure {
				size: inner
					.size
					.checked_mul(*count)
					.ok_or_else(|| Error::schema(format!("size of [{element}; {count}] overflows")))?,
				align: inner.align,
			}
		}
		TypeDescriptor::GrowableArray(element) => {
			// The elements live out of line, but must still be well formed.
			measure_nested(element, deeper(depth)?)?;
			Measure {
				size: GROWABLE_WIDTH,
				align: ADDRESS_WIDTH,
			}
		}
		TypeDescriptor::HeapArray(element) => {
			measure_nested(element, deeper(depth)?)?;
			Measure {
				size: HEAP_ARRAY_WIDTH,
				align: ADDRESS_WIDTH,
			}
		}
		TypeDescriptor::String => {
			deeper(depth)?;
			Measure {
				size: GROWABLE_WIDTH,
				align: ADDRESS_WIDTH,
			}
		}
		TypeDescriptor::Pointer(pointee) => {
			measure_nested(pointee, deeper(depth)?)?;
			Measure {
				size: ADDRESS_WIDTH,
				align: ADDRESS_WIDTH,
			}
		}
		TypeDescriptor::Struct(fields) => {
			if fields.is_empty() {
				return Err(Error::schema("structs must declare at least one field"));
			}
			let mut names = BTreeSet::new();
			let mut size = 0usize;
			for field in fields {
				if !names.insert(field.name.as_str()) {
					return Err(Error::schema(format!("duplicate field '{}'", field.name)));
				}
				size = size
					.checked_add(measure_nested(&field.ty, depth)?.size)
					.ok_or_else(|| Error::schema("struct size overflows"))?;
			}
			Measure {
				size,
				align: 1,
			}
		}
		TypeDescriptor::TaggedUnion {
			discriminant,
			variants,
		} => {
			if variants.is_empty() {
				return Err(Error::schema("tagged unions must declare at least one variant"));
			}
			let max_tag = variants.iter().map(|v| v.tag).max().unwrap_or_default();
			check_discriminant(*discriminant, max_tag, "union")?;
			let mut tags = BTreeSet::new();
			let mut payload = Measure {
				size: 0,
				align: 1,
			};
			for variant in variants {
				if !tags.insert(variant.tag) {
					return Err(Error::schema(format!("duplicate union tag {}", variant.tag)));
				}
				let m = measure_nested(&variant.ty, depth)?;
				payload.size = payload.size.max(m.size);
				payload.align = payload.align.max(m.align);
			}
			Measure {
				size: discriminant
					.checked_add(payload.size)
					.ok_or_else(|| Error::schema("union size overflows"))?,
				align: payload.align.max(*discriminant),
			}
		}
		TypeDescriptor::Enum {
			discriminant,
			variants,
		} => {
			if variants.is_empty() {
				return Err(Error::schema("enums must declare at least one variant"));
			}
			let mut names = BTreeSet::new();
			for name in variants {
				if !names.insert(name.as_str()) {
					return Err(Error::schema(format!("duplicate enum variant '{name}'")));
				}
			}
			check_discriminant(*discriminant, variants.len() as u64 - 1, "enum")?;
			Measure {
				size: *discriminant,
				align: *discriminant,
			}
		}
	};
	if m.size > u32::MAX as usize {
		return Err(Error::schema(format!("{ty} does not fit in a 32-bit address space")));
	}
	Ok(m)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::descriptor::Primitive;

	fn host_to_guest() -> TypeDescriptor {
		TypeDescriptor::structure([
			("a", Primitive::U8.into()),
			("b", Primitive::F64.into()),
			("c", Primitive::F64.into()),
		])
	}

	#[rstest]
	#[case::bool(Primitive::Bool.into(), 1, 1)]
	#[case::u16(Primitive::U16.into(), 2, 2)]
	#[case::f32(Primitive::F32.into(), 4, 4)]
	#[case::i64(Primitive::I64.into(), 8, 8)]
	#[case::array(TypeDescriptor::fixed_array(Primitive::U32.into(), 5), 20, 4)]
	#[case::growable(TypeDescriptor::growable(host_to_guest()), 24, 8)]
	#[case::string(TypeDescriptor::String, 24, 8)]
	#[case::heap_array(TypeDescriptor::heap_array(host_to_guest()), 16, 8)]
	#[case::pointer(TypeDescriptor::pointer(host_to_guest()), 8, 8)]
	#[case::packed_struct(host_to_guest(), 17, 1)]
	#[case::enumeration(TypeDescriptor::enumeration(2, ["Red", "Green"]), 2, 2)]
	#[case::union(
		TypeDescriptor::tagged_union(4, [(0, Primitive::U8.into()), (1, host_to_guest())]),
		21,
		4
	)]
	fn sizes_and_alignments(#[case] ty: TypeDescriptor, #[case] size: usize, #[case] align: usize) {
		assert_eq!(size_of(&ty).unwrap(), size);
		assert_eq!(align_of(&ty).unwrap(), align);
	}

	#[test]
	fn struct_offsets_are_packed() {
		let ty = host_to_guest();
		assert_eq!(offset_of(&ty, "a").unwrap(), 0);
		assert_eq!(offset_of(&ty, "b").unwrap(), 1);
		assert_eq!(offset_of(&ty, "c").unwrap(), 9);
	}

	#[test]
	fn nested_paths_descend_inline_members() {
		let ty = TypeDescriptor::structure([
			("head", Primitive::U16.into()),
			("items", TypeDescriptor::fixed_array(host_to_guest(), 3)),
			(
				"shape",
				TypeDescriptor::tagged_union(1, [(7, host_to_guest()), (9, Primitive::U64.into())]),
			),
		]);
		assert_eq!(offset_of(&ty, "items.2.c").unwrap(), 2 + 2 * 17 + 9);
		assert_eq!(offset_of(&ty, "shape.7.b").unwrap(), 2 + 3 * 17 + 1 + 1);
		assert_eq!(offset_of(&ty, "shape.9").unwrap(), 2 + 3 * 17 + 1);
		assert_eq!(offset_of(&ty, "").unwrap(), 0);
	}

	#[test]
	fn paths_do_not_follow_addresses() {
		let ty = TypeDescriptor::structure([("p", TypeDescriptor::pointer(host_to_guest()))]);
		assert!(matches!(offset_of(&ty, "p.a"), Err(Error::Schema(_))));
		assert!(matches!(offset_of(&ty, "missing"), Err(Error::Schema(_))));
	}

	#[test]
	fn layout_is_deterministic() {
		let ty = TypeDescriptor::structure([
			("v", TypeDescriptor::growable(host_to_guest())),
			("u", TypeDescriptor::tagged_union(2, [(1, Primitive::F32.into())])),
		]);
		let first = (size_of(&ty).unwrap(), offset_of(&ty, "u").unwrap());
		for _ in 0..16 {
			assert_eq!((size_of(&ty).unwrap(), offset_of(&ty, "u").unwrap()), first);
		}
		assert_eq!(size_of(&ty.clone()).unwrap(), first.0);
	}

	#[rstest]
	#[case::empty_struct(TypeDescriptor::Struct(vec![]))]
	#[case::empty_union(TypeDescriptor::tagged_union(1, Vec::<(u64, TypeDescriptor)>::new()))]
	#[case::empty_enum(TypeDescriptor::enumeration(1, Vec::<String>::new()))]
	#[case::zero_count(TypeDescriptor::fixed_array(Primitive::U8.into(), 0))]
	#[case::nested_zero_count(TypeDescriptor::growable(TypeDescriptor::fixed_array(Primitive::U8.into(), 0)))]
	#[case::bad_width(TypeDescriptor::tagged_union(3, [(0, Primitive::U8.into())]))]
	#[case::tag_too_wide(TypeDescriptor::tagged_union(1, [(256, Primitive::U8.into())]))]
	#[case::duplicate_tag(TypeDescriptor::tagged_union(1, [(1, Primitive::U8.into()), (1, Primitive::U16.into())]))]
	#[case::duplicate_field(TypeDescriptor::structure([("a", Primitive::U8.into()), ("a", Primitive::U8.into())]))]
	#[case::duplicate_variant(TypeDescriptor::enumeration(1, ["A", "A"]))]
	#[case::too_large(TypeDescriptor::fixed_array(Primitive::U64.into(), usize::MAX / 4))]
	fn malformed_descriptors_are_schema_errors(#[case] ty: TypeDescriptor) {
		assert!(matches!(validate(&ty), Err(Error::Schema(_))), "{ty:?} should be rejected");
		assert!(matches!(size_of(&ty), Err(Error::Schema(_))));
	}

	#[test]
	fn addresses_may_nest_up_to_the_limit() {
		let chain = |depth: usize| {
			(0..depth).fold(TypeDescriptor::from(Primitive::U8), |ty, _| TypeDescriptor::pointer(ty))
		};
		let max = *cnf::MAX_NESTING;
		assert_eq!(size_of(&chain(max)).unwrap(), ADDRESS_WIDTH);
		assert!(matches!(validate(&chain(max + 1)), Err(Error::Schema(_))));
		let vectors = (0..max).fold(TypeDescriptor::String, |ty, _| TypeDescriptor::growable(ty));
		assert!(matches!(validate(&vectors), Err(Error::Schema(_))));
		// Inline members do not count towards the limit
		let inline = (0..max + 1).fold(chain(max), |ty, _| TypeDescriptor::structure([("x", ty)]));
		assert!(validate(&inline).is_ok());
	}

	#[test]
	fn slots_flatten_nested_structs() {
		let ty = TypeDescriptor::structure([
			("a", Primitive::U8.into()),
			("inner", TypeDescriptor::structure([("x", Primitive::U32.into()), ("y", TypeDescriptor::String)])),
		]);
		let paths: Vec<(String, usize, usize)> =
			slots(&ty).unwrap().into_iter().map(|s| (s.path, s.offset, s.size)).collect();
		assert_eq!(
			paths,
			vec![
				("a".to_string(), 0, 1),
				("inner".to_string(), 1, 28),
				("inner.x".to_string(), 1, 4),
				("inner.y".to_string(), 5, 24),
			]
		);
	}
}
