use tracing::trace;

use super::{rollback, write_uint};
use crate::controller::{MemoryController, Ptr};
use crate::descriptor::{Primitive, TypeDescriptor};
use crate::err::{Error, Result};
use crate::growable::{self, Growable};
use crate::layout;
use crate::value::Value;

/// Writes values into one address space, remembering every allocation it
/// makes so that a failed write can be undone.
pub(super) struct Encoder<'a, C: MemoryController + ?Sized> {
	ctrl: &'a mut C,
	allocations: Vec<Ptr>,
}

fn mismatch(ty: &TypeDescriptor, value: &Value) -> Error {
	Error::mismatch(format!("expected a value of {ty}, found {}", value.kind()))
}

impl<'a, C: MemoryController + ?Sized> Encoder<'a, C> {
	pub(super) fn new(ctrl: &'a mut C) -> Self {
		Self {
			ctrl,
			allocations: Vec::new(),
		}
	}

	pub(super) fn allocated(&self) -> usize {
		self.allocations.len()
	}

	pub(super) fn rollback(&mut self) {
		rollback(self.ctrl, &mut self.allocations);
	}

	fn alloc(&mut self, len: u32) -> Result<Ptr> {
		let ptr = self.ctrl.alloc(len)?;
		self.allocations.push(ptr);
		Ok(ptr)
	}

	/// Allocate a region for `value` and write it there.
	pub(super) fn place(&mut self, value: &Value, ty: &TypeDescriptor) -> Result<Ptr> {
		let size = layout::size_of(ty)?;
		let mut bytes = vec![0u8; size];
		self.encode(value, ty, &mut bytes)?;
		let ptr = self.alloc(size as u32)?;
		self.ctrl.mut_mem(ptr, size as u32)?.copy_from_slice(&bytes);
		trace!(%ptr, size, "placed {ty}");
		Ok(ptr)
	}

	/// Write the out-of-line buffer of a growable array, returning its handle.
	fn buffer(&mut self, items: &[Value], element: &TypeDescriptor) -> Result<Growable> {
		if items.is_empty() {
			return Ok(Growable::EMPTY);
		}
		let element_size = layout::size_of(element)?;
		let len = growable::byte_len(self.ctrl.side(), element_size, items.len() as u64)?;
		let mut bytes = vec![0u8; len as usize];
		for (item, out) in items.iter().zip(bytes.chunks_exact_mut(element_size)) {
			self.encode(item, element, out)?;
		}
		let ptr = self.alloc(len)?;
		self.ctrl.mut_mem(ptr, len)?.copy_from_slice(&bytes);
		Ok(Growable {
			ptr,
			len: items.len() as u64,
			capacity: items.len() as u64,
		})
	}

	/// Encode `value` into `out`, which is exactly `size_of(ty)` bytes long.
	fn encode(&mut self, value: &Value, ty: &TypeDescriptor, out: &mut [u8]) -> Result<()> {
		match (ty, value) {
			(TypeDescriptor::Primitive(p), v) => scalar(*p, v, out),
			(
				TypeDescriptor::FixedArray {
					element,
					count,
				},
				Value::Array(items),
			) => {
				if items.len() != *count {
					return Err(Error::mismatch(format!(
						"expected {count} elements for {ty}, found {}",
						items.len()
					)));
				}
				let element_size = layout::size_of(element)?;
				for (item, out) in items.iter().zip(out.chunks_exact_mut(element_size)) {
					self.encode(item, element, out)?;
				}
				Ok(())
			}
			(TypeDescriptor::GrowableArray(element), Value::Vector(items)) => {
				let handle = self.buffer(items, element)?;
				out.copy_from_slice(&handle.encode());
				Ok(())
			}
			(TypeDescriptor::HeapArray(element), Value::Vector(items)) => {
				let handle = self.buffer(items, element)?;
				out.copy_from_slice(&handle.encode_heap());
				Ok(())
			}
			(TypeDescriptor::String, Value::String(text)) => {
				let bytes: Vec<Value> = text.bytes().map(Value::U8).collect();
				let handle = self.buffer(&bytes, &Primitive::U8.into())?;
				out.copy_from_slice(&handle.encode());
				Ok(())
			}
			(TypeDescriptor::Struct(fields), Value::Struct(values)) => {
				if values.len() != fields.len() {
					return Err(Error::mismatch(format!(
						"expected {} fields for {ty}, found {}",
						fields.len(),
						values.len()
					)));
				}
				let mut offset = 0;
				for (field, value) in fields.iter().zip(values) {
					let size = layout::size_of(&field.ty)?;
					self.encode(value, &field.ty, &mut out[offset..offset + size])?;
					offset += size;
				}
				Ok(())
			}
			(
				TypeDescriptor::TaggedUnion {
					discriminant,
					..
				},
				Value::Union {
					tag,
					value,
				},
			) => {
				let variant = ty
					.variant(*tag)
					.ok_or_else(|| Error::mismatch(format!("tag {tag} is not a variant of {ty}")))?;
				let size = layout::size_of(&variant.ty)?;
				write_uint(&mut out[..*discriminant], *tag);
				self.encode(value, &variant.ty, &mut out[*discriminant..*discriminant + size])
			}
			(TypeDescriptor::Pointer(_), Value::Pointer(None)) => Ok(()),
			(TypeDescriptor::Pointer(pointee), Value::Pointer(Some(value))) => {
				let ptr = self.place(value, pointee)?;
				out.copy_from_slice(&ptr.to_slot());
				Ok(())
			}
			(
				TypeDescriptor::Enum {
					variants,
					..
				},
				Value::Enum(name),
			) => {
				let index = variants
					.iter()
					.position(|v| v == name)
					.ok_or_else(|| Error::mismatch(format!("'{name}' is not a variant of {ty}")))?;
				write_uint(out, index as u64);
				Ok(())
			}
			_ => Err(mismatch(ty, value)),
		}
	}
}

fn scalar(p: Primitive, value: &Value, out: &mut [u8]) -> Result<()> {
	match (p, value) {
		(Primitive::Bool, Value::Bool(v)) => out.copy_from_slice(&[u8::from(*v)]),
		(Primitive::I8, Value::I8(v)) => out.copy_from_slice(&v.to_le_bytes()),
		(Primitive::U8, Value::U8(v)) => out.copy_from_slice(&v.to_le_bytes()),
		(Primitive::I16, Value::I16(v)) => out.copy_from_slice(&v.to_le_bytes()),
		(Primitive::U16, Value::U16(v)) => out.copy_from_slice(&v.to_le_bytes()),
		(Primitive::I32, Value::I32(v)) => out.copy_from_slice(&v.to_le_bytes()),
		(Primitive::U32, Value::U32(v)) => out.copy_from_slice(&v.to_le_bytes()),
		(Primitive::I64, Value::I64(v)) => out.copy_from_slice(&v.to_le_bytes()),
		(Primitive::U64, Value::U64(v)) => out.copy_from_slice(&v.to_le_bytes()),
		(Primitive::F32, Value::F32(v)) => out.copy_from_slice(&v.to_le_bytes()),
		(Primitive::F64, Value::F64(v)) => out.copy_from_slice(&v.to_le_bytes()),
		_ => return Err(mismatch(&p.into(), value)),
	}
	Ok(())
}
