use super::{Visit, buffer_len, check_region, read_slot, read_uint};
use crate::controller::{MemoryController, Ptr};
use crate::descriptor::{Primitive, TypeDescriptor};
use crate::err::{Error, Result};
use crate::growable::Growable;
use crate::layout;
use crate::value::Value;

/// Reads values out of one address space. Nothing read from memory is
/// trusted: every address, length and discriminant is checked before use.
pub(super) struct Decoder<'a, C: MemoryController + ?Sized> {
	ctrl: &'a C,
	visitor: Option<&'a mut dyn Visit>,
}

impl<'a, C: MemoryController + ?Sized> Decoder<'a, C> {
	pub(super) fn new(ctrl: &'a C, visitor: Option<&'a mut dyn Visit>) -> Self {
		Self {
			ctrl,
			visitor,
		}
	}

	pub(super) fn root(&mut self, ptr: Ptr, ty: &TypeDescriptor) -> Result<Value> {
		if ptr.is_null() {
			return Err(Error::mismatch(format!("expected {ty}, found a null address")));
		}
		let size = layout::size_of(ty)?;
		check_region(self.ctrl, ptr, size as u64, true, ty)?;
		let ctrl = self.ctrl;
		let bytes = ctrl.mem(ptr, size as u32)?;
		self.decode(bytes, ty, "")
	}

	/// The path of a child node, only built when someone is watching.
	fn child(&self, path: &str, segment: &dyn std::fmt::Display) -> String {
		match self.visitor {
			None => String::new(),
			Some(_) if path.is_empty() => segment.to_string(),
			Some(_) => format!("{path}.{segment}"),
		}
	}

	fn element(&self, path: &str, index: u64) -> String {
		match self.visitor {
			None => String::new(),
			Some(_) => format!("{path}[{index}]"),
		}
	}

	fn decode(&mut self, bytes: &[u8], ty: &TypeDescriptor, path: &str) -> Result<Value> {
		if let Some(visitor) = self.visitor.as_mut() {
			visitor.visit(path, ty);
		}
		match ty {
			TypeDescriptor::Primitive(p) => scalar(*p, bytes),
			TypeDescriptor::FixedArray {
				element,
				..
			} => {
				let element_size = layout::size_of(element)?;
				let mut items = Vec::with_capacity(bytes.len() / element_size);
				for (i, chunk) in bytes.chunks_exact(element_size).enumerate() {
					let path = self.child(path, &i);
					items.push(self.decode(chunk, element, &path)?);
				}
				Ok(Value::Array(items))
			}
			TypeDescriptor::GrowableArray(element) => {
				let handle = Growable::decode(bytes)?;
				let items = self.elements(&handle, element, path)?;
				Ok(Value::Vector(items))
			}
			TypeDescriptor::HeapArray(element) => {
				let handle = Growable::decode_heap(bytes)?;
				let items = self.elements(&handle, element, path)?;
				Ok(Value::Vector(items))
			}
			TypeDescriptor::String => {
				let handle = Growable::decode(bytes)?;
				handle.check()?;
				if handle.len == 0 {
					return Ok(Value::String(String::new()));
				}
				let len = buffer_len(&handle, 1, ty)?;
				check_region(self.ctrl, handle.ptr, len.into(), false, ty)?;
				let ctrl = self.ctrl;
				let text = std::str::from_utf8(ctrl.mem(handle.ptr, len)?)
					.map_err(|e| Error::mismatch(format!("string at {} is not UTF-8: {e}", handle.ptr)))?;
				Ok(Value::String(text.to_owned()))
			}
			TypeDescriptor::Struct(fields) => {
				let mut values = Vec::with_capacity(fields.len());
				let mut offset = 0;
				for field in fields {
					let size = layout::size_of(&field.ty)?;
					let path = self.child(path, &field.name);
					values.push(self.decode(&bytes[offset..offset + size], &field.ty, &path)?);
					offset += size;
				}
				Ok(Value::Struct(values))
			}
			TypeDescriptor::TaggedUnion {
				discriminant,
				..
			} => {
				let tag = read_uint(&bytes[..*discriminant]);
				let variant = ty
					.variant(tag)
					.ok_or_else(|| Error::mismatch(format!("unknown tag {tag} for {ty}")))?;
				let size = layout::size_of(&variant.ty)?;
				let path = self.child(path, &tag);
				let payload = &bytes[*discriminant..*discriminant + size];
				Ok(Value::union(tag, self.decode(payload, &variant.ty, &path)?))
			}
			TypeDescriptor::Pointer(pointee) => {
				let ptr = read_slot(bytes)?;
				if ptr.is_null() {
					return Ok(Value::Pointer(None));
				}
				let size = layout::size_of(pointee)?;
				check_region(self.ctrl, ptr, size as u64, false, pointee)?;
				let ctrl = self.ctrl;
				let inner = ctrl.mem(ptr, size as u32)?;
				let path = self.child(path, &"*");
				Ok(Value::pointer(self.decode(inner, pointee, &path)?))
			}
			TypeDescriptor::Enum {
				variants,
				..
			} => {
				let index = read_uint(bytes);
				usize::try_from(index)
					.ok()
					.and_then(|i| variants.get(i))
					.map(|name| Value::Enum(name.clone()))
					.ok_or_else(|| Error::mismatch(format!("unknown discriminant {index} for {ty}")))
			}
		}
	}

	/// Decode the live elements of a growable array.
	fn elements(&mut self, handle: &Growable, element: &TypeDescriptor, path: &str) -> Result<Vec<Value>> {
		handle.check()?;
		if handle.len == 0 {
			return Ok(Vec::new());
		}
		let element_size = layout::size_of(element)?;
		let len = buffer_len(handle, element_size, element)?;
		check_region(self.ctrl, handle.ptr, len.into(), false, element)?;
		let ctrl = self.ctrl;
		let bytes = ctrl.mem(handle.ptr, len)?;
		let mut items = Vec::with_capacity(handle.len as usize);
		for (i, chunk) in bytes.chunks_exact(element_size).enumerate() {
			let path = self.element(path, i as u64);
			items.push(self.decode(chunk, element, &path)?);
		}
		Ok(items)
	}
}

fn scalar(p: Primitive, bytes: &[u8]) -> Result<Value> {
	let fixed = |n: usize| -> Result<[u8; 8]> {
		let mut out = [0u8; 8];
		let src = bytes
			.get(..n)
			.ok_or_else(|| Error::mismatch(format!("truncated {}", p.name())))?;
		out[..n].copy_from_slice(src);
		Ok(out)
	};
	let raw = fixed(p.width())?;
	Ok(match p {
		Primitive::Bool => Value::Bool(raw[0] != 0),
		Primitive::I8 => Value::I8(i8::from_le_bytes([raw[0]])),
		Primitive::U8 => Value::U8(raw[0]),
		Primitive::I16 => Value::I16(i16::from_le_bytes([raw[0], raw[1]])),
		Primitive::U16 => Value::U16(u16::from_le_bytes([raw[0], raw[1]])),
		Primitive::I32 => Value::I32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
		Primitive::U32 => Value::U32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
		Primitive::F32 => Value::F32(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
		Primitive::I64 => Value::I64(i64::from_le_bytes(raw)),
		Primitive::U64 => Value::U64(u64::from_le_bytes(raw)),
		Primitive::F64 => Value::F64(f64::from_le_bytes(raw)),
	})
}
