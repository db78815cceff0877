use tracing::trace;

use super::{buffer_len, check_region, read_slot, read_uint, rollback};
use crate::controller::{MemoryController, Ptr};
use crate::descriptor::{Primitive, TypeDescriptor};
use crate::err::{Error, Result};
use crate::growable::Growable;
use crate::layout;

/// Copies raw values from one address space into another, replacing every
/// address with the address of the copy made on the destination side.
pub(super) struct Rebaser<'a, S: MemoryController + ?Sized, D: MemoryController + ?Sized> {
	src: &'a S,
	dst: &'a mut D,
	allocations: Vec<Ptr>,
}

impl<'a, S, D> Rebaser<'a, S, D>
where
	S: MemoryController + ?Sized,
	D: MemoryController + ?Sized,
{
	pub(super) fn new(src: &'a S, dst: &'a mut D) -> Self {
		Self {
			src,
			dst,
			allocations: Vec::new(),
		}
	}

	pub(super) fn rollback(&mut self) {
		rollback(self.dst, &mut self.allocations);
	}

	pub(super) fn root(&mut self, ptr: Ptr, ty: &TypeDescriptor) -> Result<Ptr> {
		if ptr.is_null() {
			return Err(Error::mismatch(format!("expected {ty}, found a null address")));
		}
		let size = layout::size_of(ty)?;
		check_region(self.src, ptr, size as u64, true, ty)?;
		self.copy(ptr, ty, size as u32)
	}

	/// Copy `len` bytes at `ptr` into a fresh destination allocation,
	/// rebasing the addresses a `ty` holds.
	fn copy(&mut self, ptr: Ptr, ty: &TypeDescriptor, len: u32) -> Result<Ptr> {
		let mut bytes = self.src.mem(ptr, len)?.to_vec();
		self.rebase(&mut bytes, ty)?;
		self.write(&bytes)
	}

	fn write(&mut self, bytes: &[u8]) -> Result<Ptr> {
		let len = bytes.len() as u32;
		let ptr = self.dst.alloc(len)?;
		self.allocations.push(ptr);
		self.dst.mut_mem(ptr, len)?.copy_from_slice(bytes);
		trace!(to = %ptr, len, "copied");
		Ok(ptr)
	}

	fn rebase(&mut self, bytes: &mut [u8], ty: &TypeDescriptor) -> Result<()> {
		match ty {
			TypeDescriptor::Primitive(_) => Ok(()),
			TypeDescriptor::Enum {
				variants,
				..
			} => {
				let index = read_uint(bytes);
				if index >= variants.len() as u64 {
					return Err(Error::mismatch(format!("unknown discriminant {index} for {ty}")));
				}
				Ok(())
			}
			TypeDescriptor::FixedArray {
				element,
				..
			} => self.elements(bytes, element),
			TypeDescriptor::Struct(fields) => {
				let mut offset = 0;
				for field in fields {
					let size = layout::size_of(&field.ty)?;
					self.rebase(&mut bytes[offset..offset + size], &field.ty)?;
					offset += size;
				}
				Ok(())
			}
			TypeDescriptor::TaggedUnion {
				discriminant,
				..
			} => {
				let tag = read_uint(&bytes[..*discriminant]);
				let variant = ty
					.variant(tag)
					.ok_or_else(|| Error::mismatch(format!("unknown tag {tag} for {ty}")))?;
				let end = *discriminant + layout::size_of(&variant.ty)?;
				self.rebase(&mut bytes[*discriminant..end], &variant.ty)?;
				// Bytes past the active variant are never interpreted and never cross
				bytes[end..].fill(0);
				Ok(())
			}
			TypeDescriptor::Pointer(pointee) => {
				let ptr = read_slot(bytes)?;
				if ptr.is_null() {
					return Ok(());
				}
				let size = layout::size_of(pointee)?;
				check_region(self.src, ptr, size as u64, false, pointee)?;
				let copy = self.copy(ptr, pointee, size as u32)?;
				bytes.copy_from_slice(&copy.to_slot());
				Ok(())
			}
			TypeDescriptor::GrowableArray(element) => {
				let handle = self.buffer(Growable::decode(bytes)?, element)?;
				bytes.copy_from_slice(&handle.encode());
				Ok(())
			}
			TypeDescriptor::HeapArray(element) => {
				let handle = self.buffer(Growable::decode_heap(bytes)?, element)?;
				bytes.copy_from_slice(&handle.encode_heap());
				Ok(())
			}
			TypeDescriptor::String => {
				let handle = Growable::decode(bytes)?;
				handle.check()?;
				if handle.len > 0 {
					let len = buffer_len(&handle, 1, ty)?;
					check_region(self.src, handle.ptr, len.into(), false, ty)?;
					let text = self.src.mem(handle.ptr, len)?;
					if let Err(e) = std::str::from_utf8(text) {
						return Err(Error::mismatch(format!("string at {} is not UTF-8: {e}", handle.ptr)));
					}
				}
				let handle = self.buffer(handle, &Primitive::U8.into())?;
				bytes.copy_from_slice(&handle.encode());
				Ok(())
			}
		}
	}

	/// Rebase each element of an inline run of `element`s.
	fn elements(&mut self, bytes: &mut [u8], element: &TypeDescriptor) -> Result<()> {
		if let TypeDescriptor::Primitive(_) = element {
			return Ok(());
		}
		let element_size = layout::size_of(element)?;
		for chunk in bytes.chunks_exact_mut(element_size) {
			self.rebase(chunk, element)?;
		}
		Ok(())
	}

	/// Copy the live elements behind `handle`.
	fn buffer(&mut self, handle: Growable, element: &TypeDescriptor) -> Result<Growable> {
		handle.check()?;
		if handle.len == 0 {
			return Ok(Growable::EMPTY);
		}
		let element_size = layout::size_of(element)?;
		let len = buffer_len(&handle, element_size, element)?;
		check_region(self.src, handle.ptr, len.into(), false, element)?;
		let mut data = self.src.mem(handle.ptr, len)?.to_vec();
		self.elements(&mut data, element)?;
		let ptr = self.write(&data)?;
		Ok(Growable {
			ptr,
			len: handle.len,
			capacity: handle.len,
		})
	}
}
