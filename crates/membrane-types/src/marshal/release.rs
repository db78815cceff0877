use tracing::warn;

use super::{buffer_len, read_slot, read_uint};
use crate::controller::{MemoryController, Ptr};
use crate::descriptor::TypeDescriptor;
use crate::err::{Error, Result};
use crate::growable::Growable;
use crate::layout;

/// Frees a value and everything it owns, children before parents, carrying
/// on past failures so that one corrupt subtree does not leak the rest.
pub(super) struct Releaser<'a, C: MemoryController + ?Sized> {
	ctrl: &'a mut C,
	freed: usize,
	error: Option<Error>,
}

impl<'a, C: MemoryController + ?Sized> Releaser<'a, C> {
	pub(super) fn new(ctrl: &'a mut C) -> Self {
		Self {
			ctrl,
			freed: 0,
			error: None,
		}
	}

	/// The number of regions freed, or the first failure.
	pub(super) fn finish(self) -> Result<usize> {
		match self.error {
			Some(e) => Err(e),
			None => Ok(self.freed),
		}
	}

	fn fail(&mut self, e: Error) {
		warn!(side = %self.ctrl.side(), "Failed to release part of a value: {e}");
		if self.error.is_none() {
			self.error = Some(e);
		}
	}

	fn free(&mut self, ptr: Ptr) {
		match self.ctrl.free(ptr) {
			Ok(()) => self.freed += 1,
			Err(e) => self.fail(e),
		}
	}

	pub(super) fn root(&mut self, ptr: Ptr, ty: &TypeDescriptor) {
		if ptr.is_null() {
			self.fail(Error::mismatch(format!("cannot release {ty} at a null address")));
			return;
		}
		self.region(ptr, ty);
	}

	/// Release what the `ty` at `ptr` owns, then the region itself.
	fn region(&mut self, ptr: Ptr, ty: &TypeDescriptor) {
		if ty.contains_addresses() {
			let bytes = layout::size_of(ty).and_then(|size| self.ctrl.mem(ptr, size as u32).map(<[u8]>::to_vec));
			match bytes {
				Ok(bytes) => self.children(&bytes, ty),
				Err(e) => self.fail(e),
			}
		}
		self.free(ptr);
	}

	fn children(&mut self, bytes: &[u8], ty: &TypeDescriptor) {
		if let Err(e) = self.try_children(bytes, ty) {
			self.fail(e);
		}
	}

	fn try_children(&mut self, bytes: &[u8], ty: &TypeDescriptor) -> Result<()> {
		match ty {
			TypeDescriptor::Primitive(_)
			| TypeDescriptor::Enum {
				..
			} => {}
			TypeDescriptor::FixedArray {
				element,
				..
			} => {
				if element.contains_addresses() {
					let element_size = layout::size_of(element)?;
					for chunk in bytes.chunks_exact(element_size) {
						self.children(chunk, element);
					}
				}
			}
			TypeDescriptor::Struct(fields) => {
				let mut offset = 0;
				for field in fields {
					let size = layout::size_of(&field.ty)?;
					if field.ty.contains_addresses() {
						self.children(&bytes[offset..offset + size], &field.ty);
					}
					offset += size;
				}
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
				self.children(&bytes[*discriminant..end], &variant.ty);
			}
			TypeDescriptor::Pointer(pointee) => {
				let ptr = read_slot(bytes)?;
				if !ptr.is_null() {
					self.region(ptr, pointee);
				}
			}
			TypeDescriptor::GrowableArray(element) => self.buffer(Growable::decode(bytes)?, element)?,
			TypeDescriptor::HeapArray(element) => self.buffer(Growable::decode_heap(bytes)?, element)?,
			TypeDescriptor::String => {
				let handle = Growable::decode(bytes)?;
				handle.check()?;
				if !handle.ptr.is_null() {
					self.free(handle.ptr);
				}
			}
		}
		Ok(())
	}

	/// Release the elements behind `handle`, then its buffer.
	fn buffer(&mut self, handle: Growable, element: &TypeDescriptor) -> Result<()> {
		handle.check()?;
		if handle.ptr.is_null() {
			return Ok(());
		}
		if element.contains_addresses() && handle.len > 0 {
			let element_size = layout::size_of(element)?;
			let len = buffer_len(&handle, element_size, element)?;
			match self.ctrl.mem(handle.ptr, len).map(<[u8]>::to_vec) {
				Ok(data) => {
					for chunk in data.chunks_exact(element_size) {
						self.children(chunk, element);
					}
				}
				Err(e) => self.fail(e),
			}
		}
		self.free(handle.ptr);
		Ok(())
	}
}
