//! The growable container: an out-of-line element buffer behind an inline
//! `{ address, length, capacity }` handle.
//!
//! Capacity only ever changes through [`Growable::new`] and
//! [`Growable::resize`], both of which leave `length == capacity`. Every
//! element exposed by either operation is either copied from the previous
//! buffer or zero, never left over from an unrelated allocation.

use tracing::trace;

use crate::controller::{MemoryController, Ptr, Side};
use crate::descriptor::TypeDescriptor;
use crate::err::{Error, Result};
use crate::layout::{self, GROWABLE_CAPACITY_OFFSET, GROWABLE_LEN_OFFSET, GROWABLE_WIDTH, HEAP_ARRAY_WIDTH};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Growable {
	pub ptr: Ptr,
	pub len: u64,
	pub capacity: u64,
}

/// The byte length of `count` elements of `element_size` bytes.
pub(crate) fn byte_len(side: Side, element_size: usize, count: u64) -> Result<u32> {
	(element_size as u64)
		.checked_mul(count)
		.and_then(|n| u32::try_from(n).ok())
		.ok_or_else(|| {
			Error::allocation(
				side,
				u64::MAX,
				format!("{count} elements of {element_size} bytes exceed the address space"),
			)
		})
}

impl Growable {
	pub const EMPTY: Growable = Growable {
		ptr: Ptr::NULL,
		len: 0,
		capacity: 0,
	};

	/// Allocate `len` zeroed elements of `element`.
	///
	/// A zero length allocates nothing and yields [`Growable::EMPTY`].
	pub fn new<C>(ctrl: &mut C, element: &TypeDescriptor, len: u64) -> Result<Self>
	where
		C: MemoryController + ?Sized,
	{
		let element_size = layout::size_of(element)?;
		let bytes = byte_len(ctrl.side(), element_size, len)?;
		if bytes == 0 {
			return Ok(Growable::EMPTY);
		}
		let ptr = ctrl.alloc(bytes)?;
		trace!(%ptr, len, "growable allocated");
		Ok(Growable {
			ptr,
			len,
			capacity: len,
		})
	}

	/// Reallocate to hold exactly `new_len` elements.
	///
	/// The first `min(len, new_len)` elements are preserved and every other
	/// element is zero. On failure the container is left untouched and any
	/// buffer allocated along the way is released again.
	pub fn resize<C>(&mut self, ctrl: &mut C, element: &TypeDescriptor, new_len: u64) -> Result<()>
	where
		C: MemoryController + ?Sized,
	{
		self.check()?;
		let element_size = layout::size_of(element)?;
		let new_bytes = byte_len(ctrl.side(), element_size, new_len)?;
		let kept = byte_len(ctrl.side(), element_size, self.len.min(new_len))?;
		let replacement = if new_bytes == 0 {
			Growable::EMPTY
		} else {
			let ptr = ctrl.alloc(new_bytes)?;
			if kept > 0 {
				let copied = ctrl
					.mem(self.ptr, kept)
					.map(<[u8]>::to_vec)
					.and_then(|data| ctrl.mut_mem(ptr, kept).map(|dst| dst.copy_from_slice(&data)));
				if let Err(e) = copied {
					ctrl.free(ptr)?;
					return Err(e);
				}
			}
			Growable {
				ptr,
				len: new_len,
				capacity: new_len,
			}
		};
		if !self.ptr.is_null() {
			if let Err(e) = ctrl.free(self.ptr) {
				if !replacement.ptr.is_null() {
					ctrl.free(replacement.ptr)?;
				}
				return Err(e);
			}
		}
		trace!(from = self.len, to = new_len, ptr = %replacement.ptr, "growable resized");
		*self = replacement;
		Ok(())
	}

	/// Release the element buffer, without following addresses inside the elements.
	pub fn free<C: MemoryController + ?Sized>(self, ctrl: &mut C) -> Result<()> {
		if self.ptr.is_null() {
			return Ok(());
		}
		ctrl.free(self.ptr)
	}

	/// Check the handle invariants: `len <= capacity`, and a null address if
	/// and only if the capacity is zero.
	pub fn check(&self) -> Result<()> {
		if self.len > self.capacity {
			return Err(Error::mismatch(format!(
				"growable array length {} exceeds its capacity {}",
				self.len, self.capacity
			)));
		}
		if self.ptr.is_null() != (self.capacity == 0) {
			return Err(Error::mismatch(format!(
				"growable array at {} has capacity {}",
				self.ptr, self.capacity
			)));
		}
		Ok(())
	}

	pub fn encode(&self) -> [u8; GROWABLE_WIDTH] {
		let mut out = [0u8; GROWABLE_WIDTH];
		out[..GROWABLE_LEN_OFFSET].copy_from_slice(&self.ptr.to_slot());
		out[GROWABLE_LEN_OFFSET..GROWABLE_CAPACITY_OFFSET].copy_from_slice(&self.len.to_le_bytes());
		out[GROWABLE_CAPACITY_OFFSET..].copy_from_slice(&self.capacity.to_le_bytes());
		out
	}

	pub fn decode(bytes: &[u8]) -> Result<Self> {
		let slot = |range: std::ops::Range<usize>| -> Result<[u8; 8]> {
			bytes
				.get(range)
				.and_then(|b| b.try_into().ok())
				.ok_or_else(|| Error::mismatch("truncated growable array handle"))
		};
		let ptr = Ptr::from_slot(slot(0..GROWABLE_LEN_OFFSET)?)
			.ok_or_else(|| Error::mismatch("growable array address exceeds 32 bits"))?;
		Ok(Growable {
			ptr,
			len: u64::from_le_bytes(slot(GROWABLE_LEN_OFFSET..GROWABLE_CAPACITY_OFFSET)?),
			capacity: u64::from_le_bytes(slot(GROWABLE_CAPACITY_OFFSET..GROWABLE_WIDTH)?),
		})
	}

	/// The 16-byte `{ address, length }` form used by heap arrays, which
	/// never hold spare capacity.
	pub fn encode_heap(&self) -> [u8; HEAP_ARRAY_WIDTH] {
		let mut out = [0u8; HEAP_ARRAY_WIDTH];
		out[..GROWABLE_LEN_OFFSET].copy_from_slice(&self.ptr.to_slot());
		out[GROWABLE_LEN_OFFSET..].copy_from_slice(&self.len.to_le_bytes());
		out
	}

	/// Decode a heap array handle, whose capacity is its length.
	pub fn decode_heap(bytes: &[u8]) -> Result<Self> {
		let slot = |range: std::ops::Range<usize>| -> Result<[u8; 8]> {
			bytes
				.get(range)
				.and_then(|b| b.try_into().ok())
				.ok_or_else(|| Error::mismatch("truncated heap array handle"))
		};
		let ptr = Ptr::from_slot(slot(0..GROWABLE_LEN_OFFSET)?)
			.ok_or_else(|| Error::mismatch("heap array address exceeds 32 bits"))?;
		let len = u64::from_le_bytes(slot(GROWABLE_LEN_OFFSET..HEAP_ARRAY_WIDTH)?);
		Ok(Growable {
			ptr,
			len,
			capacity: len,
		})
	}

	/// Read a handle stored at `at`.
	pub fn read<C: MemoryController + ?Sized>(ctrl: &C, at: Ptr) -> Result<Self> {
		Self::decode(ctrl.mem(at, GROWABLE_WIDTH as u32)?)
	}

	/// Store this handle at `at`.
	pub fn write<C: MemoryController + ?Sized>(&self, ctrl: &mut C, at: Ptr) -> Result<()> {
		ctrl.mut_mem(at, GROWABLE_WIDTH as u32)?.copy_from_slice(&self.encode());
		Ok(())
	}
}
