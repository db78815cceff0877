//! The marshaling engine.
//!
//! Moves values into and out of an address space, rebasing every address a
//! value contains so that it is only ever interpreted by the side which
//! allocated it.
//!
//! - [`marshal_to`] writes a [`Value`] into a side, allocating every pointee and
//!   growable array buffer there and storing the new addresses
//! - [`unmarshal_from`] reads a value back, following addresses relative to
//!   the side it reads from
//! - [`transfer`] copies raw bytes from one side to another, rebasing every
//!   address on the way
//! - [`release`] frees a value and everything it transitively owns
//!
//! Traversal follows declaration order and only ever descends into the union
//! variant selected by its discriminant. A growable array crosses with its
//! live `length` elements only, and arrives with `capacity == length`. Heap
//! arrays cross the same way behind their shorter `{ address, length }`
//! handle.
//!
//! Any allocation made by a failed `marshal_to` or `transfer` is freed before
//! the error is returned.

mod decode;
mod encode;
mod rebase;
mod release;

use tracing::{debug, warn};

use crate::controller::{MemoryController, Ptr};
use crate::descriptor::TypeDescriptor;
use crate::err::{Error, Result};
use crate::growable::Growable;
use crate::layout;
use crate::value::Value;

/// Observes every node the decoder interprets.
///
/// Paths use the member syntax of [`layout::offset_of`] for inline members
/// (`shape.7.b`), `[i]` for growable array elements and `*` for pointees.
pub trait Visit {
	fn visit(&mut self, path: &str, ty: &TypeDescriptor);
}

impl<F: FnMut(&str, &TypeDescriptor)> Visit for F {
	fn visit(&mut self, path: &str, ty: &TypeDescriptor) {
		self(path, ty)
	}
}

/// Write `value` into `ctrl`'s memory, returning the address of its root.
pub fn marshal_to<C>(ctrl: &mut C, value: &Value, ty: &TypeDescriptor) -> Result<Ptr>
where
	C: MemoryController + ?Sized,
{
	layout::validate(ty)?;
	let side = ctrl.side();
	let mut encoder = encode::Encoder::new(ctrl);
	match encoder.place(value, ty) {
		Ok(ptr) => {
			debug!(%side, %ptr, allocations = encoder.allocated(), "marshaled {ty}");
			Ok(ptr)
		}
		Err(e) => {
			encoder.rollback();
			Err(e)
		}
	}
}

/// Read a value of type `ty` stored at `ptr` in `ctrl`'s memory.
pub fn unmarshal_from<C>(ctrl: &C, ptr: Ptr, ty: &TypeDescriptor) -> Result<Value>
where
	C: MemoryController + ?Sized,
{
	layout::validate(ty)?;
	decode::Decoder::new(ctrl, None).root(ptr, ty)
}

/// Like [`unmarshal_from`], reporting every interpreted node to `visitor`.
pub fn unmarshal_observed<C>(ctrl: &C, ptr: Ptr, ty: &TypeDescriptor, visitor: &mut dyn Visit) -> Result<Value>
where
	C: MemoryController + ?Sized,
{
	layout::validate(ty)?;
	decode::Decoder::new(ctrl, Some(visitor)).root(ptr, ty)
}

/// Copy the value at `ptr` in `src` into `dst`, rebasing every address.
pub fn transfer<S, D>(src: &S, ptr: Ptr, dst: &mut D, ty: &TypeDescriptor) -> Result<Ptr>
where
	S: MemoryController + ?Sized,
	D: MemoryController + ?Sized,
{
	layout::validate(ty)?;
	let (from, to) = (src.side(), dst.side());
	let mut rebaser = rebase::Rebaser::new(src, dst);
	match rebaser.root(ptr, ty) {
		Ok(out) => {
			debug!(%from, %to, src = %ptr, dst = %out, "transferred {ty}");
			Ok(out)
		}
		Err(e) => {
			rebaser.rollback();
			Err(e)
		}
	}
}

/// Free the value at `ptr` and every allocation reachable from it.
///
/// Release is best effort: a failure in one subtree does not stop the rest of
/// the value from being freed, and the first failure is returned.
pub fn release<C>(ctrl: &mut C, ptr: Ptr, ty: &TypeDescriptor) -> Result<()>
where
	C: MemoryController + ?Sized,
{
	layout::validate(ty)?;
	let side = ctrl.side();
	let mut releaser = release::Releaser::new(ctrl);
	releaser.root(ptr, ty);
	match releaser.finish() {
		Ok(freed) => {
			debug!(%side, %ptr, freed, "released {ty}");
			Ok(())
		}
		Err(e) => Err(e),
	}
}

/// Free `allocations` newest first, as part of abandoning a partial write.
fn rollback<C: MemoryController + ?Sized>(ctrl: &mut C, allocations: &mut Vec<Ptr>) {
	while let Some(ptr) = allocations.pop() {
		if let Err(e) = ctrl.free(ptr) {
			warn!(%ptr, "Failed to roll back allocation: {e}");
		}
	}
}

/// Check that the allocation at `ptr`, when its size is known, can hold
/// `needed` bytes. Roots must match exactly.
fn check_region<C>(ctrl: &C, ptr: Ptr, needed: u64, exact: bool, ty: &TypeDescriptor) -> Result<()>
where
	C: MemoryController + ?Sized,
{
	match ctrl.allocation_len(ptr) {
		Some(len) if exact && u64::from(len) != needed => Err(Error::mismatch(format!(
			"{ty} is {needed} bytes but the allocation at {ptr} holds {len}"
		))),
		Some(len) if u64::from(len) < needed => Err(Error::mismatch(format!(
			"{needed} bytes of {ty} do not fit the allocation of {len} bytes at {ptr}"
		))),
		_ => Ok(()),
	}
}

/// The byte length of the live elements behind a growable array handle read
/// from memory, which may claim any length at all.
fn buffer_len(handle: &Growable, element_size: usize, ty: &TypeDescriptor) -> Result<u32> {
	(element_size as u64)
		.checked_mul(handle.len)
		.and_then(|n| u32::try_from(n).ok())
		.ok_or_else(|| Error::mismatch(format!("{} elements of {ty} exceed the address space", handle.len)))
}

fn read_uint(bytes: &[u8]) -> u64 {
	let mut out = [0u8; 8];
	out[..bytes.len()].copy_from_slice(bytes);
	u64::from_le_bytes(out)
}

fn write_uint(out: &mut [u8], value: u64) {
	let len = out.len();
	out.copy_from_slice(&value.to_le_bytes()[..len]);
}

fn read_slot(bytes: &[u8]) -> Result<Ptr> {
	let slot: [u8; layout::ADDRESS_WIDTH] = bytes
		.get(..layout::ADDRESS_WIDTH)
		.and_then(|b| b.try_into().ok())
		.ok_or_else(|| Error::mismatch("truncated address slot"))?;
	Ptr::from_slot(slot).ok_or_else(|| Error::mismatch("address exceeds 32 bits"))
}
