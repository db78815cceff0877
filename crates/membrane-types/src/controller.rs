//! Memory management abstractions for an address space on either side of the boundary.
//!
//! Every address space (the guest's linear memory, or a host-side staging
//! memory) is reached through a [`MemoryController`]. The controller is the only
//! way to turn a [`Ptr`] into bytes: pointers are opaque handles which carry no
//! capability to be dereferenced by themselves.
//!
//! # Memory Model
//!
//! - **Allocation**: reserve a zeroed region of a given length
//! - **Deallocation**: release a region previously returned by `alloc`
//! - **Access**: read and write bounded byte slices of the address space

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::err::Result;

/// Which side of the boundary an address space belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
	Host,
	Guest,
}

impl fmt::Display for Side {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Side::Host => f.write_str("host"),
			Side::Guest => f.write_str("guest"),
		}
	}
}

/// An address relative to one address space.
///
/// A `Ptr` is meaningless without the controller of the side which produced
/// it, and is only resolved through [`MemoryController::mem`] or
/// [`MemoryController::mut_mem`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ptr(u32);

impl Ptr {
	pub const NULL: Ptr = Ptr(0);

	pub const fn new(address: u32) -> Self {
		Ptr(address)
	}

	pub const fn is_null(self) -> bool {
		self.0 == 0
	}

	/// The raw address, for handing to a guest export or writing into an address slot.
	pub const fn address(self) -> u32 {
		self.0
	}

	/// The pointer `offset` bytes further into the same region.
	pub fn offset(self, offset: usize) -> Option<Ptr> {
		u32::try_from(offset).ok().and_then(|o| self.0.checked_add(o)).map(Ptr)
	}

	/// Decode an 8-byte little-endian address slot.
	pub fn from_slot(slot: [u8; 8]) -> Option<Ptr> {
		u32::try_from(u64::from_le_bytes(slot)).ok().map(Ptr)
	}

	/// Encode into an 8-byte little-endian address slot.
	pub fn to_slot(self) -> [u8; 8] {
		u64::from(self.0).to_le_bytes()
	}
}

impl From<u32> for Ptr {
	fn from(address: u32) -> Self {
		Ptr(address)
	}
}

impl fmt::Display for Ptr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#010x}", self.0)
	}
}

/// Synchronous memory controller for one address space.
///
/// Implementations must ensure:
/// - regions returned by `alloc` are zero-initialized
/// - `free` rejects pointers which are not live allocations with a boundary error
/// - `mem`/`mut_mem` reject out-of-bounds accesses with a boundary error
pub trait MemoryController {
	/// The side of the boundary this controller manages.
	fn side(&self) -> Side;

	/// Allocate a zeroed region of `len` bytes.
	///
	/// # Errors
	///
	/// Returns an allocation error if the allocator is exhausted, the memory
	/// limit would be exceeded, or `len` is zero.
	fn alloc(&mut self, len: u32) -> Result<Ptr>;

	/// Free a region previously returned by [`MemoryController::alloc`].
	///
	/// # Errors
	///
	/// Returns a boundary error if the pointer is unknown or already freed.
	fn free(&mut self, ptr: Ptr) -> Result<()>;

	/// Read access to `len` bytes starting at `ptr`.
	fn mem(&self, ptr: Ptr, len: u32) -> Result<&[u8]>;

	/// Write access to `len` bytes starting at `ptr`.
	fn mut_mem(&mut self, ptr: Ptr, len: u32) -> Result<&mut [u8]>;

	/// The length originally requested for the live allocation starting at
	/// `ptr`, if this controller tracks allocation sizes.
	///
	/// Controllers which cannot know (for instance because the allocation was
	/// made inside an opaque guest allocator) return `None`, which disables
	/// the size agreement check for that address.
	fn allocation_len(&self, _ptr: Ptr) -> Option<u32> {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn slots_round_trip_and_reject_wide_addresses() {
		let ptr = Ptr::new(0x1234);
		assert_eq!(Ptr::from_slot(ptr.to_slot()), Some(ptr));
		assert_eq!(Ptr::from_slot(u64::MAX.to_le_bytes()), None);
		assert!(Ptr::from_slot([0; 8]).is_some_and(Ptr::is_null));
	}

	#[test]
	fn offsets_do_not_wrap() {
		assert_eq!(Ptr::new(8).offset(8), Some(Ptr::new(16)));
		assert_eq!(Ptr::new(u32::MAX).offset(1), None);
	}
}
