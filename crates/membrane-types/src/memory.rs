//! An in-process linear address space with its own boundary allocator.
//!
//! [`LinearMemory`] models one side's flat, bounds-checked memory. It is the
//! host-side allocator used for staging values before they cross into a guest,
//! and it doubles as a stand-in for a guest's linear memory when a real module
//! is not needed.
//!
//! The allocator is a first-fit free list over a bump region. Every region is
//! zeroed when handed out and, when poisoning is enabled, overwritten with
//! [`cnf::POISON_BYTE`] when released, so no byte of an earlier allocation is
//! ever observable through a later one. A live-allocation map turns double
//! frees and frees of foreign addresses into boundary errors.

use std::collections::BTreeMap;

use tracing::trace;

use crate::cnf;
use crate::controller::{MemoryController, Ptr, Side};
use crate::err::{Error, Result};

pub struct LinearMemory {
	side: Side,
	base: u32,
	limit: u32,
	poison: bool,
	bytes: Vec<u8>,
	/// Start address to the length the caller asked for
	live: BTreeMap<u32, u32>,
	/// Start address to the reserved length of each free block
	free: BTreeMap<u32, u32>,
}

fn reserved(len: u32) -> Option<u32> {
	let align = cnf::ALLOCATION_ALIGN;
	len.checked_add(align - 1).map(|l| l & !(align - 1))
}

impl LinearMemory {
	/// Create an empty memory whose first address is `base`.
	///
	/// The base is rounded up to the allocation alignment and is never zero,
	/// so that no allocation can ever be confused with a null address.
	pub fn new(side: Side, base: u32) -> Self {
		let base = reserved(base.max(cnf::ALLOCATION_ALIGN)).unwrap_or(u32::MAX & !7);
		Self {
			side,
			base,
			limit: (*cnf::MAX_MEMORY).min(u32::MAX - base),
			poison: *cnf::POISON_FREED,
			bytes: Vec::new(),
			live: BTreeMap::new(),
			free: BTreeMap::new(),
		}
	}

	/// A memory for the host side, starting at [`cnf::HOST_BASE`].
	pub fn host() -> Self {
		Self::new(Side::Host, *cnf::HOST_BASE)
	}

	/// A memory for a simulated guest, starting at [`cnf::GUEST_BASE`].
	pub fn guest() -> Self {
		Self::new(Side::Guest, *cnf::GUEST_BASE)
	}

	/// Cap the number of bytes this memory may grow to.
	pub fn with_limit(mut self, limit: u32) -> Self {
		self.limit = limit.min(u32::MAX - self.base);
		self
	}

	/// Override whether freed regions are poisoned.
	pub fn with_poison(mut self, poison: bool) -> Self {
		self.poison = poison;
		self
	}

	pub fn base(&self) -> Ptr {
		Ptr::new(self.base)
	}

	/// Number of allocations which have not been freed yet.
	pub fn live_allocations(&self) -> usize {
		self.live.len()
	}

	/// Whether `ptr` is the start of a live allocation.
	pub fn is_live(&self, ptr: Ptr) -> bool {
		self.live.contains_key(&ptr.address())
	}

	/// Whether `ptr` falls inside the range this memory has ever handed out.
	pub fn contains(&self, ptr: Ptr) -> bool {
		let address = ptr.address();
		address >= self.base && ((address - self.base) as usize) < self.bytes.len()
	}

	fn in_free_block(&self, address: u32) -> bool {
		self.free
			.range(..=address)
			.next_back()
			.is_some_and(|(&start, &len)| address < start + len)
	}

	fn take_free_block(&mut self, len: u32) -> Option<u32> {
		let (&start, &size) = self.free.iter().find(|&(_, &size)| size >= len)?;
		self.free.remove(&start);
		if size > len {
			self.free.insert(start + len, size - len);
		}
		Some(start)
	}

	fn release_block(&mut self, start: u32, len: u32) {
		let mut start = start;
		let mut len = len;
		// Merge with the block which ends where this one starts
		if let Some((&prev, &prev_len)) = self.free.range(..start).next_back() {
			if prev + prev_len == start {
				self.free.remove(&prev);
				start = prev;
				len += prev_len;
			}
		}
		// Merge with the block which starts where this one ends
		if let Some(next_len) = self.free.remove(&(start + len)) {
			len += next_len;
		}
		self.free.insert(start, len);
	}

	fn range(&self, ptr: Ptr, len: u32) -> Result<std::ops::Range<usize>> {
		let address = ptr.address();
		if address < self.base {
			return Err(Error::boundary(self.side, ptr, "address is below the start of memory"));
		}
		let start = (address - self.base) as usize;
		let end = start + len as usize;
		if end > self.bytes.len() {
			return Err(Error::boundary(
				self.side,
				ptr,
				format!("access of {len} bytes is out of bounds"),
			));
		}
		Ok(start..end)
	}
}

impl MemoryController for LinearMemory {
	fn side(&self) -> Side {
		self.side
	}

	fn alloc(&mut self, len: u32) -> Result<Ptr> {
		if len == 0 {
			return Err(Error::allocation(self.side, 0, "zero-length allocations are not supported"));
		}
		let size = reserved(len)
			.ok_or_else(|| Error::allocation(self.side, len.into(), "length overflows"))?;
		let address = match self.take_free_block(size) {
			Some(address) => address,
			None => {
				let top = self.bytes.len() as u64 + u64::from(size);
				if top > u64::from(self.limit) {
					return Err(Error::allocation(
						self.side,
						len.into(),
						format!("memory limit of {} bytes exceeded", self.limit),
					));
				}
				let address = self.base + self.bytes.len() as u32;
				self.bytes.resize(top as usize, 0);
				address
			}
		};
		let start = (address - self.base) as usize;
		self.bytes[start..start + size as usize].fill(0);
		self.live.insert(address, len);
		let ptr = Ptr::new(address);
		trace!(side = %self.side, %ptr, len, "allocate");
		Ok(ptr)
	}

	fn free(&mut self, ptr: Ptr) -> Result<()> {
		let Some(len) = self.live.remove(&ptr.address()) else {
			let reason = if ptr.is_null() {
				"null pointer"
			} else if self.in_free_block(ptr.address()) {
				"double free"
			} else {
				"address was not returned by allocate"
			};
			return Err(Error::boundary(self.side, ptr, reason));
		};
		// The reservation always fits, it was computed the same way on allocation
		let size = reserved(len).unwrap_or(len);
		if self.poison {
			let start = (ptr.address() - self.base) as usize;
			self.bytes[start..start + size as usize].fill(cnf::POISON_BYTE);
		}
		self.release_block(ptr.address(), size);
		trace!(side = %self.side, %ptr, len, "deallocate");
		Ok(())
	}

	fn mem(&self, ptr: Ptr, len: u32) -> Result<&[u8]> {
		if len == 0 {
			return Ok(&[]);
		}
		let range = self.range(ptr, len)?;
		Ok(&self.bytes[range])
	}

	fn mut_mem(&mut self, ptr: Ptr, len: u32) -> Result<&mut [u8]> {
		if len == 0 {
			return Ok(&mut []);
		}
		let range = self.range(ptr, len)?;
		Ok(&mut self.bytes[range])
	}

	fn allocation_len(&self, ptr: Ptr) -> Option<u32> {
		self.live.get(&ptr.address()).copied()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn memory() -> LinearMemory {
		LinearMemory::new(Side::Guest, 16).with_poison(true)
	}

	#[test]
	fn allocations_are_aligned_zeroed_and_non_null() {
		let mut mem = memory();
		let a = mem.alloc(3).unwrap();
		let b = mem.alloc(9).unwrap();
		assert!(!a.is_null());
		assert_eq!(a.address() % 8, 0);
		assert_eq!(b.address() - a.address(), 8);
		assert_eq!(mem.mem(b, 9).unwrap(), &[0; 9]);
		assert_eq!(mem.allocation_len(b), Some(9));
	}

	#[test]
	fn zero_base_is_never_null() {
		let mut mem = LinearMemory::new(Side::Host, 0);
		assert!(!mem.alloc(1).unwrap().is_null());
	}

	#[test]
	fn double_free_is_a_boundary_error() {
		let mut mem = memory();
		let a = mem.alloc(8).unwrap();
		mem.free(a).unwrap();
		let err = mem.free(a).unwrap_err();
		assert!(matches!(err, Error::Boundary { ref reason, .. } if reason == "double free"));
		assert_eq!(mem.live_allocations(), 0);
	}

	#[test]
	fn foreign_and_interior_addresses_are_rejected() {
		let mut mem = memory();
		let a = mem.alloc(16).unwrap();
		assert!(matches!(mem.free(Ptr::new(a.address() + 8)), Err(Error::Boundary { .. })));
		assert!(matches!(mem.free(Ptr::new(0x9999_0000)), Err(Error::Boundary { .. })));
		assert!(matches!(mem.free(Ptr::NULL), Err(Error::Boundary { .. })));
		assert!(mem.is_live(a));
	}

	#[test]
	fn freed_regions_are_poisoned_then_rezeroed_on_reuse() {
		let mut mem = memory();
		let a = mem.alloc(8).unwrap();
		mem.mut_mem(a, 8).unwrap().copy_from_slice(b"secrets!");
		mem.free(a).unwrap();
		assert_eq!(mem.mem(a, 8).unwrap(), &[cnf::POISON_BYTE; 8]);
		let b = mem.alloc(4).unwrap();
		assert_eq!(b, a);
		assert_eq!(mem.mem(b, 8).unwrap(), &[0; 8]);
	}

	#[test]
	fn adjacent_free_blocks_coalesce() {
		let mut mem = memory();
		let a = mem.alloc(8).unwrap();
		let b = mem.alloc(8).unwrap();
		let _c = mem.alloc(8).unwrap();
		mem.free(b).unwrap();
		mem.free(a).unwrap();
		// A 16-byte request fits the merged hole instead of growing memory
		assert_eq!(mem.alloc(16).unwrap(), a);
	}

	#[test]
	fn limits_and_bounds_are_enforced() {
		let mut mem = memory().with_limit(32);
		let a = mem.alloc(24).unwrap();
		assert!(matches!(mem.alloc(16), Err(Error::Allocation { .. })));
		assert!(matches!(mem.alloc(0), Err(Error::Allocation { .. })));
		assert!(matches!(mem.mem(a, 64), Err(Error::Boundary { .. })));
		assert!(matches!(mem.mem(Ptr::new(8), 1), Err(Error::Boundary { .. })));
		assert!(mem.mem(Ptr::NULL, 0).unwrap().is_empty());
	}
}
