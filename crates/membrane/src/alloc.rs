//! The guest half of the boundary allocator.
//!
//! Every region carries an 8-byte prefix holding its length, so that
//! [`deallocate`] can rebuild the [`Layout`] from the address alone. Regions
//! are zeroed on allocation. Addresses handed out are tracked in a live set:
//! freeing anything else is reported as an error instead of corrupting the
//! heap, and in debug builds freed regions are poisoned first.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::collections::BTreeSet;
use std::ptr::NonNull;
use std::sync::{Mutex, PoisonError};

use membrane_types::cnf::POISON_BYTE;

use crate::err::{Error, Result};

const HEADER: usize = 8;

static LIVE: Mutex<BTreeSet<usize>> = Mutex::new(BTreeSet::new());

fn live() -> std::sync::MutexGuard<'static, BTreeSet<usize>> {
	LIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

fn layout(len: usize) -> Result<Layout> {
	len.checked_add(HEADER)
		.and_then(|total| Layout::from_size_align(total, HEADER).ok())
		.ok_or(Error::TooLarge(len))
}

/// Allocate a zeroed region of `len` bytes.
pub fn allocate(len: usize) -> Result<NonNull<u8>> {
	if len == 0 {
		return Err(Error::ZeroLength);
	}
	let layout = layout(len)?;
	// SAFETY: the layout has a non-zero size
	let base = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(Error::Exhausted(len))?;
	// SAFETY: the region is at least HEADER bytes long and 8-byte aligned
	unsafe {
		base.cast::<u64>().write(len as u64);
	}
	// SAFETY: HEADER is within the region
	let ptr = unsafe { base.add(HEADER) };
	live().insert(ptr.as_ptr() as usize);
	Ok(ptr)
}

/// Free a region previously returned by [`allocate`].
pub fn deallocate(ptr: *mut u8) -> Result<()> {
	let address = ptr as usize;
	if ptr.is_null() {
		return Err(Error::Null);
	}
	if !live().remove(&address) {
		return Err(Error::NotLive(address));
	}
	// SAFETY: the address is live, so it was produced by `allocate` and its
	// header is intact
	unsafe {
		let base = ptr.sub(HEADER);
		let len = base.cast::<u64>().read() as usize;
		let layout = layout(len)?;
		if cfg!(debug_assertions) {
			std::ptr::write_bytes(base, POISON_BYTE, layout.size());
		}
		dealloc(base, layout);
	}
	Ok(())
}

/// The length `ptr` was allocated with, if it is live.
pub fn allocation_len(ptr: *const u8) -> Option<usize> {
	if !live().contains(&(ptr as usize)) {
		return None;
	}
	// SAFETY: live addresses are preceded by their header
	Some(unsafe { ptr.sub(HEADER).cast::<u64>().read() } as usize)
}

/// Number of regions which have not been freed yet.
pub fn live_allocations() -> usize {
	live().len()
}

/// Free `address` on behalf of the host.
///
/// Misuse panics, which traps the instance: the host sees the failed call
/// and reports it as a boundary violation.
pub fn release(address: u32) {
	if let Err(e) = deallocate(address as usize as *mut u8) {
		panic!("deallocate error: {e}");
	}
}

/// Export `allocate` and `deallocate` from a guest module.
///
/// Both exports speak raw 32-bit addresses: `allocate` returns 0 when the
/// region cannot be provided, and `deallocate` traps on an address which is
/// not live (see [`release`]).
#[macro_export]
macro_rules! allocator {
	() => {
		#[cfg(target_arch = "wasm32")]
		#[unsafe(no_mangle)]
		pub extern "C" fn allocate(len: u32) -> u32 {
			match $crate::alloc::allocate(len as usize) {
				Ok(ptr) => ptr.as_ptr() as usize as u32,
				Err(e) => {
					eprintln!("allocate error: {e}");
					0
				}
			}
		}

		#[cfg(target_arch = "wasm32")]
		#[unsafe(no_mangle)]
		pub extern "C" fn deallocate(ptr: u32) {
			$crate::alloc::release(ptr)
		}
	};
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn regions_are_zeroed_and_remember_their_length() {
		let ptr = allocate(24).unwrap();
		// SAFETY: 24 bytes were just allocated
		let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 24) };
		assert!(bytes.iter().all(|&b| b == 0));
		assert_eq!(allocation_len(ptr.as_ptr()), Some(24));
		deallocate(ptr.as_ptr()).unwrap();
		assert_eq!(allocation_len(ptr.as_ptr()), None);
	}

	#[test]
	fn misuse_is_reported_not_undefined() {
		let ptr = allocate(8).unwrap();
		deallocate(ptr.as_ptr()).unwrap();
		assert!(matches!(deallocate(ptr.as_ptr()), Err(Error::NotLive(_))));
		assert!(matches!(deallocate(std::ptr::null_mut()), Err(Error::Null)));
		let mut local = 0u8;
		assert!(matches!(deallocate(&mut local), Err(Error::NotLive(_))));
		assert!(matches!(allocate(0), Err(Error::ZeroLength)));
		assert!(matches!(allocate(usize::MAX), Err(Error::TooLarge(_))));
	}

	#[test]
	#[should_panic(expected = "deallocate error")]
	fn releasing_a_foreign_address_traps() {
		release(0x10);
	}

	#[test]
	#[should_panic(expected = "deallocate error")]
	fn releasing_null_traps() {
		release(0);
	}
}
