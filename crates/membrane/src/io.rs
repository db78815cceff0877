//! Moving entry point arguments and results across the boundary.

use std::fmt::Display;
use std::mem::size_of;
use std::ptr::{self, NonNull};

use crate::alloc::allocate;
use crate::err::Result;

/// Copy out the input value the host marshaled at `ptr`.
///
/// The input stays owned by the host, including any buffers it refers to.
///
/// # Safety
///
/// `ptr` must address a live value laid out exactly like `T`.
pub unsafe fn read<T: Copy>(ptr: *const u8) -> T {
	// SAFETY: guaranteed by the caller, packed values may be unaligned
	unsafe { ptr::read_unaligned(ptr.cast::<T>()) }
}

/// Move `value` into a fresh region whose ownership passes to the host.
pub fn write<T>(value: T) -> Result<NonNull<u8>> {
	let ptr = allocate(size_of::<T>().max(1))?;
	// SAFETY: the region was just allocated with room for a `T`
	unsafe { ptr::write_unaligned(ptr.as_ptr().cast::<T>(), value) };
	Ok(ptr)
}

/// Run `handler` on the input at `input`, returning the address of its
/// output, or null when the handler or the output allocation fails.
///
/// # Safety
///
/// `input` must address a live value laid out exactly like `I`.
pub unsafe fn dispatch<I, O, E, F>(input: *const u8, handler: F) -> *mut u8
where
	I: Copy,
	E: Display,
	F: FnOnce(I) -> std::result::Result<O, E>,
{
	// SAFETY: guaranteed by the caller
	let input = unsafe { read::<I>(input) };
	match handler(input) {
		Ok(output) => match write(output) {
			Ok(ptr) => ptr.as_ptr(),
			Err(e) => {
				eprintln!("Output error: {e}");
				ptr::null_mut()
			}
		},
		Err(e) => {
			eprintln!("Function invocation error: {e}");
			ptr::null_mut()
		}
	}
}

/// Export `handler` as an entry point taking and returning 32-bit addresses.
///
/// ```rust,ignore
/// membrane::entry!(process_data, handle);
///
/// fn handle(input: HostToGuest) -> Result<GuestToHost, membrane::Error> { .. }
/// ```
#[macro_export]
macro_rules! entry {
	($name:ident, $handler:path) => {
		#[cfg(target_arch = "wasm32")]
		#[unsafe(no_mangle)]
		pub extern "C" fn $name(input: u32) -> u32 {
			// SAFETY: the host marshals a value of the handler's input type at `input`
			unsafe { $crate::io::dispatch(input as usize as *const u8, $handler) as usize as u32 }
		}
	};
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alloc::{allocation_len, deallocate};

	#[repr(C, packed)]
	#[derive(Clone, Copy)]
	struct Pair {
		tag: u8,
		value: f64,
	}

	#[test]
	fn outputs_are_packed_and_owned_by_the_caller() {
		let ptr = write(Pair {
			tag: b'X',
			value: 2.0,
		})
		.unwrap();
		assert_eq!(allocation_len(ptr.as_ptr()), Some(9));
		// SAFETY: a Pair was just written there
		let pair = unsafe { read::<Pair>(ptr.as_ptr()) };
		let (tag, value) = (pair.tag, pair.value);
		assert_eq!((tag, value), (b'X', 2.0));
		deallocate(ptr.as_ptr()).unwrap();
	}

	#[test]
	fn failed_handlers_return_null() {
		let input = Pair {
			tag: 1,
			value: 0.0,
		};
		let ptr = (&input as *const Pair).cast::<u8>();
		// SAFETY: `ptr` addresses a live Pair
		let out = unsafe { dispatch(ptr, |_: Pair| Err::<Pair, _>("nope")) };
		assert!(out.is_null());
		// SAFETY: as above
		let out = unsafe { dispatch(ptr, |p: Pair| Ok::<_, String>(p.value + 1.0)) };
		assert_eq!(allocation_len(out), Some(8));
		deallocate(out).unwrap();
	}
}
