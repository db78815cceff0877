use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr;
use std::slice;

use membrane_types::layout::GROWABLE_WIDTH;

use crate::alloc::{allocate, deallocate};
use crate::err::{Error, Result};

/// Plain data for which the all-zero byte pattern is a valid value.
///
/// # Safety
///
/// Implementors must be valid when every byte is zero and must not contain
/// padding, so that the bytes the host reads are exactly the bytes written.
pub unsafe trait Zeroable: Copy {}

macro_rules! zeroable {
	($($t:ty),*) => {
		$(
			// SAFETY: zero is a valid value of every primitive and none has padding
			unsafe impl Zeroable for $t {}
		)*
	};
}

zeroable!(bool, i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

// SAFETY: arrays of zeroable elements are zeroable and never padded
unsafe impl<T: Zeroable, const N: usize> Zeroable for [T; N] {}

/// A growable array laid out exactly like the interchange handle:
/// `[address: u64][length: u64][capacity: u64]`.
///
/// A `Vector` does not free its buffer when dropped. Once it is part of a
/// value returned to the host, the host decides when it is released.
#[repr(C, packed)]
pub struct Vector<T> {
	ptr: u64,
	len: u64,
	capacity: u64,
	marker: PhantomData<T>,
}

const _: () = assert!(size_of::<Vector<u8>>() == GROWABLE_WIDTH);

fn byte_len<T>(len: usize) -> Result<usize> {
	len.checked_mul(size_of::<T>()).ok_or(Error::Overflow(len as u64))
}

impl<T: Zeroable> Vector<T> {
	pub const fn empty() -> Self {
		Self {
			ptr: 0,
			len: 0,
			capacity: 0,
			marker: PhantomData,
		}
	}

	/// Allocate `len` zeroed elements, with `length == capacity == len`.
	pub fn new(len: usize) -> Result<Self> {
		let bytes = byte_len::<T>(len)?;
		if bytes == 0 {
			return Ok(Self::empty());
		}
		let ptr = allocate(bytes)?;
		Ok(Self {
			ptr: ptr.as_ptr() as usize as u64,
			len: len as u64,
			capacity: len as u64,
			marker: PhantomData,
		})
	}

	pub fn from_slice(items: &[T]) -> Result<Self> {
		let mut out = Self::new(items.len())?;
		out.as_mut_slice().copy_from_slice(items);
		Ok(out)
	}

	/// Reallocate to exactly `new_len` elements, keeping the first
	/// `min(len, new_len)` and zeroing the rest.
	pub fn resize(&mut self, new_len: usize) -> Result<()> {
		let mut replacement = Self::new(new_len)?;
		let kept = self.len().min(new_len);
		replacement.as_mut_slice()[..kept].copy_from_slice(&self.as_slice()[..kept]);
		let old = std::mem::replace(self, replacement);
		old.free()
	}

	pub fn len(&self) -> usize {
		self.len as usize
	}

	pub fn capacity(&self) -> usize {
		self.capacity as usize
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	fn data(&self) -> *mut T {
		self.ptr as usize as *mut T
	}

	pub fn as_slice(&self) -> &[T] {
		if self.len == 0 {
			return &[];
		}
		// SAFETY: a non-empty vector owns a live, 8-byte aligned buffer of at
		// least `len` initialized elements
		unsafe { slice::from_raw_parts(self.data(), self.len()) }
	}

	pub fn as_mut_slice(&mut self) -> &mut [T] {
		if self.len == 0 {
			return &mut [];
		}
		// SAFETY: as in `as_slice`, and `&mut self` guarantees exclusive access
		unsafe { slice::from_raw_parts_mut(self.data(), self.len()) }
	}

	/// Release the element buffer.
	pub fn free(self) -> Result<()> {
		if self.ptr == 0 {
			return Ok(());
		}
		deallocate(self.data().cast())
	}
}

impl<T: Zeroable> Default for Vector<T> {
	fn default() -> Self {
		Self::empty()
	}
}

impl<T: Zeroable + fmt::Debug> fmt::Debug for Vector<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let (address, capacity) = (self.ptr, self.capacity);
		f.debug_struct("Vector")
			.field("address", &format_args!("{address:#x}"))
			.field("capacity", &capacity)
			.field("items", &self.as_slice())
			.finish()
	}
}

impl Vector<u8> {
	/// Copy UTF-8 text into a new byte vector.
	pub fn from_text(text: &str) -> Result<Self> {
		Self::from_slice(text.as_bytes())
	}
}

impl<T> Vector<T> {
	/// The raw handle bytes, exactly as the host reads them.
	pub fn handle(&self) -> [u8; GROWABLE_WIDTH] {
		let mut out = [0u8; GROWABLE_WIDTH];
		// SAFETY: the struct is packed and exactly GROWABLE_WIDTH bytes long
		unsafe { ptr::copy_nonoverlapping((self as *const Self).cast::<u8>(), out.as_mut_ptr(), GROWABLE_WIDTH) };
		out
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::alloc::allocation_len;

	fn word(bytes: &[u8], at: usize) -> u64 {
		u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
	}

	#[test]
	fn new_vectors_are_zeroed_with_length_equal_to_capacity() {
		let v = Vector::<u32>::new(4).unwrap();
		assert_eq!((v.len(), v.capacity()), (4, 4));
		assert_eq!(v.as_slice(), &[0; 4]);
		v.free().unwrap();
		let empty = Vector::<u32>::new(0).unwrap();
		assert_eq!(empty.handle(), [0; GROWABLE_WIDTH]);
	}

	#[test]
	fn resize_keeps_the_prefix_and_zeroes_the_rest() {
		let mut v = Vector::from_slice(&[1u16, 2, 3]).unwrap();
		v.resize(2).unwrap();
		assert_eq!(v.as_slice(), &[1, 2]);
		v.resize(5).unwrap();
		assert_eq!(v.as_slice(), &[1, 2, 0, 0, 0]);
		assert_eq!(v.len(), v.capacity());
		v.free().unwrap();
	}

	#[rstest]
	#[case::shrink_then_grow(&[1, 2, 3], &[2, 5], &[1, 2, 0, 0, 0])]
	#[case::grow_from_empty(&[], &[3], &[0, 0, 0])]
	#[case::empty_then_refill(&[7, 8], &[0, 2], &[0, 0])]
	#[case::same_length(&[4, 5], &[2, 2], &[4, 5])]
	#[case::grow_twice(&[9], &[2, 4], &[9, 0, 0, 0])]
	fn resize_sequences(#[case] start: &[u32], #[case] steps: &[usize], #[case] expected: &[u32]) {
		let mut v = Vector::from_slice(start).unwrap();
		for &len in steps {
			v.resize(len).unwrap();
			assert_eq!((v.len(), v.capacity()), (len, len));
			assert_eq!(v.is_empty(), len == 0);
		}
		assert_eq!(v.as_slice(), expected);
		v.free().unwrap();
	}

	#[test]
	fn handles_match_the_interchange_layout() {
		let v = Vector::from_text("Char").unwrap();
		let handle = v.handle();
		assert_eq!(word(&handle, 8), 4);
		assert_eq!(word(&handle, 16), 4);
		let address = word(&handle, 0) as usize as *const u8;
		assert_eq!(allocation_len(address), Some(4));
		v.free().unwrap();
		assert_eq!(allocation_len(address), None);
	}
}
