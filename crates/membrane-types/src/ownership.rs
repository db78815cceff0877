//! Explicit ownership of values living in an address space.
//!
//! No collector spans the boundary, so every allocation has exactly one side
//! responsible for freeing it. [`OwnedValue`] is the scoped form of that
//! obligation: it frees the value it guards, and everything the value owns,
//! when it goes out of scope, unless it was released explicitly first.

use std::fmt;

use tracing::{trace, warn};

use crate::controller::{MemoryController, Ptr, Side};
use crate::descriptor::TypeDescriptor;
use crate::err::Result;
use crate::marshal;
use crate::value::Value;

/// Which side must eventually free an allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ownership {
	/// Freed by the host's own allocator
	Host,
	/// Freed through the guest's `deallocate`, on the host's instruction
	Guest,
	/// Lent across the boundary for the duration of a call
	PendingTransfer,
}

impl From<Side> for Ownership {
	fn from(side: Side) -> Self {
		match side {
			Side::Host => Ownership::Host,
			Side::Guest => Ownership::Guest,
		}
	}
}

impl fmt::Display for Ownership {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Ownership::Host => f.write_str("owned by host"),
			Ownership::Guest => f.write_str("owned by guest"),
			Ownership::PendingTransfer => f.write_str("pending transfer"),
		}
	}
}

/// A value at an address, together with the obligation to free it.
///
/// The guard borrows the controller of the side which allocated the value,
/// so nothing else can free it behind the guard's back. Dropping the guard
/// releases the value transitively; failures during that fallback release are
/// logged since `Drop` cannot report them.
pub struct OwnedValue<'c, C: MemoryController + ?Sized> {
	ctrl: &'c mut C,
	ptr: Ptr,
	ty: TypeDescriptor,
	ownership: Ownership,
	released: bool,
}

impl<'c, C: MemoryController + ?Sized> OwnedValue<'c, C> {
	/// Take over the obligation to free the value of type `ty` at `ptr`.
	pub fn new(ctrl: &'c mut C, ptr: Ptr, ty: TypeDescriptor) -> Self {
		let ownership = ctrl.side().into();
		Self {
			ctrl,
			ptr,
			ty,
			ownership,
			released: false,
		}
	}

	/// Marshal `value` into `ctrl` and guard the result.
	pub fn marshal(ctrl: &'c mut C, value: &Value, ty: TypeDescriptor) -> Result<Self> {
		let ptr = marshal::marshal_to(ctrl, value, &ty)?;
		Ok(Self::new(ctrl, ptr, ty))
	}

	pub fn ptr(&self) -> Ptr {
		self.ptr
	}

	pub fn ty(&self) -> &TypeDescriptor {
		&self.ty
	}

	pub fn ownership(&self) -> Ownership {
		self.ownership
	}

	/// The controller of the side owning the value, for calls which must be
	/// made while the value stays alive.
	pub fn controller(&mut self) -> &mut C {
		self.ctrl
	}

	/// Mark the value as lent to the other side for the duration of a call.
	pub fn lend(&mut self) -> Ptr {
		trace!(ptr = %self.ptr, "lent across the boundary");
		self.ownership = Ownership::PendingTransfer;
		self.ptr
	}

	/// Mark a lent value as returned to the side which allocated it.
	pub fn settle(&mut self) {
		self.ownership = self.ctrl.side().into();
	}

	/// Read the guarded value.
	pub fn read(&self) -> Result<Value> {
		marshal::unmarshal_from(&*self.ctrl, self.ptr, &self.ty)
	}

	/// Read the guarded value, reporting every interpreted node to `visitor`.
	pub fn read_observed(&self, visitor: &mut dyn marshal::Visit) -> Result<Value> {
		marshal::unmarshal_observed(&*self.ctrl, self.ptr, &self.ty, visitor)
	}

	/// Copy the guarded value into another address space. The copy belongs
	/// to `dst`'s side, the guarded value is left untouched.
	pub fn transfer_to<D>(&self, dst: &mut D) -> Result<Ptr>
	where
		D: MemoryController + ?Sized,
	{
		marshal::transfer(&*self.ctrl, self.ptr, dst, &self.ty)
	}

	/// Free the value and everything it owns.
	pub fn release(mut self) -> Result<()> {
		self.released = true;
		marshal::release(self.ctrl, self.ptr, &self.ty)
	}

	/// Give up the guard, handing the obligation to free to the caller.
	pub fn into_raw(mut self) -> Ptr {
		self.released = true;
		self.ptr
	}
}

impl<C: MemoryController + ?Sized> Drop for OwnedValue<'_, C> {
	fn drop(&mut self) {
		if self.released {
			return;
		}
		warn!(
			ptr = %self.ptr,
			ownership = %self.ownership,
			"Releasing {} which was never released explicitly",
			self.ty
		);
		if let Err(e) = marshal::release(&mut *self.ctrl, self.ptr, &self.ty) {
			warn!(ptr = %self.ptr, "Failed to release dropped value: {e}");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::descriptor::Primitive;
	use crate::err::Error;
	use crate::memory::LinearMemory;

	fn message() -> TypeDescriptor {
		TypeDescriptor::structure([("msg", TypeDescriptor::growable(Primitive::U8.into()))])
	}

	#[test]
	fn ownership_follows_the_allocating_side() {
		let mut guest = LinearMemory::guest();
		let mut value = OwnedValue::marshal(&mut guest, &Value::Struct(vec![Value::bytes(b"hi")]), message()).unwrap();
		assert_eq!(value.ownership(), Ownership::Guest);
		let ptr = value.lend();
		assert_eq!(ptr, value.ptr());
		assert_eq!(value.ownership(), Ownership::PendingTransfer);
		value.settle();
		assert_eq!(value.ownership(), Ownership::Guest);
		value.release().unwrap();
		assert_eq!(guest.live_allocations(), 0);

		let mut host = LinearMemory::host();
		let value = OwnedValue::marshal(&mut host, &Value::U8(1), Primitive::U8.into()).unwrap();
		assert_eq!(value.ownership(), Ownership::Host);
	}

	#[test]
	fn dropped_guards_release_everything() {
		let mut guest = LinearMemory::guest();
		{
			let value = OwnedValue::marshal(&mut guest, &Value::Struct(vec![Value::bytes(b"hi")]), message()).unwrap();
			assert_eq!(value.read().unwrap(), Value::Struct(vec![Value::bytes(b"hi")]));
		}
		assert_eq!(guest.live_allocations(), 0);
	}

	#[test]
	fn guards_release_even_when_reading_fails() {
		let mut guest = LinearMemory::guest();
		let ptr = marshal::marshal_to(&mut guest, &Value::Struct(vec![Value::bytes(b"hi")]), &message()).unwrap();
		let wrong = TypeDescriptor::structure([("msg", TypeDescriptor::String), ("extra", Primitive::U8.into())]);
		{
			let value = OwnedValue::new(&mut guest, ptr, wrong);
			assert!(matches!(value.read(), Err(Error::SchemaMismatch(_))));
		}
		assert!(!guest.is_live(ptr));
	}

	#[test]
	fn copies_belong_to_the_destination() {
		let mut guest = LinearMemory::guest();
		let mut host = LinearMemory::host();
		let value = Value::Struct(vec![Value::bytes(b"hi")]);
		let guarded = OwnedValue::marshal(&mut guest, &value, message()).unwrap();
		let copy = guarded.transfer_to(&mut host).unwrap();
		guarded.release().unwrap();
		assert_eq!(guest.live_allocations(), 0);
		let copy = OwnedValue::new(&mut host, copy, message());
		assert_eq!(copy.ownership(), Ownership::Host);
		assert_eq!(copy.read().unwrap(), value);
		copy.release().unwrap();
		assert_eq!(host.live_allocations(), 0);
	}

	#[test]
	fn into_raw_hands_over_the_obligation() {
		let mut guest = LinearMemory::guest();
		let ptr = OwnedValue::marshal(&mut guest, &Value::U64(9), Primitive::U64.into()).unwrap().into_raw();
		assert!(guest.is_live(ptr));
		marshal::release(&mut guest, ptr, &Primitive::U64.into()).unwrap();
	}
}
