//! The host side of a call across the boundary.
//!
//! A call runs in four steps, each with a single owner for every allocation:
//!
//! 1. the input is marshaled into guest memory, owned by the host
//! 2. the input address is lent to the entry point for the duration of the call
//! 3. the input is released, whether the call succeeded or not
//! 4. the output the guest allocated is read back, then released by the host
//!
//! When a call completes, every guest allocation it made has been freed.

use anyhow::{Context, Result, bail};
use membrane_types::err::Error;
use membrane_types::{MemoryController, OwnedValue, Ptr, Schema, TypeDescriptor, Value, marshal};
use tracing::{debug, warn};

use crate::guest::Guest;

pub struct Boundary<G: Guest> {
	guest: G,
	schema: Schema,
	/// Set once the guest violated the allocator contract
	poisoned: bool,
}

impl<G: Guest> Boundary<G> {
	/// Pair a guest with the schema describing its entry points.
	pub fn new(guest: G, schema: Schema) -> Result<Self> {
		schema.validate().context("Invalid schema")?;
		Ok(Self {
			guest,
			schema,
			poisoned: false,
		})
	}

	pub fn guest(&self) -> &G {
		&self.guest
	}

	pub fn guest_mut(&mut self) -> &mut G {
		&mut self.guest
	}

	pub fn schema(&self) -> &Schema {
		&self.schema
	}

	pub fn into_guest(self) -> G {
		self.guest
	}

	pub fn is_poisoned(&self) -> bool {
		self.poisoned
	}

	fn entry(&self, entry: &str) -> Result<(TypeDescriptor, TypeDescriptor)> {
		if self.poisoned {
			bail!("Guest memory can no longer be trusted after a boundary violation");
		}
		let (input, output) = self.schema.entry(entry)?;
		Ok((input.clone(), output.clone()))
	}

	/// Remember boundary violations, after which the guest is not called again.
	fn check<T>(&mut self, res: Result<T>) -> Result<T> {
		if let Err(e) = &res {
			if e.downcast_ref::<Error>().is_some_and(Error::is_fatal_to_instance) {
				warn!("Poisoning guest after a boundary violation: {e}");
				self.poisoned = true;
			}
		}
		res
	}

	/// Call `entry` with `input`, returning the output value.
	pub fn invoke(&mut self, entry: &str, input: &Value) -> Result<Value> {
		let (input_ty, output_ty) = self.entry(entry)?;
		debug!(entry, "invoking");
		let res = invoke(&mut self.guest, entry, input, input_ty, output_ty);
		self.check(res)
	}

	/// Call `entry` with a value staged in host memory, transferring it into
	/// the guest and the output back into `host`.
	///
	/// The input stays owned by the caller. The returned address is a new
	/// allocation in `host`, owned by the caller as well.
	pub fn invoke_staged<H>(&mut self, entry: &str, host: &mut H, input: Ptr) -> Result<Ptr>
	where
		H: MemoryController + ?Sized,
	{
		let (input_ty, output_ty) = self.entry(entry)?;
		debug!(entry, %input, "invoking with a staged input");
		let res = invoke_staged(&mut self.guest, entry, host, input, input_ty, output_ty);
		self.check(res)
	}
}

/// Lend `input` to `entry` for one call, then release it whatever the outcome.
fn call<G: Guest>(entry: &str, mut input: OwnedValue<'_, G>) -> Result<Ptr> {
	let ptr = input.lend();
	let output = input.controller().call(entry, ptr);
	input.settle();
	let released = input.release().with_context(|| format!("Failed to release the input of '{entry}'"));
	let output = output.with_context(|| format!("Call to '{entry}' failed"))?;
	if let Err(e) = released {
		warn!(%output, "Abandoning the output of '{entry}'");
		return Err(e);
	}
	if output.is_null() {
		bail!("Entry point '{entry}' returned a null address");
	}
	Ok(output)
}

fn invoke<G: Guest>(
	guest: &mut G,
	entry: &str,
	value: &Value,
	input_ty: TypeDescriptor,
	output_ty: TypeDescriptor,
) -> Result<Value> {
	let input = OwnedValue::marshal(&mut *guest, value, input_ty)
		.with_context(|| format!("Failed to marshal the input of '{entry}'"))?;
	let ptr = call(entry, input)?;
	let output = OwnedValue::new(guest, ptr, output_ty);
	let value = output.read().with_context(|| format!("Failed to read the output of '{entry}'"));
	let released = output.release().with_context(|| format!("Failed to release the output of '{entry}'"));
	let value = value?;
	released?;
	Ok(value)
}

fn invoke_staged<G, H>(
	guest: &mut G,
	entry: &str,
	host: &mut H,
	staged: Ptr,
	input_ty: TypeDescriptor,
	output_ty: TypeDescriptor,
) -> Result<Ptr>
where
	G: Guest,
	H: MemoryController + ?Sized,
{
	let ptr = marshal::transfer(&*host, staged, &mut *guest, &input_ty)
		.with_context(|| format!("Failed to transfer the input of '{entry}'"))?;
	let ptr = call(entry, OwnedValue::new(&mut *guest, ptr, input_ty))?;
	let output = OwnedValue::new(guest, ptr, output_ty.clone());
	let copied = output.transfer_to(host).with_context(|| format!("Failed to transfer the output of '{entry}'"));
	let released = output.release().with_context(|| format!("Failed to release the output of '{entry}'"));
	let copied = copied?;
	if let Err(e) = released {
		if let Err(inner) = marshal::release(host, copied, &output_ty) {
			warn!(%copied, "Failed to release the copied output of '{entry}': {inner}");
		}
		return Err(e);
	}
	Ok(copied)
}
