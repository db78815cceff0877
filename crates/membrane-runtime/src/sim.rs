//! An in-process guest.
//!
//! A [`SimulatedGuest`] pairs a [`LinearMemory`] on the guest side with entry
//! points written as Rust closures. The closures see only the guest's memory
//! and the input address, exactly like an exported WASM function does, so
//! the whole call flow can be exercised without compiling a module.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, bail};
use membrane_types::{LinearMemory, MemoryController, Ptr, Side};
use tracing::trace;

use crate::guest::Guest;

type Entry = Box<dyn Fn(&mut LinearMemory, Ptr) -> Result<Ptr> + Send + Sync>;

pub struct SimulatedGuest {
	memory: LinearMemory,
	entries: BTreeMap<String, Entry>,
}

impl Default for SimulatedGuest {
	fn default() -> Self {
		Self::new(LinearMemory::guest())
	}
}

impl SimulatedGuest {
	pub fn new(memory: LinearMemory) -> Self {
		Self {
			memory,
			entries: BTreeMap::new(),
		}
	}

	/// Register an entry point.
	pub fn with_entry<F>(mut self, name: impl Into<String>, entry: F) -> Self
	where
		F: Fn(&mut LinearMemory, Ptr) -> Result<Ptr> + Send + Sync + 'static,
	{
		self.entries.insert(name.into(), Box::new(entry));
		self
	}

	pub fn memory(&self) -> &LinearMemory {
		&self.memory
	}

	pub fn memory_mut(&mut self) -> &mut LinearMemory {
		&mut self.memory
	}

	/// The names of the registered entry points.
	pub fn list(&self) -> Vec<String> {
		self.entries.keys().cloned().collect()
	}

	pub fn live_allocations(&self) -> usize {
		self.memory.live_allocations()
	}
}

impl fmt::Debug for SimulatedGuest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SimulatedGuest")
			.field("entries", &self.entries.keys().collect::<Vec<_>>())
			.field("live_allocations", &self.memory.live_allocations())
			.finish()
	}
}

impl MemoryController for SimulatedGuest {
	fn side(&self) -> Side {
		self.memory.side()
	}

	fn alloc(&mut self, len: u32) -> membrane_types::Result<Ptr> {
		self.memory.alloc(len)
	}

	fn free(&mut self, ptr: Ptr) -> membrane_types::Result<()> {
		self.memory.free(ptr)
	}

	fn mem(&self, ptr: Ptr, len: u32) -> membrane_types::Result<&[u8]> {
		self.memory.mem(ptr, len)
	}

	fn mut_mem(&mut self, ptr: Ptr, len: u32) -> membrane_types::Result<&mut [u8]> {
		self.memory.mut_mem(ptr, len)
	}

	fn allocation_len(&self, ptr: Ptr) -> Option<u32> {
		self.memory.allocation_len(ptr)
	}
}

impl Guest for SimulatedGuest {
	fn call(&mut self, entry: &str, input: Ptr) -> Result<Ptr> {
		let Some(handler) = self.entries.get(entry) else {
			bail!("Simulated guest has no entry point '{entry}'");
		};
		trace!(entry, %input, "calling simulated entry point");
		handler(&mut self.memory, input)
	}
}
