use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use membrane_types::err::{Error, PrefixError};
use membrane_types::{MemoryController, Ptr, Side};
use tracing::{debug, trace, warn};
use wasmtime::{
	Engine, ExternType, Instance, Linker, Memory, Module, Store, StoreLimits, StoreLimitsBuilder,
	TypedFunc,
};
use wasmtime_wasi::p2::WasiCtxBuilder;
use wasmtime_wasi::preview1::{self, WasiP1Ctx};

use crate::config::ModuleConfig;
use crate::guest::Guest;

/// Exports every guest module must provide besides its entry points.
const ALLOCATE: &str = "allocate";
const DEALLOCATE: &str = "deallocate";
const MEMORY: &str = "memory";
/// Run once after instantiation when present (WASI reactors)
const INITIALIZE: &str = "_initialize";

pub struct StoreData {
	pub wasi: WasiP1Ctx,
	pub limits: StoreLimits,
}

/// A guest module instantiated with wasmtime.
///
/// The controller reaches guest memory through the exported `memory`, and
/// allocates and frees through the exported `allocate(len: u32) -> u32` and
/// `deallocate(ptr: u32)`. Lengths of the allocations it made itself are
/// remembered, so that their size can be checked when they are read back.
pub struct Controller {
	pub store: Store<StoreData>,
	pub instance: Instance,
	pub memory: Memory,
	allocate: TypedFunc<u32, u32>,
	deallocate: TypedFunc<u32, ()>,
	allocations: BTreeMap<u32, u32>,
}

impl Controller {
	pub fn new(wasm: &[u8], config: &ModuleConfig) -> Result<Self> {
		let engine = Engine::default();
		let module = Module::new(&engine, wasm).prefix_err(|| "Failed to construct module from bytes")?;

		let mut linker: Linker<StoreData> = Linker::new(&engine);
		preview1::add_to_linker_sync(&mut linker, |data| &mut data.wasi)
			.prefix_err(|| "Failed to add WASI to linker")?;

		let mut limits = StoreLimitsBuilder::new();
		if let Some(max) = config.max_memory {
			limits = limits.memory_size(max);
		}
		let store_data = StoreData {
			wasi: WasiCtxBuilder::new().inherit_stdout().inherit_stderr().build_p1(),
			limits: limits.build(),
		};
		let mut store = Store::new(&engine, store_data);
		store.limiter(|data| &mut data.limits);

		let instance = linker
			.instantiate(&mut store, &module)
			.prefix_err(|| "Failed to instantiate WASM module")?;
		let memory = instance
			.get_memory(&mut store, MEMORY)
			.prefix_err(|| "WASM module must export 'memory'")?;
		let allocate = instance
			.get_typed_func::<u32, u32>(&mut store, ALLOCATE)
			.prefix_err(|| "WASM module must export 'allocate(len: u32) -> u32'")?;
		let deallocate = instance
			.get_typed_func::<u32, ()>(&mut store, DEALLOCATE)
			.prefix_err(|| "WASM module must export 'deallocate(ptr: u32)'")?;

		if instance.get_export(&mut store, INITIALIZE).is_some() {
			let init = instance.get_typed_func::<(), ()>(&mut store, INITIALIZE)?;
			init.call(&mut store, ()).prefix_err(|| "Failed to initialize WASM module")?;
		}

		debug!(pages = memory.size(&store), "instantiated guest module");
		Ok(Self {
			store,
			instance,
			memory,
			allocate,
			deallocate,
			allocations: BTreeMap::new(),
		})
	}

	pub fn from_file(path: &Path, config: &ModuleConfig) -> Result<Self> {
		let wasm = std::fs::read(path)
			.prefix_err(|| format!("Failed to read WASM module '{}'", path.display()))?;
		Self::new(&wasm, config)
	}

	/// The exported functions which are not part of the allocator contract.
	pub fn list(&mut self) -> Vec<String> {
		let names: Vec<String> = self
			.instance
			.exports(&mut self.store)
			.map(|export| export.name().to_string())
			.filter(|name| ![ALLOCATE, DEALLOCATE, INITIALIZE].contains(&name.as_str()))
			.collect();
		names
			.into_iter()
			.filter(|name| {
				self.instance
					.get_export(&mut self.store, name)
					.is_some_and(|export| matches!(export.ty(&self.store), ExternType::Func(_)))
			})
			.collect()
	}

	fn range(&self, ptr: Ptr, len: u32) -> membrane_types::Result<std::ops::Range<usize>> {
		let start = ptr.address() as usize;
		let end = start + len as usize;
		if end > self.memory.data_size(&self.store) {
			return Err(Error::boundary(
				Side::Guest,
				ptr,
				format!("access of {len} bytes is out of bounds"),
			));
		}
		Ok(start..end)
	}
}

impl MemoryController for Controller {
	fn side(&self) -> Side {
		Side::Guest
	}

	fn alloc(&mut self, len: u32) -> membrane_types::Result<Ptr> {
		if len == 0 {
			return Err(Error::allocation(Side::Guest, 0, "zero-length allocations are not supported"));
		}
		let address = self
			.allocate
			.call(&mut self.store, len)
			.map_err(|e| Error::allocation(Side::Guest, len.into(), format!("guest trapped: {e}")))?;
		let ptr = Ptr::new(address);
		if ptr.is_null() {
			return Err(Error::allocation(Side::Guest, len.into(), "guest allocator returned null"));
		}
		if let Err(e) = self.range(ptr, len) {
			if let Err(trap) = self.deallocate.call(&mut self.store, address) {
				warn!(%ptr, "Failed to return an out of bounds region to the guest: {trap}");
			}
			return Err(Error::allocation(
				Side::Guest,
				len.into(),
				format!("guest allocator returned an unusable region: {e}"),
			));
		}
		// Regions handed to the host are zeroed whatever the guest allocator does
		self.mut_mem(ptr, len)?.fill(0);
		self.allocations.insert(address, len);
		trace!(%ptr, len, "allocate");
		Ok(ptr)
	}

	fn free(&mut self, ptr: Ptr) -> membrane_types::Result<()> {
		if ptr.is_null() {
			return Err(Error::boundary(Side::Guest, ptr, "null pointer"));
		}
		self.range(ptr, 1)?;
		self.deallocate
			.call(&mut self.store, ptr.address())
			.map_err(|e| Error::boundary(Side::Guest, ptr, format!("guest trapped: {e}")))?;
		self.allocations.remove(&ptr.address());
		trace!(%ptr, "deallocate");
		Ok(())
	}

	fn mem(&self, ptr: Ptr, len: u32) -> membrane_types::Result<&[u8]> {
		let range = self.range(ptr, len)?;
		Ok(&self.memory.data(&self.store)[range])
	}

	fn mut_mem(&mut self, ptr: Ptr, len: u32) -> membrane_types::Result<&mut [u8]> {
		let range = self.range(ptr, len)?;
		Ok(&mut self.memory.data_mut(&mut self.store)[range])
	}

	fn allocation_len(&self, ptr: Ptr) -> Option<u32> {
		self.allocations.get(&ptr.address()).copied()
	}
}

impl Guest for Controller {
	fn call(&mut self, entry: &str, input: Ptr) -> Result<Ptr> {
		let func = self
			.instance
			.get_typed_func::<u32, u32>(&mut self.store, entry)
			.prefix_err(|| format!("WASM module must export '{entry}(input: u32) -> u32'"))?;
		trace!(entry, %input, "calling guest entry point");
		let output = func
			.call(&mut self.store, input.address())
			.prefix_err(|| format!("Guest trapped in '{entry}'"))?;
		Ok(Ptr::new(output))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_bytes_which_are_not_a_module() {
		let err = Controller::new(b"not a module", &ModuleConfig::default()).err().unwrap();
		assert!(err.to_string().starts_with("Failed to construct module from bytes"), "{err}");
	}

	#[test]
	fn reports_missing_module_files() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("missing.wasm");
		let err = Controller::from_file(&path, &ModuleConfig::default()).err().unwrap();
		assert!(err.to_string().contains("missing.wasm"), "{err}");
	}
}
