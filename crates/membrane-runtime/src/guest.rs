use anyhow::Result;
use membrane_types::{MemoryController, Ptr};

/// A guest address space with entry points the host can call.
///
/// Every entry point has the same shape: it takes the address of its input
/// root in guest memory and returns the address of a freshly allocated output
/// root, or null when it failed. The input stays owned by the host for the
/// duration of the call, the output is owned by the host once returned.
pub trait Guest: MemoryController {
	fn call(&mut self, entry: &str, input: Ptr) -> Result<Ptr>;
}
