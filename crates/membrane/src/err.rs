use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
	#[error("Zero-length allocations are not supported")]
	ZeroLength,
	#[error("Allocation of {0} bytes exceeds the address space")]
	TooLarge(usize),
	#[error("Allocation of {0} bytes failed: the allocator is exhausted")]
	Exhausted(usize),
	#[error("Cannot deallocate a null address")]
	Null,
	#[error("Address {0:#x} is not a live allocation (double free or foreign address)")]
	NotLive(usize),
	#[error("{0} elements do not fit in the address space")]
	Overflow(u64),
}
