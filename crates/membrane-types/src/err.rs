use std::fmt::Display;

use thiserror::Error;

use crate::controller::{Ptr, Side};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the interchange contract can surface.
///
/// Schema and mismatch errors describe a disagreement about types and are
/// never recoverable by retrying. Allocation and boundary errors abort the
/// current call only, although after a boundary error the memory of the
/// offending instance should no longer be trusted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
	/// The type descriptor is malformed or self-contradictory
	#[error("Invalid schema: {0}")]
	Schema(String),
	/// The allocator is exhausted or the requested size is invalid
	#[error("Allocation of {len} bytes failed on the {side} side: {reason}")]
	Allocation {
		side: Side,
		len: u64,
		reason: String,
	},
	/// The allocate/deallocate contract was violated
	#[error("Boundary violation on the {side} side at {ptr}: {reason}")]
	Boundary {
		side: Side,
		ptr: Ptr,
		reason: String,
	},
	/// The bytes at an address do not agree with the type used to read them
	#[error("Schema mismatch: {0}")]
	SchemaMismatch(String),
}

impl Error {
	pub fn schema(reason: impl Into<String>) -> Self {
		Error::Schema(reason.into())
	}

	pub fn mismatch(reason: impl Into<String>) -> Self {
		Error::SchemaMismatch(reason.into())
	}

	pub fn allocation(side: Side, len: u64, reason: impl Into<String>) -> Self {
		Error::Allocation {
			side,
			len,
			reason: reason.into(),
		}
	}

	pub fn boundary(side: Side, ptr: Ptr, reason: impl Into<String>) -> Self {
		Error::Boundary {
			side,
			ptr,
			reason: reason.into(),
		}
	}

	/// Whether the error leaves the memory of the affected side untrustworthy.
	pub fn is_fatal_to_instance(&self) -> bool {
		matches!(self, Error::Boundary { .. })
	}
}

/// Attach a human readable prefix to an error while converting it into an
/// [`anyhow::Error`].
///
/// ```rust,ignore
/// let memory = instance
/// 	.get_memory(&mut store, "memory")
/// 	.prefix_err(|| "WASM module must export 'memory'")?;
/// ```
pub trait PrefixError<T> {
	fn prefix_err<F, S>(self, prefix: F) -> anyhow::Result<T>
	where
		F: FnOnce() -> S,
		S: Display;
}

impl<T, E: Display> PrefixError<T> for std::result::Result<T, E> {
	fn prefix_err<F, S>(self, prefix: F) -> anyhow::Result<T>
	where
		F: FnOnce() -> S,
		S: Display,
	{
		self.map_err(|e| anyhow::anyhow!("{}: {}", prefix(), e))
	}
}

impl<T> PrefixError<T> for Option<T> {
	fn prefix_err<F, S>(self, prefix: F) -> anyhow::Result<T>
	where
		F: FnOnce() -> S,
		S: Display,
	{
		self.ok_or_else(|| anyhow::anyhow!("{}", prefix()))
	}
}
