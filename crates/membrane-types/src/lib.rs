//! Core of the Membrane host/guest interchange contract.
//!
//! The crate is shared by both sides of the boundary. It defines the schema type
//! model ([`TypeDescriptor`]), the packed [`layout`] rules derived from it, the
//! [`MemoryController`] seam every address space implements, and the marshaling
//! engine which moves values between address spaces while rebasing every
//! pointer they contain.
//!
//! # Wire rules
//!
//! - All multi-byte integers and floats are little-endian
//! - Structs are packed: no padding between or after fields
//! - Addresses occupy an 8-byte slot, zero meaning null
//! - A growable array is `[address: u64][length: u64][capacity: u64]`

#[macro_use]
mod mac;

pub mod cnf;
pub mod controller;
pub mod descriptor;
pub mod err;
pub mod growable;
pub mod layout;
pub mod marshal;
pub mod memory;
pub mod ownership;
pub mod schema;
pub mod value;

pub use controller::{MemoryController, Ptr, Side};
pub use descriptor::{Field, Primitive, TypeDescriptor, Variant};
pub use err::{Error, PrefixError, Result};
pub use growable::Growable;
pub use marshal::{Visit, marshal_to, release, transfer, unmarshal_from, unmarshal_observed};
pub use memory::LinearMemory;
pub use ownership::{OwnedValue, Ownership};
pub use schema::{EntryPoint, Schema};
pub use value::Value;
