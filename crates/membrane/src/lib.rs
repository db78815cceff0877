//! Guest-side SDK for Membrane modules.
//!
//! A guest module built with this crate exports the boundary allocator
//! ([`allocator!`]) and one or more entry points ([`entry!`]). Values are
//! exchanged as packed `#[repr(C, packed)]` structs whose layout follows the
//! interchange rules of [`membrane_types::layout`]; growable arrays are
//! [`Vector`]s.
//!
//! ```rust,ignore
//! membrane::allocator!();
//! membrane::entry!(process_data, process);
//!
//! #[repr(C, packed)]
//! #[derive(Clone, Copy)]
//! struct Input { a: u8, b: f64 }
//!
//! #[repr(C, packed)]
//! struct Output { msg: membrane::Vector<u8> }
//!
//! fn process(input: Input) -> membrane::Result<Output> {
//! 	Ok(Output { msg: membrane::Vector::from_text("hello")? })
//! }
//! ```

pub mod alloc;
pub mod err;
pub mod io;
pub mod vector;

pub use err::{Error, Result};
pub use vector::{Vector, Zeroable};
