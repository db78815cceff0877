//! Host side of the Membrane boundary.
//!
//! A [`Guest`] is an address space with callable entry points: either a real
//! WASM module driven by wasmtime ([`Controller`]) or an in-process stand-in
//! ([`SimulatedGuest`]). A [`Boundary`] pairs a guest with the [`Schema`] both
//! sides agreed on and runs the full call flow: marshal the input into guest
//! memory, call, read the output back and free everything the call allocated.
//!
//! [`Schema`]: membrane_types::Schema

pub mod boundary;
pub mod config;
pub mod controller;
pub mod guest;
pub mod sim;

pub use boundary::Boundary;
pub use config::{ModuleConfig, RuntimeConfig};
pub use controller::Controller;
pub use guest::Guest;
pub use sim::SimulatedGuest;
