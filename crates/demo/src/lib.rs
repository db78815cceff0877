//! A guest module which formats a character and the sum of two floats.
//!
//! Build with `cargo build -p demo --target wasm32-wasip1 --profile guest`
//! and run with
//! `membrane run process_data -c crates/demo/membrane.toml -i '{"struct": [{"u8": 88}, {"f64": 2.0}, {"f64": 3.0}]}'`.

use membrane::Vector;

membrane::allocator!();
membrane::entry!(process_data, process);

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct HostToGuest {
	pub a: u8,
	pub b: f64,
	pub c: f64,
}

#[repr(C, packed)]
pub struct GuestToHost {
	pub msg: Vector<u8>,
}

pub fn describe(input: &HostToGuest) -> String {
	let (a, b, c) = (input.a as char, input.b, input.c);
	format!("Char: {a} | {b:.6} + {c:.6} = {:.6}", b + c)
}

pub fn process(input: HostToGuest) -> membrane::Result<GuestToHost> {
	Ok(GuestToHost {
		msg: Vector::from_text(&describe(&input))?,
	})
}
