use membrane_runtime::{Boundary, Controller, ModuleConfig};
use membrane_types::{Error, MemoryController, Primitive, Ptr, Schema, TypeDescriptor, Value};

/// A guest with a bump allocator which keeps a live flag in front of every
/// region and traps when a region is freed twice, or was never handed out.
const CALCULATOR: &str = r#"
(module
	(memory (export "memory") 1)
	(global $bump (mut i32) (i32.const 1024))
	(global $live (mut i32) (i32.const 0))
	(data (i32.const 16) "Char: ")

	(func $allocate (export "allocate") (param $len i32) (result i32)
		(local $ptr i32)
		(local.set $ptr (i32.add (global.get $bump) (i32.const 8)))
		(i32.store (i32.sub (local.get $ptr) (i32.const 8)) (local.get $len))
		(i32.store (i32.sub (local.get $ptr) (i32.const 4)) (i32.const 1))
		(global.set $bump
			(i32.and
				(i32.add (i32.add (local.get $ptr) (local.get $len)) (i32.const 7))
				(i32.const -8)))
		(global.set $live (i32.add (global.get $live) (i32.const 1)))
		(local.get $ptr))

	(func $deallocate (export "deallocate") (param $ptr i32)
		(if (i32.lt_u (local.get $ptr) (i32.const 1032)) (then unreachable))
		(if (i32.ge_u (local.get $ptr) (global.get $bump)) (then unreachable))
		(if (i32.ne (i32.load (i32.sub (local.get $ptr) (i32.const 4))) (i32.const 1))
			(then unreachable))
		(i32.store (i32.sub (local.get $ptr) (i32.const 4)) (i32.const 0))
		(global.set $live (i32.sub (global.get $live) (i32.const 1))))

	(func (export "live") (result i32)
		(global.get $live))

	;; { a: u8, b: f64, c: f64 } -> { a: u8, sum: f64, msg: vec<u8> }
	(func $describe (export "describe") (param $in i32) (result i32)
		(local $out i32)
		(local $buf i32)
		(local.set $out (call $allocate (i32.const 33)))
		(local.set $buf (call $allocate (i32.const 7)))
		(memory.copy (local.get $buf) (i32.const 16) (i32.const 6))
		(i32.store8 offset=6 (local.get $buf) (i32.load8_u (local.get $in)))
		(i32.store8 (local.get $out) (i32.load8_u (local.get $in)))
		(f64.store offset=1 (local.get $out)
			(f64.add (f64.load offset=1 (local.get $in)) (f64.load offset=9 (local.get $in))))
		(i64.store offset=9 (local.get $out) (i64.extend_i32_u (local.get $buf)))
		(i64.store offset=17 (local.get $out) (i64.const 7))
		(i64.store offset=25 (local.get $out) (i64.const 7))
		(local.get $out))

	;; Frees its own input, which belongs to the host
	(func (export "careless") (param $in i32) (result i32)
		(local $out i32)
		(local.set $out (call $describe (local.get $in)))
		(call $deallocate (local.get $in))
		(local.get $out))
)
"#;

/// A guest whose allocator hands out addresses past the end of its memory.
const OUT_OF_BOUNDS: &str = r#"
(module
	(memory (export "memory") 1)
	(global $freed (mut i32) (i32.const 0))
	(func (export "allocate") (param i32) (result i32)
		(i32.const -16))
	(func (export "deallocate") (param i32)
		(global.set $freed (i32.add (global.get $freed) (i32.const 1))))
	(func (export "freed") (result i32)
		(global.get $freed))
)
"#;

fn calculator() -> Controller {
	Controller::new(CALCULATOR.as_bytes(), &ModuleConfig::default()).unwrap()
}

fn counter(ctrl: &mut Controller, name: &str) -> i32 {
	let func = ctrl.instance.get_typed_func::<(), i32>(&mut ctrl.store, name).unwrap();
	func.call(&mut ctrl.store, ()).unwrap()
}

fn schema() -> Schema {
	Schema::default()
		.with_type(
			"HostToGuest",
			TypeDescriptor::structure([
				("a", Primitive::U8.into()),
				("b", Primitive::F64.into()),
				("c", Primitive::F64.into()),
			]),
		)
		.with_type(
			"Summary",
			TypeDescriptor::structure([
				("a", Primitive::U8.into()),
				("sum", Primitive::F64.into()),
				("msg", TypeDescriptor::growable(Primitive::U8.into())),
			]),
		)
		.with_root("HostToGuest")
		.with_entry("describe", "HostToGuest", "Summary")
		.with_entry("careless", "HostToGuest", "Summary")
}

fn input() -> Value {
	Value::Struct(vec![Value::U8(b'X'), Value::F64(2.0), Value::F64(3.0)])
}

#[test_log::test]
fn calls_cross_a_real_instance_and_leave_nothing_behind() {
	let mut boundary = Boundary::new(calculator(), schema()).unwrap();
	for _ in 0..3 {
		let output = boundary.invoke("describe", &input()).unwrap();
		assert_eq!(
			output,
			Value::Struct(vec![Value::U8(b'X'), Value::F64(5.0), Value::bytes(b"Char: X")])
		);
		assert_eq!(counter(boundary.guest_mut(), "live"), 0);
	}
}

#[test_log::test]
fn guest_memory_is_reached_through_the_controller() {
	let mut ctrl = calculator();
	let ptr = ctrl.alloc(12).unwrap();
	assert_eq!(ctrl.allocation_len(ptr), Some(12));
	assert_eq!(ctrl.mem(ptr, 12).unwrap(), &[0u8; 12]);
	ctrl.mut_mem(ptr, 4).unwrap().copy_from_slice(b"wasm");
	assert_eq!(ctrl.mem(ptr, 4).unwrap(), b"wasm");
	assert_eq!(counter(&mut ctrl, "live"), 1);
	ctrl.free(ptr).unwrap();
	assert_eq!(ctrl.allocation_len(ptr), None);
	assert_eq!(counter(&mut ctrl, "live"), 0);

	assert!(matches!(ctrl.alloc(0), Err(Error::Allocation { .. })));
	assert!(matches!(ctrl.mem(Ptr::new(65_530), 8), Err(Error::Boundary { .. })));
	let mut exports = ctrl.list();
	exports.sort();
	assert_eq!(exports, ["careless", "describe", "live"]);
}

#[test_log::test]
fn double_frees_are_boundary_errors() {
	let mut ctrl = calculator();
	let ptr = ctrl.alloc(8).unwrap();
	ctrl.free(ptr).unwrap();
	assert!(matches!(ctrl.free(ptr), Err(Error::Boundary { .. })));
	assert!(matches!(ctrl.free(Ptr::new(16)), Err(Error::Boundary { .. })));
	assert!(matches!(ctrl.free(Ptr::NULL), Err(Error::Boundary { .. })));
}

#[test_log::test]
fn guests_freeing_host_memory_poison_the_boundary() {
	let mut boundary = Boundary::new(calculator(), schema()).unwrap();
	let err = boundary.invoke("careless", &input()).unwrap_err();
	assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Boundary { .. })), "{err:#}");
	assert!(boundary.is_poisoned());
	assert!(boundary.invoke("describe", &input()).is_err());
}

#[test_log::test]
fn out_of_bounds_regions_are_returned_to_the_guest() {
	let mut ctrl = Controller::new(OUT_OF_BOUNDS.as_bytes(), &ModuleConfig::default()).unwrap();
	assert!(matches!(ctrl.alloc(8), Err(Error::Allocation { .. })));
	assert_eq!(counter(&mut ctrl, "freed"), 1);
}
