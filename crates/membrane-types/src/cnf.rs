use std::sync::LazyLock;

/// The byte written over every freed region when poisoning is enabled
pub const POISON_BYTE: u8 = 0xDD;

/// The alignment of every region handed out by a [`crate::LinearMemory`]
pub const ALLOCATION_ALIGN: u32 = 8;

/// Whether freed regions are overwritten with [`POISON_BYTE`] (defaults to on in debug builds)
pub static POISON_FREED: LazyLock<bool> =
	lazy_env_parse!("MEMBRANE_POISON_FREED", bool, cfg!(debug_assertions));

/// The largest linear memory a [`crate::LinearMemory`] may grow to (defaults to 64 MiB)
pub static MAX_MEMORY: LazyLock<u32> = lazy_env_parse!("MEMBRANE_MAX_MEMORY", u32, 64 << 20);

/// How many pointers or out-of-line arrays deep a descriptor may nest (defaults to 128)
pub static MAX_NESTING: LazyLock<usize> = lazy_env_parse!("MEMBRANE_MAX_NESTING", usize, 128);

/// The first address of simulated guest memory (defaults to 0x10)
pub static GUEST_BASE: LazyLock<u32> = lazy_env_parse!("MEMBRANE_GUEST_BASE", u32, 0x10);

/// The first address of host-side linear memory (defaults to 0x4000_0000)
///
/// Host and guest address ranges never overlap, so an address which was not
/// rebased can never be mistaken for a live allocation on the other side.
pub static HOST_BASE: LazyLock<u32> =
	lazy_env_parse!("MEMBRANE_HOST_BASE", u32, 0x4000_0000);
