//! Compile-time deployment parameters.
//!
//! The process count is baked into the binary. Every participating process
//! must be built with the same value, because it fixes the slot count and
//! therefore the byte layout of the shared regions they all map.

/// Number of cooperating processes. Each one runs the same binary with a
/// distinct index in `[0, NUM_PROCESSES)`.
pub const NUM_PROCESSES: usize = 4;

// One reader-pin bit per process plus the writer mark must fit in the
// 32-bit slot state word.
const _: () = assert!(NUM_PROCESSES <= 31, "at most 31 processes are supported");

/// Slots per exchange cell. In the worst case `NUM_PROCESSES - 1` readers
/// each pin one old slot and one more slot carries the current message, so
/// `NUM_PROCESSES + 1` slots leave the writer a free one at all times.
pub const SLOT_COUNT: usize = NUM_PROCESSES + 1;

/// Default name prefix of the per-producer POSIX shared memory objects.
pub const SHM_NAME_PREFIX: &str = "shared_memory";

/// POSIX object name of the region owned by the producer with this index.
pub fn region_name(prefix: &str, producer_index: usize) -> String {
    format!("/{prefix}{producer_index}")
}
