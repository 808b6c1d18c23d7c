//! The exchange cell: a lock-free publish-latest register with reader
//! pinning, living directly inside a shared memory mapping.
//!
//! One writer per cell publishes its most recent value; up to
//! `NUM_PROCESSES - 1` readers pin that value while copying it out.
//! Readers may miss intermediate publications but never observe a torn
//! payload and never observe publications out of order. All coordination
//! goes through one 32-bit atomic word per slot plus one 32-bit "current
//! slot" word; no mutexes, no futexes.
//!
//! # State word
//!
//! Bits `[0, NUM_PROCESSES)` of a slot's state word are reader pins, one
//! per process. The highest bit is the writer mark, set while the writer
//! considers the slot the most recent message or is still filling it. A
//! slot whose word is fully zero is free and its payload is garbage.
//!
//! # Crash tolerance
//!
//! Every field of the cell is valid when zero, so a freshly created
//! (kernel-zeroed) region needs no initialisation handshake, and a process
//! that reattaches after a crash repairs exactly its own leftovers with
//! [`SwapCell::writer_reset`] or [`SwapCell::reader_reset`] without
//! touching anyone else's state.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::{NUM_PROCESSES, SLOT_COUNT};
use crate::error::{Result, SwapError};

/// Writer mark in a slot's state word. All lower bits are reader pins.
pub const WRITER_BIT: u32 = 1 << 31;

/// Ensures the wrapped value sits on its own cache line.
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

/// One unit of publication: a state word and the payload it guards.
///
/// `MaybeUninit` keeps the all-zero byte pattern a valid `Slot<T>` for any
/// payload type; the payload of a free slot is simply never read.
#[repr(C, align(64))]
struct Slot<T> {
    state: AtomicU32,
    payload: UnsafeCell<MaybeUninit<T>>,
}

/// SPMC latest-value register over `SLOT_COUNT` slots.
///
/// The handle returned by [`Self::reader_lock`] is the index of the pinned
/// slot, nothing more. Ownership lives in the state words, not in the
/// handles: unlocking through a handle obtained elsewhere succeeds whenever
/// the caller's pin bit is set on that slot.
#[repr(C)]
pub struct SwapCell<T> {
    /// Index of the slot holding the most recent message, plus one.
    /// Zero is reserved for "nothing ever published".
    current_slot_id: CacheAligned<AtomicU32>,
    slots: [Slot<T>; SLOT_COUNT],
}

// SAFETY: all cross-thread access goes through the atomic state protocol;
// a payload is only read while a pin or the writer mark holds its slot
// stable, and only written while its state word is zero.
unsafe impl<T: Copy + Send> Send for SwapCell<T> {}
unsafe impl<T: Copy + Send> Sync for SwapCell<T> {}

impl<T: Copy> SwapCell<T> {
    /// Exact byte size of the region backing one cell.
    pub const BYTES: usize = std::mem::size_of::<Self>();

    /// Heap-backed cell in the zero state, indistinguishable from a freshly
    /// created shared region. For single-process use and tests.
    pub fn new_boxed() -> Box<Self> {
        let layout = std::alloc::Layout::new::<Self>();
        // SAFETY: the all-zero bit pattern is a valid cell: atomics at
        // zero, payloads MaybeUninit.
        unsafe {
            let ptr = std::alloc::alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    /// Reinterprets a mapped region as a cell.
    ///
    /// # Safety
    /// `ptr` must point to at least [`Self::BYTES`] bytes, aligned to 64,
    /// that are either zero-filled or a previous incarnation of the same
    /// cell type, and the memory must stay mapped for `'a`.
    pub unsafe fn from_raw<'a>(ptr: *mut u8) -> &'a Self {
        &*(ptr as *const Self)
    }

    /// True until the first publication. Purely observational: a publish
    /// may land right after the load.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.current_slot_id.0.load(Ordering::Acquire) == 0
    }

    /// Pins the most recent slot for `process` and returns its index.
    ///
    /// The pinned payload stays stable until [`Self::reader_unlock`] with
    /// the returned handle. Fails with [`SwapError::Empty`] before the
    /// first publication and with [`SwapError::DoubleLock`] when the
    /// process's pin is already set on the slot about to be locked.
    ///
    /// A single process must not pin two different slots at once; the cell
    /// does not detect that, the sizing of the slot array merely stops
    /// absorbing it. The [`Consumer`](crate::Consumer) adapter enforces it.
    pub fn reader_lock(&self, process: usize) -> Result<usize> {
        debug_assert!(process < NUM_PROCESSES);
        let pin: u32 = 1 << process;

        // Setting the pin on "whichever slot is currently published" is not
        // one atomic step, so the pin may only land on a slot that still
        // carries the writer mark; the CAS re-checks the mark and sets the
        // pin in the same stroke. Any interference restarts the whole read,
        // current_slot_id included.
        loop {
            let id = self.current_slot_id.0.load(Ordering::Acquire);
            if id == 0 {
                return Err(SwapError::Empty);
            }
            let slot_index = (id - 1) as usize;
            let state = self.slots[slot_index].state.load(Ordering::Acquire);
            if state & WRITER_BIT == 0 {
                // The writer moved on and released this slot; its last
                // reader may free it any moment. Chase the newer slot.
                std::hint::spin_loop();
                continue;
            }
            if state & pin != 0 {
                return Err(SwapError::DoubleLock {
                    process,
                    slot: slot_index,
                });
            }
            if self.slots[slot_index]
                .state
                .compare_exchange_weak(state, state | pin, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(slot_index);
            }
        }
    }

    /// Copy of the payload pinned at `handle`.
    ///
    /// # Safety
    /// The caller must hold a pin on `handle` obtained from
    /// [`Self::reader_lock`] and not yet released; the pin is what keeps
    /// the payload initialised and stable.
    #[inline]
    pub unsafe fn read(&self, handle: usize) -> T {
        (*self.slots[handle].payload.get()).assume_init_read()
    }

    /// Clears the pin of `process` on the slot at `handle`.
    ///
    /// The state word, not the handle's origin, is the ground truth: a
    /// handle obtained from another lock call unlocks fine as long as this
    /// process's pin is set on that slot. Fails with
    /// [`SwapError::NotLocked`] otherwise.
    pub fn reader_unlock(&self, process: usize, handle: usize) -> Result<()> {
        let pin: u32 = 1 << process;
        if self.slots[handle].state.load(Ordering::Acquire) & pin == 0 {
            return Err(SwapError::NotLocked {
                process,
                slot: handle,
            });
        }
        self.slots[handle].state.fetch_and(!pin, Ordering::AcqRel);
        Ok(())
    }

    /// Releases every pin held by `process`, on any slot.
    ///
    /// Recovery step for a reader reattaching after a crash; harmless when
    /// the process holds no pins.
    pub fn reader_reset(&self, process: usize) {
        let pin: u32 = 1 << process;
        for slot in &self.slots {
            if slot.state.load(Ordering::Acquire) & pin != 0 {
                slot.state.fetch_and(!pin, Ordering::AcqRel);
            }
        }
    }

    /// Publishes `value` as the most recent message.
    ///
    /// Fails with [`SwapError::NoFreeSlot`] only when the single-pin
    /// precondition of [`Self::reader_lock`] was violated upstream; with
    /// `SLOT_COUNT` slots, `NUM_PROCESSES - 1` single-pinning readers
    /// cannot exhaust the array.
    pub fn writer_publish(&self, value: T) -> Result<()> {
        // A zero state word means no readers and no writer mark, so the
        // payload can be overwritten freely.
        let next = self
            .slots
            .iter()
            .position(|slot| slot.state.load(Ordering::Acquire) == 0)
            .ok_or(SwapError::NoFreeSlot)?;

        // SAFETY: nobody can pin a slot while its state is zero, and the
        // cell has a single writer.
        unsafe { (*self.slots[next].payload.get()).write(value) };

        // Release-publish the payload: a reader that pins this slot
        // acquire-loads the state word and therefore sees the write above.
        self.slots[next].state.fetch_or(WRITER_BIT, Ordering::AcqRel);

        // The publish point: readers starting a lock after this swap
        // observe the new slot.
        let old = self
            .current_slot_id
            .0
            .swap(next as u32 + 1, Ordering::AcqRel);

        // The previous slot stays alive only for the readers still
        // pinning it.
        if old != 0 {
            self.slots[(old - 1) as usize]
                .state
                .fetch_and(!WRITER_BIT, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Clears writer marks that a crashed writer left behind.
    ///
    /// A crash after marking a slot but before swinging `current_slot_id`
    /// leaves the mark on a slot that never became current; a crash right
    /// after the swing leaves the previous slot still marked. Both strays
    /// are cleared, the mark on the current slot is kept, reader pins are
    /// untouched.
    pub fn writer_reset(&self) {
        let current = self.current_slot_id.0.load(Ordering::Acquire);
        for (i, slot) in self.slots.iter().enumerate() {
            if current != 0 && i == (current - 1) as usize {
                continue;
            }
            if slot.state.load(Ordering::Acquire) & WRITER_BIT != 0 {
                slot.state.fetch_and(!WRITER_BIT, Ordering::AcqRel);
            }
        }
    }
}
