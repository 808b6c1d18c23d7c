//! Error types for swapcell operations.

use std::io;
use thiserror::Error;

/// Result type for swapcell operations.
pub type Result<T> = std::result::Result<T, SwapError>;

/// Errors surfaced by the exchange cell and its adapters.
///
/// The protocol errors (`Empty` aside) indicate caller bugs rather than
/// transient conditions: a correct caller never double-pins a slot, never
/// unlocks a slot it does not pin, and never exhausts the slot array.
#[derive(Debug, Error)]
pub enum SwapError {
    /// Nothing has ever been published into the cell.
    #[error("cell is empty, nothing has been published yet")]
    Empty,

    /// The process already pins the slot it tried to lock.
    #[error("process {process} already pins slot {slot}")]
    DoubleLock { process: usize, slot: usize },

    /// The process holds no pin on the slot it tried to unlock.
    #[error("process {process} holds no pin on slot {slot}")]
    NotLocked { process: usize, slot: usize },

    /// Every slot is in use; only reachable when some reader pins more
    /// than one slot at a time.
    #[error("no free slot to publish into")]
    NoFreeSlot,

    /// The consumer already holds a locked message.
    #[error("a message is already locked, unlock it first")]
    LockHeld,

    /// The consumer holds no locked message.
    #[error("no message is locked")]
    NotHeld,

    /// Failed to create a shared memory object.
    #[error("failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open an existing shared memory object.
    #[error("failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to remove a shared memory object.
    #[error("failed to unlink shared memory '{name}': {source}")]
    ShmUnlink {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map a shared memory object.
    #[error("failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to size a shared memory object.
    #[error("failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// The region exists but is smaller than one exchange cell.
    #[error("shared region too small: need {need} bytes, got {got}")]
    RegionSize { need: usize, got: usize },
}
