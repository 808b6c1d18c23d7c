//! swapcell - crash-tolerant latest-value exchange over POSIX shared memory
//!
//! N processes each publish their most recent value into a shared region of
//! their own and read the latest value of every peer, so each process is
//! one producer and N-1 consumers. Any process may be killed at any instant
//! and restarted later; survivors keep running and the restarted peer
//! reattaches to its old region and repairs the state it left behind.
//!
//! # Architecture
//!
//! - [`SwapCell`]: the core. A lock-free single-producer multiple-consumer
//!   publish-latest register with reader pinning, designed so that the
//!   all-zero region the kernel hands out is already a valid empty cell.
//! - [`Producer`] / [`Consumer`]: per-region adapters that attach to the
//!   shared memory and run the crash-recovery resets.
//! - the `swapcell` binary: one exchange peer, driven by a process index.
//!
//! # Guarantees
//!
//! - readers never observe a torn message and never observe publications
//!   out of order (they may skip some - latest-value, not a queue)
//! - every cell operation is lock-free; most are wait-free
//! - a crashed reader costs at most one pinned slot until it restarts; a
//!   crashed writer costs at most one stray mark until it restarts

pub mod cell;
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod producer;
pub mod shm;

pub use cell::SwapCell;
pub use consumer::Consumer;
pub use error::{Result, SwapError};
pub use message::Message;
pub use producer::Producer;
pub use shm::ShmRegion;
