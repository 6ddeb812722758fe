//! # freequeue-core
//!
//! Lock-free multichannel ring buffer for moving fixed-size audio blocks
//! between one producer and one consumer.
//!
//! ## Architecture
//!
//! ```text
//! producer ─► FreeQueue::push ─► RingStore lanes ─► FreeQueue::pull ─► consumer
//!                  │                   ▲                  │
//!                  └── store write ────┴──── store read ──┘
//!                        (Release)   RingIndices   (Release)
//! ```
//!
//! A `RingStore` is either an `OwningStore` (allocated by `FreeQueue::new`) or
//! an `ExternalView` over a layout some other party wrote into `SharedMemory`.
//! Push and pull never block and never allocate.
//!
//! `HeapQueue` is the single-threaded sibling: no atomics, overwrite on
//! overflow, adjustable active channel count.

#![warn(clippy::all)]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod heap;
pub mod memory;
pub mod queue;
pub mod store;

// Convenience re-exports for downstream crates
pub use config::{QueueConfig, RENDER_QUANTUM_FRAMES};
pub use diagnostics::{QueueSnapshot, StatsSnapshot};
pub use error::{FreeQueueError, TransferError};
pub use heap::HeapQueue;
pub use memory::{LinearAllocator, SharedMemory};
pub use queue::{FreeQueue, QueueConsumer, QueueProducer};
pub use store::{ExternalView, LayoutDescriptor, OwningStore, RingStore};
