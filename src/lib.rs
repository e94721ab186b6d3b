//! # brkalloc - A First-Fit Heap on the Program Break
//!
//! This crate provides a general purpose allocator that carves every block out
//! of the process data segment with `sbrk(2)`, keeps them in one linked chain,
//! and hands out the first free block large enough for each request.
//!
//! ## Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌────┬─────┬────┬─────┬────┬─────┬──────────────────────────────┐  │
//!   │   │ H1 │ A1  │ H2 │ A2  │ H3 │ A3  │        Unmapped              │  │
//!   │   └────┴─────┴────┴─────┴────┴─────┴──────────────────────────────┘  │
//!   │   ▲                              ▲ ▲                                 │
//!   │   │                              │ │                                 │
//!   │  head                         tail Program Break                     │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   allocate(n): walk head → tail, take the first free block with size >= n.
//!                Nothing fits? Move the break by n + header, append a block.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block header (internal)
//!   ├── config     - Release policy, BRKALLOC_RELEASE
//!   ├── error      - HeapError, errno access
//!   ├── grower     - HeapGrower trait, Sbrk and ArenaGrower
//!   ├── heap       - Heap: the chain, first-fit search, growth
//!   ├── locked     - LockedHeap, the process-wide GLOBAL heap, Global
//!   └── raw        - malloc / calloc / realloc / free
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! #[global_allocator]
//! static ALLOCATOR: brkalloc::Global = brkalloc::Global;
//!
//! fn main() {
//!     let v = vec![1u32, 2, 3];
//!     println!("{v:?} lives below the program break");
//! }
//! ```
//!
//! Or, without replacing the global allocator:
//!
//! ```rust
//! use brkalloc::{ArenaGrower, LockedHeap, ReleasePolicy};
//!
//! let heap = LockedHeap::with_policy(ArenaGrower::with_capacity(4096), ReleasePolicy::Reclaim);
//!
//! let first = heap.allocate(64).unwrap().unwrap();
//! unsafe { heap.release(Some(first)) };
//!
//! // First fit hands the same block out again.
//! assert_eq!(heap.allocate(32).unwrap(), Some(first));
//! ```
//!
//! ## Blocks
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         Payload                │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ used: true      │  │  │     N bytes usable       │  │
//!   │  │ next: None/ptr  │  │  └──────────────────────────┘  │
//!   │  └─────────────────┘  │                                │
//!   │      32 bytes         │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Address returned to the caller
//! ```
//!
//! A block is created only by growing the heap. It is never split, merged,
//! unlinked or given back to the OS; releasing it only clears `used`.
//!
//! ## Limitations
//!
//! - **One lock**: every call is serialized by a single spin lock
//! - **No splitting or coalescing**: a reused block is granted whole
//! - **16 byte alignment**: layouts aligned above 16 bytes are refused
//! - **Never shrinks**: the program break only moves up
//! - **Unix-only**: requires `libc` and `sbrk`
//!
//! ## Safety
//!
//! Raw memory management is inherently unsafe. Releasing or resizing an
//! address requires `unsafe` because the heap trusts it to be one of its own.
//! Nothing here is async-signal-safe.

pub mod align;
mod block;
pub mod config;
pub mod error;
pub mod grower;
pub mod heap;
pub mod locked;
pub mod raw;
mod trace;

pub use config::ReleasePolicy;
pub use error::{HeapError, HeapResult};
pub use grower::{ArenaGrower, HeapGrower, Sbrk};
pub use heap::{BlockInfo, Heap, HeapStats};
pub use locked::{GLOBAL, Global, LockedHeap};
