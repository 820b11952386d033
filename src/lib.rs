//! # brkalloc
//!
//! A first-fit memory allocator built on a single primitive: extending a
//! contiguous data region, the program break, in page-sized steps.
//!
//! Every block carries an in-band header holding its usable size and the
//! links of an intrusive free list. The free list holds exactly the free
//! blocks, sorted by address, and released blocks are merged with every free
//! block they touch. Nothing else is needed to keep track of memory.
//!
//! ```text
//!                         Free List
//!            +-----------------------------------+
//!            |                                   |
//! +--------+-|------+--------+---------+--------+-|------+------------------+
//! | Header | Free   | Header | Payload | Header | Free   |   committed,     |
//! |        |        |        | (used)  |        |        |   not handed out |
//! +--------+--------+--------+---------+--------+--------+------------------+
//! low                                                 allocated_top   committed_top
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brkalloc::Heap;
//!
//! let mut heap = Heap::new();
//!
//! let ptr = heap.allocate(100).expect("out of memory");
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 100);
//!
//!     let ptr = heap.resize(ptr.as_ptr(), 400).expect("out of memory");
//!     heap.release(ptr.map_or(std::ptr::null_mut(), |ptr| ptr.as_ptr()));
//! }
//! ```
//!
//! [`Heap::new`] grows the real process break, which the platform `malloc`
//! may be using too. [`Heap::with_break`] together with a [`Reservation`]
//! gives a heap its own private break instead.
//!
//! ## Limitations
//!
//! - A [`Heap`] is single-threaded. [`LockedHeap`] puts one behind a lock.
//! - Memory is recycled but never returned to the operating system.
//! - Pointers handed to [`Heap::release`] and [`Heap::resize`] are trusted:
//!   foreign pointers and double releases are undefined behaviour.

mod arena;
mod block;
mod check;
mod coalesce;
mod config;
mod error;
mod freelist;
mod global;
mod heap;
mod kernel;
mod list;
mod resize;
pub mod utils;

pub use block::BLOCK_HEADER_SIZE;
pub use check::{BlockInfo, Blocks, HeapStats};
pub use config::{DEFAULT_GROWTH_UNIT, HeapConfig};
pub use error::{AllocError, ConfigError, HeapCheckError};
#[cfg(unix)]
pub use global::BrkAlloc;
pub use global::LockedHeap;
pub use heap::{Heap, MAX_REQUEST};
#[cfg(unix)]
pub use kernel::Sbrk;
pub use kernel::{ProgramBreak, Reservation, page_size};
