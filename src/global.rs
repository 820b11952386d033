use std::{
    alloc::{GlobalAlloc, Layout},
    mem,
    ptr::{self, NonNull},
};

use spin::{Mutex, MutexGuard};

use crate::{heap::Heap, kernel::ProgramBreak, utils::ALIGNMENT};

#[cfg(unix)]
use crate::kernel::Sbrk;

/// A [`Heap`] behind a single lock, usable from several threads and as the
/// global allocator:
///
/// ```rust,ignore
/// use brkalloc::BrkAlloc;
///
/// #[global_allocator]
/// static ALLOCATOR: BrkAlloc = BrkAlloc::new();
/// ```
///
/// The lock is held for the whole of every operation, arena growth included.
///
/// Layouts asking for more than 8 bytes of alignment are served from a larger
/// block: the returned address is the first suitably aligned one at least one
/// word into the payload, and that word remembers where the payload starts.
///
/// ```text
///  +--------+------------------+---------+----------------------+
///  | Header |     padding      | payload |  user data ...       |
///  +--------+------------------+---------+----------------------+
///           ^                            ^
///           payload                      aligned pointer (multiple of `align`)
/// ```
pub struct LockedHeap<B: ProgramBreak> {
    heap: Mutex<Heap<B>>,
}

/// The global allocator on top of the process break.
#[cfg(unix)]
pub type BrkAlloc = LockedHeap<Sbrk>;

#[cfg(unix)]
impl LockedHeap<Sbrk> {
    pub const fn new() -> Self {
        Self::with_heap(Heap::new())
    }
}

#[cfg(unix)]
impl Default for LockedHeap<Sbrk> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ProgramBreak> LockedHeap<B> {
    pub const fn with_heap(heap: Heap<B>) -> Self {
        Self { heap: Mutex::new(heap) }
    }

    /// Locks the heap, e.g. to look at its [`Heap::stats`].
    ///
    /// Anything that allocates through this same allocator while the guard
    /// is alive deadlocks.
    pub fn lock(&self) -> MutexGuard<'_, Heap<B>> {
        self.heap.lock()
    }
}

/// Whether `layout` is already satisfied by the heap's own alignment.
fn is_natural(layout: Layout) -> bool {
    layout.align() <= ALIGNMENT
}

impl<B: ProgramBreak + Send> LockedHeap<B> {
    /// Allocates for a layout with an alignment above 8, see the type docs.
    unsafe fn alloc_overaligned(&self, layout: Layout) -> *mut u8 {
        let Some(size) = layout.size().checked_add(layout.align()) else {
            return ptr::null_mut();
        };
        let Ok(payload) = self.heap.lock().allocate(size) else {
            return ptr::null_mut();
        };

        unsafe {
            let offset = (payload.as_ptr() as usize + mem::size_of::<usize>()).next_multiple_of(layout.align())
                - payload.as_ptr() as usize;
            let aligned = payload.as_ptr().add(offset);

            aligned.cast::<*mut u8>().sub(1).write(payload.as_ptr());
            aligned
        }
    }

    /// Recovers the payload of an over-aligned allocation.
    unsafe fn overaligned_payload(ptr: *mut u8) -> *mut u8 {
        unsafe { ptr.cast::<*mut u8>().sub(1).read() }
    }
}

unsafe impl<B: ProgramBreak + Send> GlobalAlloc for LockedHeap<B> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !is_natural(layout) {
            return unsafe { self.alloc_overaligned(layout) };
        }

        self.heap
            .lock()
            .allocate(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if !is_natural(layout) {
            unsafe {
                let ptr = self.alloc_overaligned(layout);
                if !ptr.is_null() {
                    ptr::write_bytes(ptr, 0, layout.size());
                }
                return ptr;
            }
        }

        self.heap
            .lock()
            .zero_allocate(1, layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe {
            let payload = if is_natural(layout) { ptr } else { Self::overaligned_payload(ptr) };

            self.heap.lock().release(payload);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if is_natural(layout) {
            return match unsafe { self.heap.lock().resize(ptr, new_size) } {
                Ok(Some(moved)) => moved.as_ptr(),
                _ => ptr::null_mut(),
            };
        }

        unsafe {
            let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
            let moved = self.alloc_overaligned(new_layout);

            if !moved.is_null() {
                ptr::copy_nonoverlapping(ptr, moved, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }

            moved
        }
    }
}
