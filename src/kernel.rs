//! Platform layer. The allocator only ever needs one thing from the
//! operating system: to extend a contiguous data region at its end.
//!
//! ```text
//! +-------------------------+
//! |          Stack          |
//! +-------------------------+
//! |                         |
//! |            ^            |
//! |            |            |
//! +-------------------------+ <- program break (moves up on `extend`)
//! |          Arena          |
//! +-------------------------+
//! |  Data / BSS / Text ...  |
//! +-------------------------+
//! ```
//!
//! [`Sbrk`] extends the real process break. [`Reservation`] keeps a private
//! break inside a reserved range of address space, which lets several
//! independent arenas live in the same process.

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::debug;
use snafu::OptionExt as _;

use crate::{
    error::{AllocError, ReserveSnafu},
    utils::{align, checked_align},
};

/// Virtual memory page size of the computer, cached after the first query.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// A contiguous data region that can only grow at its end.
///
/// # Safety
///
/// Implementors must guarantee that the range returned by a successful
/// [`extend`](ProgramBreak::extend), `previous..previous + delta`, is readable,
/// writable and not used by anything else, and that it stays so for as long as
/// the implementor lives. Boundaries must be reported honestly: the arena
/// relies on them to detect discontiguous growth.
pub unsafe trait ProgramBreak {
    /// Returns the current end of the data region, or `None` if it cannot be
    /// queried.
    fn current(&mut self) -> Option<NonNull<u8>>;

    /// Grows the data region by `delta` bytes and returns the previous end,
    /// or `None` if the operating system refused.
    ///
    /// # Safety
    ///
    /// The caller becomes the owner of the returned range.
    unsafe fn extend(&mut self, delta: usize) -> Option<NonNull<u8>>;

    /// Undoes an extension that returned `previous` and that the caller could
    /// not use. Implementations may ignore the request.
    ///
    /// # Safety
    ///
    /// The range `previous..previous + delta` must not be used afterwards.
    unsafe fn retract(&mut self, previous: NonNull<u8>, delta: usize) {
        let _ = (previous, delta);
    }
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The allocator's top level view of this has nothing to do with
/// the concrete APIs offered by each kernel.
trait PlatformMemory {
    /// Reserves `len` bytes of address space without backing them. It returns
    /// a pointer to the given location or None if the underlying syscall fails.
    unsafe fn reserve(len: usize) -> Option<NonNull<u8>>;

    /// Makes `len` bytes starting at the page-aligned `addr` readable and
    /// writable.
    unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool;

    /// Returns the reservation of size `len` starting from `addr` back to the kernel.
    unsafe fn release(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Marker the platform modules implement [`PlatformMemory`] for.
struct Kernel;

/// Returns the virtual memory page size, asking the kernel only once.
#[inline]
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let size = unsafe { Kernel::page_size() };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

#[cfg(unix)]
mod unix {
    use std::{
        os::raw::{c_int, c_void},
        ptr::{self, NonNull},
    };

    use libc::{mmap, mprotect, munmap, off_t, size_t};

    use super::{Kernel, PlatformMemory};

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters. Nothing is accessible until committed.
            const ADDR: *mut c_void = ptr::null_mut::<c_void>();
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;

            unsafe { mprotect(addr.as_ptr().cast::<c_void>(), len as size_t, PROT) == 0 }
        }

        unsafe fn release(addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Kernel, PlatformMemory};

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let addr = Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            unsafe {
                let addr = Memory::VirtualAlloc(
                    Some(addr.as_ptr().cast_const().cast::<c_void>()),
                    len,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                );

                !addr.is_null()
            }
        }

        unsafe fn release(addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

/// The process break, moved with `sbrk(2)`.
///
/// The break is shared with everything else in the process that calls
/// `brk`/`sbrk`, the platform `malloc` included. The arena notices when it
/// has been moved behind its back and refuses to grow across the gap, see
/// [`AllocError::ForeignBreak`].
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

#[cfg(unix)]
mod process_break {
    use std::{os::raw::c_void, ptr::NonNull};

    use libc::{intptr_t, sbrk};

    use super::{ProgramBreak, Sbrk};

    /// `sbrk` reports failure with `(void *) -1`.
    fn check(addr: *mut c_void) -> Option<NonNull<u8>> {
        if addr == usize::MAX as *mut c_void {
            return None;
        }
        NonNull::new(addr.cast::<u8>())
    }

    unsafe impl ProgramBreak for Sbrk {
        fn current(&mut self) -> Option<NonNull<u8>> {
            check(unsafe { sbrk(0) })
        }

        unsafe fn extend(&mut self, delta: usize) -> Option<NonNull<u8>> {
            let increment = intptr_t::try_from(delta).ok()?;

            check(unsafe { sbrk(increment) })
        }

        unsafe fn retract(&mut self, previous: NonNull<u8>, delta: usize) {
            let Ok(increment) = intptr_t::try_from(delta) else {
                return;
            };

            // Only give the range back if nobody extended the break after us.
            if self.current().map(|top| top.addr().get()) == Some(previous.addr().get() + delta) {
                unsafe {
                    sbrk(-increment);
                }
            }
        }
    }
}

/// A private program break living inside a reserved range of address space.
///
/// The whole `capacity` is reserved up front, but pages only become usable
/// when the break moves over them. Extending past the capacity fails, which
/// is how an arena backed by a reservation runs out of memory. The range is
/// given back to the kernel when the reservation is dropped.
///
/// ```text
/// base                  brk          committed                 capacity
///  +---------------------+---------------+-------------------------+
///  |    handed out       |  committed    |    reserved (no access) |
///  +---------------------+---------------+-------------------------+
/// ```
#[derive(Debug)]
pub struct Reservation {
    base: NonNull<u8>,
    capacity: usize,
    /// Offset of the break from `base`.
    brk: usize,
    /// Offset up to which pages are readable and writable, a page multiple.
    committed: usize,
}

// The reservation exclusively owns its address range.
unsafe impl Send for Reservation {}

impl Reservation {
    /// Reserves `capacity` bytes of address space, rounded up to the page
    /// size.
    pub fn new(capacity: usize) -> Result<Self, AllocError> {
        let capacity = checked_align(capacity.max(1), page_size()).context(ReserveSnafu { capacity })?;
        let base = unsafe { Kernel::reserve(capacity) }.context(ReserveSnafu { capacity })?;

        debug!("reserved {capacity} bytes of address space at {base:p}");

        Ok(Self {
            base,
            capacity,
            brk: 0,
            committed: 0,
        })
    }

    /// Size of the reserved range in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start of the reserved range.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }
}

unsafe impl ProgramBreak for Reservation {
    fn current(&mut self) -> Option<NonNull<u8>> {
        Some(unsafe { self.base.add(self.brk) })
    }

    unsafe fn extend(&mut self, delta: usize) -> Option<NonNull<u8>> {
        if delta > self.capacity - self.brk {
            return None;
        }

        let brk = self.brk + delta;

        if brk > self.committed {
            // `capacity` is a page multiple, so this never passes it.
            let committed = align(brk, page_size());

            unsafe {
                let start = self.base.add(self.committed);
                if !Kernel::commit(start, committed - self.committed) {
                    return None;
                }
            }

            self.committed = committed;
        }

        let previous = unsafe { self.base.add(self.brk) };
        self.brk = brk;

        Some(previous)
    }

    unsafe fn retract(&mut self, previous: NonNull<u8>, delta: usize) {
        if previous.addr().get() + delta == self.base.addr().get() + self.brk {
            self.brk -= delta;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        unsafe { Kernel::release(self.base, self.capacity) };
    }
}
