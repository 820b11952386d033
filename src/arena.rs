use std::ptr::NonNull;

use log::{debug, warn};
use snafu::OptionExt as _;

use crate::{
    error::{AllocError, ForeignBreakSnafu, OutOfMemorySnafu, RequestTooLargeSnafu},
    kernel::ProgramBreak,
    utils::{align8, checked_align},
};

/// Boundaries of the arena.
///
/// ```text
/// low                      allocated_top          committed_top
///  +-------+-------+-----------+----------------------+
///  | Block | Block |   Block   |  committed, unused   |
///  +-------+-------+-----------+----------------------+
/// ```
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bounds {
    /// First byte of the arena, the header of the lowest block.
    pub low: NonNull<u8>,
    /// Everything below this has been requested from the program break.
    pub committed_top: NonNull<u8>,
    /// Everything below this belongs to some block.
    pub allocated_top: NonNull<u8>,
}

/// Arena growth manager. Hands out fresh space at the top of the arena and
/// grows the underlying [`ProgramBreak`] in whole growth units when the
/// committed space runs out.
pub(crate) struct Arena<B> {
    brk: B,
    growth_unit: usize,
    /// `None` until the first extension.
    bounds: Option<Bounds>,
    /// Number of successful requests made to the program break.
    extensions: usize,
}

impl<B> Arena<B> {
    pub const fn new(brk: B, growth_unit: usize) -> Self {
        Self {
            brk,
            growth_unit,
            bounds: None,
            extensions: 0,
        }
    }

    #[inline]
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    #[inline]
    pub fn extensions(&self) -> usize {
        self.extensions
    }

    #[inline]
    pub fn growth_unit(&self) -> usize {
        self.growth_unit
    }

    pub fn program_break(&self) -> &B {
        &self.brk
    }
}

impl<B: ProgramBreak> Arena<B> {
    /// Takes the current program break as the start of the arena. The start
    /// is rounded up to 8 so that every header and payload is aligned.
    fn init(&mut self) -> Result<Bounds, AllocError> {
        let current = self.brk.current().context(OutOfMemorySnafu { delta: 0usize })?;
        let padding = align8(current.addr().get()) - current.addr().get();

        let bounds = Bounds {
            low: unsafe { current.add(padding) },
            committed_top: current,
            allocated_top: unsafe { current.add(padding) },
        };

        debug!("arena starts at {:p}", bounds.low);

        self.bounds = Some(bounds);
        Ok(bounds)
    }

    /// Hands out the `n` bytes right above the allocated top and returns
    /// their start. Grows the program break first if those bytes are not
    /// committed yet.
    ///
    /// On failure nothing changes: the bytes are neither handed out nor
    /// committed.
    pub fn extend(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        let mut bounds = match self.bounds {
            Some(bounds) => bounds,
            None => self.init()?,
        };

        let top = bounds.allocated_top.addr().get();
        let committed = bounds.committed_top.addr().get();
        let new_top = top.checked_add(n).context(RequestTooLargeSnafu { size: n })?;

        if new_top > committed {
            let delta =
                checked_align(new_top - committed, self.growth_unit).context(RequestTooLargeSnafu { size: n })?;

            let Some(previous) = (unsafe { self.brk.extend(delta) }) else {
                warn!("program break refused to grow by {delta} bytes");
                return OutOfMemorySnafu { delta }.fail();
            };

            if previous != bounds.committed_top {
                unsafe { self.brk.retract(previous, delta) };
                warn!("program break moved from {committed:#x} to {previous:p} behind the arena's back");

                return ForeignBreakSnafu {
                    expected: committed,
                    actual: previous.addr().get(),
                }
                .fail();
            }

            bounds.committed_top = unsafe { previous.add(delta) };
            self.extensions += 1;

            debug!("arena grew by {delta} bytes, committed top is now {:p}", bounds.committed_top);
        }

        let start = bounds.allocated_top;
        bounds.allocated_top = unsafe { start.add(n) };
        self.bounds = Some(bounds);

        Ok(start)
    }
}
