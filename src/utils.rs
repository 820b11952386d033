//! This file contains the helper functions for the allocator.
//! These are functions that don't particularly belong to any concrete module of the program.

/// Every block size and every payload address handed out is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This method is used to align arena extensions to be a multiple of the growth unit
/// and header sizes to be a multiple of [`ALIGNMENT`]. The caller must make sure the
/// addition does not overflow, see [`checked_align`] otherwise.
pub const fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around.
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    to_be_aligned.checked_add(aligment - 1).map(|value| value & !(aligment - 1))
}

/// Rounds `size` up to the next multiple of 8. Already aligned values are
/// returned unchanged.
#[inline]
pub const fn align8(size: usize) -> usize {
    align(size, ALIGNMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align8_sizes() {
        let aligments = vec![(1..8, 8), (9..16, 16), (17..24, 24), (25..32, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align8(size));
            }
        }
    }

    #[test]
    fn align8_keeps_aligned_values() {
        for size in [0, 8, 16, 104, 4096] {
            assert_eq!(size, align8(size));
        }
    }

    #[test]
    fn align_growth_unit() {
        let aligments = vec![(1..65536, 65536), (65537..65600, 131072)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 65536))
            }
        }
    }

    #[test]
    fn checked_align_overflow() {
        assert_eq!(checked_align(usize::MAX, 8), None);
        assert_eq!(checked_align(usize::MAX - 7, 8), Some(usize::MAX - 7));
        assert_eq!(checked_align(13, 8), Some(16));
    }
}
