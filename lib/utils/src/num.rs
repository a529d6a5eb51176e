//! Alignment helpers for addresses and sizes.

/// Numbers that can be aligned to a power-of-two boundary.
///
/// `align` must be a power of two; an alignment of 0 is treated as 1.
pub trait AlignableTo: Sized + Copy {
    /// Round up to the next multiple of `align`. Returns [None] on overflow.
    fn checked_align_up(self, align: Self) -> Option<Self>;
    /// Round down to the previous multiple of `align`.
    fn align_down(self, align: Self) -> Self;
    /// Whether the value is already a multiple of `align`.
    fn is_aligned_to(self, align: Self) -> bool;

    /// Round up to the next multiple of `align`.
    ///
    /// Panics on overflow; use [AlignableTo::checked_align_up] for untrusted input.
    #[inline(always)]
    fn align_up(self, align: Self) -> Self {
        match self.checked_align_up(align) {
            Some(value) => value,
            None => panic!("alignment overflow"),
        }
    }
}

macro_rules! impl_alignable {
    ($type: ty) => {
        impl AlignableTo for $type {
            #[inline(always)]
            fn checked_align_up(self, align: Self) -> Option<Self> {
                let mask = align.max(1) - 1;
                Some(self.checked_add(mask)? & !mask)
            }
            #[inline(always)]
            fn align_down(self, align: Self) -> Self {
                self & !(align.max(1) - 1)
            }
            #[inline(always)]
            fn is_aligned_to(self, align: Self) -> bool {
                self & (align.max(1) - 1) == 0
            }
        }
    };
}

impl_alignable!(usize);
impl_alignable!(u64);

#[cfg(test)]
mod tests {
    use super::AlignableTo;

    #[test]
    fn aligns_addresses() {
        assert_eq!(0usize.align_up(4096), 0);
        assert_eq!(1usize.align_up(4096), 4096);
        assert_eq!(4096usize.align_up(4096), 4096);
        assert_eq!(4097usize.align_down(4096), 4096);
        assert_eq!(13usize.align_up(0), 13);
        assert!(0x2_0000u64.is_aligned_to(0x1_0000));
        assert!(!0x2_0004u64.is_aligned_to(8));
        assert_eq!(u64::MAX.checked_align_up(16), None);
    }
}
