//! Defines the [`Offset`] newtype, the arena's only form of cross-process
//! reference.
//!
//! Every link stored inside the region (free-list chains, bucket chains,
//! key and value references) is a base-relative byte offset, never a native
//! address. Each attaching process rebinds offsets against its own mapping
//! base, so the structure stays valid when the region is mapped at a
//! different address in another process or after a restart.

use core::ptr::null_mut;

/// A signed byte distance from the arena's mapping base.
///
/// `-1` is the `NONE` sentinel. Offset `0` is where the arena header lives
/// and is therefore never a valid link target; [`to_ptr`](Offset::to_ptr)
/// treats every non-positive offset as "no reference".
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct Offset(i64);

impl Offset {
    /// The "no reference" sentinel.
    pub const NONE: Offset = Offset(-1);

    #[inline(always)]
    pub(crate) const fn new(raw: i64) -> Self {
        Offset(raw)
    }

    /// Raw offset value, `-1` for [`NONE`](Offset::NONE).
    #[inline(always)]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whether this offset refers to something inside the region.
    #[inline(always)]
    pub const fn is_some(self) -> bool {
        self.0 > 0
    }

    #[inline(always)]
    pub const fn is_none(self) -> bool {
        !self.is_some()
    }

    /// Translates an address in this process's mapping into an offset,
    /// mapping null to [`NONE`](Offset::NONE).
    ///
    /// Pure and total; the caller is responsible for only handing in
    /// addresses that lie within the region mapped at `base`.
    #[inline]
    pub fn from_ptr(base: *const u8, ptr: *const u8) -> Offset {
        if ptr.is_null() {
            Offset::NONE
        } else {
            Offset(ptr as i64 - base as i64)
        }
    }

    /// Translates this offset back into an address in the mapping rooted at
    /// `base`, yielding null for [`NONE`](Offset::NONE) (and any other
    /// non-positive value).
    #[inline]
    pub fn to_ptr(self, base: *const u8) -> *mut u8 {
        if self.is_some() {
            (base as *mut u8).wrapping_offset(self.0 as isize)
        } else {
            null_mut()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_maps_to_none() {
        let base = 0x1000 as *const u8;
        assert_eq!(Offset::from_ptr(base, core::ptr::null()), Offset::NONE);
        assert!(Offset::NONE.is_none());
        assert_eq!(Offset::NONE.raw(), -1);
    }

    #[test]
    fn none_and_zero_map_to_null() {
        let base = 0x1000 as *const u8;
        assert!(Offset::NONE.to_ptr(base).is_null());
        assert!(Offset::new(0).to_ptr(base).is_null());
        assert!(Offset::new(-42).to_ptr(base).is_null());
    }

    #[test]
    fn round_trip() {
        let base = 0x1000 as *const u8;
        let ptr = 0x1468 as *const u8;
        let offset = Offset::from_ptr(base, ptr);
        assert_eq!(offset.raw(), 0x468);
        assert!(offset.is_some());
        assert_eq!(offset.to_ptr(base), ptr as *mut u8);
    }

    #[test]
    fn rebinds_to_a_different_base() {
        let base_a = 0x1000 as *const u8;
        let base_b = 0x9_0000 as *const u8;
        let offset = Offset::from_ptr(base_a, 0x1020 as *const u8);
        assert_eq!(offset.to_ptr(base_b) as usize, 0x9_0020);
    }
}
