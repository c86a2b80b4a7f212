//! Bit-range accessors over packed 64-bit fields
//!
//! [`bitmask!`](crate::bitmask) generates a getter/setter pair for a fixed
//! `(offset, width)` range of a `u64` field. The range is checked at
//! compile time: a width of zero or a range running past bit 63 fails to
//! build. Values are checked at run time: the setter refuses anything that
//! does not fit in the range instead of truncating it.

pub use bcache_common::{Error, Result};

/// Mask with the low `width` bits set
#[inline]
#[must_use]
pub const fn mask(width: u32) -> u64 {
    if width >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Read `width` bits of `field` starting at `offset`
#[inline]
#[must_use]
pub const fn get_bits(field: u64, offset: u32, width: u32) -> u64 {
    (field >> offset) & mask(width)
}

/// Replace `width` bits of `field` starting at `offset` with `value`;
/// every other bit is preserved. `value` must fit in `width` bits.
#[inline]
#[must_use]
pub const fn set_bits(field: u64, offset: u32, width: u32, value: u64) -> u64 {
    debug_assert!(value <= mask(width), "value does not fit in bit range");
    let m = mask(width) << offset;
    (field & !m) | ((value << offset) & m)
}

/// [`set_bits`], or `None` if `value` does not fit in `width` bits
#[inline]
#[must_use]
pub const fn checked_set_bits(field: u64, offset: u32, width: u32, value: u64) -> Option<u64> {
    if value > mask(width) {
        None
    } else {
        Some(set_bits(field, offset, width, value))
    }
}

/// Generate a getter/setter pair for a bit range of a `u64` field.
///
/// The setter returns [`Error::InvalidFlag`] for a value wider than the
/// range and leaves the field untouched.
///
/// ```
/// struct Flags(u64);
///
/// bcache_storage::bitmask!(Flags, 0, mode, set_mode, 2, 3);
///
/// let mut f = Flags(0);
/// f.set_mode(5).unwrap();
/// assert_eq!(f.mode(), 5);
/// assert_eq!(f.0, 5 << 2);
///
/// assert!(f.set_mode(8).is_err());
/// assert_eq!(f.mode(), 5);
/// ```
#[macro_export]
macro_rules! bitmask {
    ($ty:ty, $field:tt, $get:ident, $set:ident, $offset:expr, $width:expr) => {
        impl $ty {
            #[inline]
            #[must_use]
            #[allow(dead_code)]
            pub const fn $get(&self) -> u64 {
                const {
                    assert!($width >= 1, "bit range width must be at least 1");
                    assert!($offset + $width <= 64, "bit range exceeds 64-bit field");
                }
                $crate::bitfield::get_bits(self.$field, $offset, $width)
            }

            #[inline]
            #[allow(dead_code)]
            pub fn $set(&mut self, value: u64) -> $crate::bitfield::Result<()> {
                const {
                    assert!($width >= 1, "bit range width must be at least 1");
                    assert!($offset + $width <= 64, "bit range exceeds 64-bit field");
                }
                self.$field =
                    $crate::bitfield::checked_set_bits(self.$field, $offset, $width, value)
                        .ok_or($crate::bitfield::Error::InvalidFlag {
                            field: stringify!($get),
                            value,
                        })?;
                Ok(())
            }
        }
    };
}
