/// A generic trait for converting a number to a value.
///
/// Only the conversions the `enum_from_primitive!` macro generates and the
/// integer widths that appear on the wire are provided.
pub trait FromPrimitive: Sized {
    /// Convert an `i64` to return an optional value of this type. If the
    /// value cannot be represented by this type, `None` is returned.
    fn from_i64(n: i64) -> Option<Self>;

    /// Convert an `u64` to return an optional value of this type. If the
    /// value cannot be represented by this type, `None` is returned.
    fn from_u64(n: u64) -> Option<Self>;

    /// Convert an `i8` to return an optional value of this type.
    #[inline]
    fn from_i8(n: i8) -> Option<Self> {
        Self::from_i64(i64::from(n))
    }

    /// Convert an `u8` to return an optional value of this type.
    #[inline]
    fn from_u8(n: u8) -> Option<Self> {
        Self::from_u64(u64::from(n))
    }

    /// Convert an `u16` to return an optional value of this type.
    #[inline]
    fn from_u16(n: u16) -> Option<Self> {
        Self::from_u64(u64::from(n))
    }

    /// Convert an `u32` to return an optional value of this type.
    #[inline]
    fn from_u32(n: u32) -> Option<Self> {
        Self::from_u64(u64::from(n))
    }

    /// Convert a `usize` to return an optional value of this type.
    #[inline]
    fn from_usize(n: usize) -> Option<Self> {
        Self::from_u64(n as u64)
    }
}
