//! Fixed byte order wrappers for values read straight out of memory, such as device tree
//! cells. [EndianData::value] converts to the host order.

/// Big endian [u32].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BigEndian32(u32);

/// Big endian [u64].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BigEndian64(u64);

/// A value stored in a fixed byte order.
pub trait EndianData<T>: Copy + Clone {
    /// The value in host byte order.
    fn value(&self) -> T;
}

/// `from_be` is a no-op on big endian targets, so no per-architecture switch is needed.
macro_rules! impl_converter_big {
    ($type: tt, $tval: tt) => {
        impl EndianData<$tval> for $type {
            #[inline(always)]
            fn value(&self) -> $tval {
                $tval::from_be(self.0)
            }
        }

        impl $type {
            /// Wrap raw bytes exactly as they are laid out in memory.
            #[inline(always)]
            pub const fn from_bytes(bytes: [u8; size_of::<$tval>()]) -> Self {
                $type($tval::from_ne_bytes(bytes))
            }

            /// Store a native value in big endian layout.
            #[inline(always)]
            pub const fn from_native(value: $tval) -> Self {
                $type(value.to_be())
            }
        }
    };
}

impl_converter_big!(BigEndian32, u32);
impl_converter_big!(BigEndian64, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_bytes_decode_independently_of_host() {
        let cell = BigEndian32::from_bytes([0xd0, 0x0d, 0xfe, 0xed]);
        assert_eq!(cell.value(), 0xd00dfeed);
        let wide = BigEndian64::from_bytes([0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(wide.value(), 0x1_0000_0002);
        assert_eq!(BigEndian32::from_native(17).value(), 17);
    }
}
