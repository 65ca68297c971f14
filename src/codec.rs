//! Fixed-width unsigned integer codec
//!
//! Byte order is a call-site decision. MP4 boxes are big-endian throughout,
//! but the helpers stay generic so the same code serves little-endian layouts.

/// Byte order of an encoded integer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// 1/2/4/8-byte unsigned integer
pub trait UInt: sealed::Sealed + Copy + Into<u64> {
    /// Encoded width in bytes
    const WIDTH: usize;

    /// Decode from the first `WIDTH` bytes, `None` if there are fewer
    fn decode(bytes: &[u8], order: ByteOrder) -> Option<Self>;

    /// Encode into the first `WIDTH` bytes, `false` if there are fewer
    fn encode(self, out: &mut [u8], order: ByteOrder) -> bool;
}

macro_rules! impl_uint {
    ($t:ty) => {
        impl UInt for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn decode(bytes: &[u8], order: ByteOrder) -> Option<Self> {
                let raw = bytes.get(..Self::WIDTH)?.try_into().ok()?;
                Some(match order {
                    ByteOrder::Big => <$t>::from_be_bytes(raw),
                    ByteOrder::Little => <$t>::from_le_bytes(raw),
                })
            }

            fn encode(self, out: &mut [u8], order: ByteOrder) -> bool {
                let Some(dest) = out.get_mut(..Self::WIDTH) else {
                    return false;
                };
                let raw = match order {
                    ByteOrder::Big => self.to_be_bytes(),
                    ByteOrder::Little => self.to_le_bytes(),
                };
                dest.copy_from_slice(&raw);
                true
            }
        }
    };
}

impl_uint!(u8);
impl_uint!(u16);
impl_uint!(u32);
impl_uint!(u64);

/// Read a `T` from the front of `bytes`, `None` if too short
pub fn get<T: UInt>(bytes: &[u8], order: ByteOrder) -> Option<T> {
    T::decode(bytes, order)
}

/// Write `value` to the front of `bytes`, `false` if too short
pub fn put<T: UInt>(bytes: &mut [u8], value: T, order: ByteOrder) -> bool {
    value.encode(bytes, order)
}

/// Big-endian u16 at `pos`, `None` past the end
pub fn be_u16_at(bytes: &[u8], pos: usize) -> Option<u16> {
    bytes.get(pos..).and_then(|b| get(b, ByteOrder::Big))
}

/// Big-endian u32 at `pos`, `None` past the end
pub fn be_u32_at(bytes: &[u8], pos: usize) -> Option<u32> {
    bytes.get(pos..).and_then(|b| get(b, ByteOrder::Big))
}
