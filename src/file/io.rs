//! Little-endian, bounds-checked reading and writing of primitive values.
//!
//! PE headers, CLI metadata and CIL method bodies are little-endian throughout, so only the
//! little-endian direction is provided. Reads come in two flavors:
//!
//! - [`read_le`] reads from the start of a buffer
//! - [`read_le_at`] reads at an offset and advances it
//!
//! Writes come in two flavors as well:
//!
//! - [`write_le_at`] patches a value into an existing buffer in place
//! - [`push_le`] appends a value to a growing buffer
//!
//! # Examples
//!
//! ```rust,ignore
//! use cilhook::file::io::{read_le_at, push_le};
//!
//! let mut out = Vec::new();
//! push_le(&mut out, 0x1234_u16);
//! push_le(&mut out, 7_u32);
//!
//! let mut offset = 0;
//! assert_eq!(read_le_at::<u16>(&out, &mut offset)?, 0x1234);
//! assert_eq!(read_le_at::<u32>(&out, &mut offset)?, 7);
//! # Ok::<(), cilhook::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Trait for primitive types that can be converted from and to little-endian bytes.
pub trait CilIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f32 => 4, f64 => 8,
}

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing it by the
/// number of bytes read.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Safely writes a value of type `T` in little-endian byte order at `offset`, advancing it by the
/// number of bytes written.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;

    Ok(())
}

/// Appends a value of type `T` in little-endian byte order.
pub fn push_le<T: CilIO>(data: &mut Vec<u8>, value: T) {
    data.extend_from_slice(value.to_le_bytes().as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_u8() {
        let result = read_le::<u8>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x01);
    }

    #[test]
    fn read_le_u16() {
        let result = read_le::<u16>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0201);
    }

    #[test]
    fn read_le_u32() {
        let result = read_le::<u32>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0403_0201);
    }

    #[test]
    fn read_le_i64() {
        let result = read_le::<i64>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0807_0605_0403_0201);
    }

    #[test]
    fn read_le_at_advances() {
        let mut offset = 2;
        let result = read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(result, 0x0403);
        assert_eq!(offset, 4);
    }

    #[test]
    fn read_le_errors() {
        let buffer = [0xFF, 0xFF, 0xFF];
        let result = read_le::<u32>(&buffer);
        assert!(matches!(result, Err(OutOfBounds)));

        let mut offset = usize::MAX;
        let result = read_le_at::<u8>(&buffer, &mut offset);
        assert!(matches!(result, Err(OutOfBounds)));
    }

    #[test]
    fn write_le_at_in_place() {
        let mut buffer = [0u8; 6];
        let mut offset = 1;
        write_le_at(&mut buffer, &mut offset, 0xAABB_u16).unwrap();
        assert_eq!(offset, 3);
        assert_eq!(buffer, [0x00, 0xBB, 0xAA, 0x00, 0x00, 0x00]);

        let mut offset = 4;
        assert!(write_le_at(&mut buffer, &mut offset, 1_u32).is_err());
        assert_eq!(offset, 4);
    }

    #[test]
    fn push_le_appends() {
        let mut out = vec![0xFF];
        push_le(&mut out, -2_i16);
        push_le(&mut out, 1.5_f32);
        assert_eq!(&out[..3], &[0xFF, 0xFE, 0xFF]);
        assert_eq!(read_le::<f32>(&out[3..]).unwrap(), 1.5);
    }
}
