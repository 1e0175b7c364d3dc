#![doc(hidden)]
//! Packing element values from / to bytes
//!
//! All array payloads are stored as packed little-endian element bytes,
//! so every element type knows how to move itself in and out of a byte
//! slice.

use std::mem::size_of;

/// Definition of the packing & unpacking trait
///
/// Types that can be packed and unpacked from byte slices.
///
/// # Important
///
/// The byteorder is LittleEndian as this is the byte-order
/// used throughout the storage format.
pub trait Packable {
    fn unpack_from(input: &[u8]) -> Self;
    fn pack_into(&self, output: &mut [u8]);
}

impl Packable for u64 {
    #[inline]
    fn unpack_from(input: &[u8]) -> Self {
        assert!(
            input.len() >= size_of::<Self>(),
            "u64::unpack_from expected a slice of {} bytes",
            size_of::<Self>()
        );
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&input[..8]);
        u64::from_le_bytes(bytes)
    }

    #[inline]
    fn pack_into(&self, output: &mut [u8]) {
        assert!(
            output.len() >= size_of::<Self>(),
            "u64::pack_into expected a slice of {} bytes",
            size_of::<Self>()
        );
        output[..8].copy_from_slice(&self.to_le_bytes());
    }
}

impl Packable for u32 {
    #[inline]
    fn unpack_from(input: &[u8]) -> Self {
        assert!(
            input.len() >= 4,
            "u32::unpack_from expected a slice of 4 bytes"
        );
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&input[..4]);
        u32::from_le_bytes(bytes)
    }

    #[inline]
    fn pack_into(&self, output: &mut [u8]) {
        assert!(
            output.len() >= 4,
            "u32::pack_into expected a slice of 4 bytes"
        );
        output[..4].copy_from_slice(&self.to_le_bytes());
    }
}

impl Packable for u16 {
    #[inline]
    fn unpack_from(input: &[u8]) -> Self {
        assert!(
            input.len() >= 2,
            "u16::unpack_from expected a slice of 2 bytes"
        );
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(&input[..2]);
        u16::from_le_bytes(bytes)
    }

    #[inline]
    fn pack_into(&self, output: &mut [u8]) {
        assert!(
            output.len() >= 2,
            "u16::pack_into expected a slice of 2 bytes"
        );
        output[..2].copy_from_slice(&self.to_le_bytes());
    }
}

impl Packable for u8 {
    #[inline]
    fn unpack_from(input: &[u8]) -> Self {
        input[0]
    }

    #[inline]
    fn pack_into(&self, output: &mut [u8]) {
        output[0] = *self;
    }
}

impl Packable for i64 {
    #[inline]
    fn unpack_from(input: &[u8]) -> Self {
        u64::unpack_from(input) as i64
    }

    #[inline]
    fn pack_into(&self, output: &mut [u8]) {
        (*self as u64).pack_into(output)
    }
}

impl Packable for i32 {
    #[inline]
    fn unpack_from(input: &[u8]) -> Self {
        u32::unpack_from(input) as i32
    }

    #[inline]
    fn pack_into(&self, output: &mut [u8]) {
        (*self as u32).pack_into(output)
    }
}

impl Packable for i16 {
    #[inline]
    fn unpack_from(input: &[u8]) -> Self {
        u16::unpack_from(input) as i16
    }

    #[inline]
    fn pack_into(&self, output: &mut [u8]) {
        (*self as u16).pack_into(output)
    }
}

impl Packable for i8 {
    #[inline]
    fn unpack_from(input: &[u8]) -> Self {
        input[0] as i8
    }

    #[inline]
    fn pack_into(&self, output: &mut [u8]) {
        output[0] = *self as u8;
    }
}

impl Packable for f32 {
    #[inline]
    fn unpack_from(input: &[u8]) -> Self {
        f32::from_bits(u32::unpack_from(input))
    }

    #[inline]
    fn pack_into(&self, output: &mut [u8]) {
        self.to_bits().pack_into(output)
    }
}

impl Packable for f64 {
    #[inline]
    fn unpack_from(input: &[u8]) -> Self {
        f64::from_bits(u64::unpack_from(input))
    }

    #[inline]
    fn pack_into(&self, output: &mut [u8]) {
        self.to_bits().pack_into(output)
    }
}
