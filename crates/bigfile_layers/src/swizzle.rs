//! Byte obfuscation used for the strings of layer records
//!
//! Every byte has its adjacent bit pairs exchanged (bit 0 with 1, 2 with 3, ...). Exchanging twice restores
//! the byte, so the same function both encodes and decodes.

/// Swizzle a single byte.
#[inline]
pub const fn swizzle(b: u8) -> u8 {
    let left = b << 1;
    let right = b >> 1;
    ((left ^ right) & 0x55) ^ left
}

/// Swizzle a buffer in place.
pub fn swizzle_in_place(data: &mut [u8]) {
    for b in data {
        *b = swizzle(*b);
    }
}
