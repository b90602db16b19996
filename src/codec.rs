//! Little-endian byte codec for on-disk record fields.
//!
//! Every fixed-width integer that crosses the file boundary passes through
//! here. `to_le_bytes`/`from_le_bytes` already guarantee little-endian
//! encoding regardless of host byte order, so unlike the archive this format
//! was distilled from, there is no runtime endianness detection: the
//! guarantee is load-bearing in the type system instead.

/// Encodes a `u16` as 2 little-endian bytes.
pub(crate) fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Encodes a `u32` as 4 little-endian bytes.
pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Encodes a `u64` as 8 little-endian bytes.
pub(crate) fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Encodes an `i64` as 8 little-endian bytes.
pub(crate) fn put_i64(buf: &mut [u8], offset: usize, value: i64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Decodes a `u16` from 2 little-endian bytes.
pub(crate) fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap())
}

/// Decodes a `u32` from 4 little-endian bytes.
pub(crate) fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

/// Decodes a `u64` from 8 little-endian bytes.
pub(crate) fn get_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

/// Decodes an `i64` from 8 little-endian bytes.
pub(crate) fn get_i64(buf: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}
