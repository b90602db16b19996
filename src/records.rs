//! Fixed-layout on-disk records.
//!
//! Every struct here is a value aggregate with an explicit little-endian
//! `encode`/`decode` pair (via [`crate::codec`]) rather than a reinterpret-cast
//! over raw bytes. Sizes are `pub(crate) const` so the engine never hardcodes
//! a byte count inline.

use crate::codec::{get_i64, get_u16, get_u32, get_u64, put_i64, put_u16, put_u32, put_u64};
use crate::error::{ErrorKind, Result, ZPackError};

/// `N S 02 01` little-endian — marks a local file header.
pub(crate) const SIG_LOCAL_HEADER: u32 = 0x0201_534E;
/// `N S 06 05` little-endian — marks a central directory entry.
pub(crate) const SIG_DIRECTORY_ENTRY: u32 = 0x0605_534E;
/// `N S 08 07` little-endian — marks the end-of-directory trailer.
pub(crate) const SIG_END_OF_DIRECTORY: u32 = 0x0807_534E;

pub(crate) const FORMAT_VERSION: u16 = 1;

/// General-purpose flag bit: payload was written via streaming compression
/// and the local header's size/CRC fields were back-patched after write.
pub(crate) const GENERAL_STREAMED: u16 = 1;

/// Extra-field id carrying POSIX-style permission bits.
pub(crate) const EXTRA_PERMISSIONS: u16 = 1;

/// Compression method stored in local/directory headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CompressionMethod {
    None = 0,
    Zstd = 1,
    ZstdStream = 2,
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Zstd),
            2 => Ok(CompressionMethod::ZstdStream),
            _ => Err(ZPackError::Kind(ErrorKind::Unknown)),
        }
    }
}

/// Per-item fixed prefix immediately preceding the payload (50 bytes).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LocalFileHeader {
    pub signature: u32,
    pub version: u16,
    pub general: u16,
    pub compression: u16,
    pub filename_len: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub mtime: i64,
    pub offset_gap: u64,
    pub extra_len: u16,
}

impl LocalFileHeader {
    // Field widths sum to 50 bytes: signature 4 + version 2 + general 2 +
    // compression 2 + filenameLen 2 + crc32 4 + compressedSize 8 +
    // uncompressedSize 8 + mtime 8 + offsetGap 8 + extraLen 2.
    pub(crate) const SIZE: usize = 50;

    pub(crate) fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        put_u32(&mut buf, 0, self.signature);
        put_u16(&mut buf, 4, self.version);
        put_u16(&mut buf, 6, self.general);
        put_u16(&mut buf, 8, self.compression);
        put_u16(&mut buf, 10, self.filename_len);
        put_u32(&mut buf, 12, self.crc32);
        put_u64(&mut buf, 16, self.compressed_size);
        put_u64(&mut buf, 24, self.uncompressed_size);
        put_i64(&mut buf, 32, self.mtime);
        put_u64(&mut buf, 40, self.offset_gap);
        put_u16(&mut buf, 48, self.extra_len);
        buf
    }

    pub(crate) fn decode(buf: &[u8; Self::SIZE]) -> Self {
        LocalFileHeader {
            signature: get_u32(buf, 0),
            version: get_u16(buf, 4),
            general: get_u16(buf, 6),
            compression: get_u16(buf, 8),
            filename_len: get_u16(buf, 10),
            crc32: get_u32(buf, 12),
            compressed_size: get_u64(buf, 16),
            uncompressed_size: get_u64(buf, 24),
            mtime: get_i64(buf, 32),
            offset_gap: get_u64(buf, 40),
            extra_len: get_u16(buf, 40 + 8),
        }
    }
}

/// A single 16-bit-id/16-bit-value extra field (4 bytes).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LocalFileExtraField {
    pub id: u16,
    pub value: u16,
}

impl LocalFileExtraField {
    pub(crate) const SIZE: usize = 4;

    pub(crate) fn permissions(perms: u16) -> Self {
        LocalFileExtraField {
            id: EXTRA_PERMISSIONS,
            value: perms,
        }
    }

    pub(crate) fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        put_u16(&mut buf, 0, self.id);
        put_u16(&mut buf, 2, self.value);
        buf
    }

    pub(crate) fn decode(buf: &[u8; Self::SIZE]) -> Self {
        LocalFileExtraField {
            id: get_u16(buf, 0),
            value: get_u16(buf, 2),
        }
    }
}

/// Central directory per-item header (68 bytes).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DirectoryFileHeader {
    pub signature: u32,
    pub version_by: u16,
    pub version_min: u16,
    pub general: u16,
    pub compress_method: u16,
    pub crc32: u32,
    pub mtime: i64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub offset_file: u64,
    pub offset_record: u64,
    pub filename_len: u16,
    pub extra_len: u16,
    pub comment_len: u16,
    pub attrs_internal: u16,
    pub attrs_external: u32,
}

impl DirectoryFileHeader {
    // Field widths sum to 68 bytes, including the trailing attrsInternal(2)
    // and attrsExternal(4) fields; no padding, every field is a byte array.
    pub(crate) const SIZE: usize = 68;

    pub(crate) fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        put_u32(&mut buf, 0, self.signature);
        put_u16(&mut buf, 4, self.version_by);
        put_u16(&mut buf, 6, self.version_min);
        put_u16(&mut buf, 8, self.general);
        put_u16(&mut buf, 10, self.compress_method);
        put_u32(&mut buf, 12, self.crc32);
        put_i64(&mut buf, 16, self.mtime);
        put_u64(&mut buf, 24, self.compressed_size);
        put_u64(&mut buf, 32, self.uncompressed_size);
        put_u64(&mut buf, 40, self.offset_file);
        put_u64(&mut buf, 48, self.offset_record);
        put_u16(&mut buf, 56, self.filename_len);
        put_u16(&mut buf, 58, self.extra_len);
        put_u16(&mut buf, 60, self.comment_len);
        put_u16(&mut buf, 62, self.attrs_internal);
        put_u32(&mut buf, 64, self.attrs_external);
        buf
    }

    pub(crate) fn decode(buf: &[u8; Self::SIZE]) -> Self {
        DirectoryFileHeader {
            signature: get_u32(buf, 0),
            version_by: get_u16(buf, 4),
            version_min: get_u16(buf, 6),
            general: get_u16(buf, 8),
            compress_method: get_u16(buf, 10),
            crc32: get_u32(buf, 12),
            mtime: get_i64(buf, 16),
            compressed_size: get_u64(buf, 24),
            uncompressed_size: get_u64(buf, 32),
            offset_file: get_u64(buf, 40),
            offset_record: get_u64(buf, 48),
            filename_len: get_u16(buf, 56),
            extra_len: get_u16(buf, 58),
            comment_len: get_u16(buf, 60),
            attrs_internal: get_u16(buf, 62),
            attrs_external: get_u32(buf, 64),
        }
    }
}

/// 20-byte trailer locating the central directory.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EndOfDirectory {
    pub signature: u32,
    pub records_number: u16,
    pub comment_len: u16,
    pub dir_record_offset: u64,
    pub dir_record_size: u32,
}

impl EndOfDirectory {
    pub(crate) const SIZE: usize = 20;

    pub(crate) fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        put_u32(&mut buf, 0, self.signature);
        put_u16(&mut buf, 4, self.records_number);
        put_u16(&mut buf, 6, self.comment_len);
        put_u64(&mut buf, 8, self.dir_record_offset);
        put_u32(&mut buf, 16, self.dir_record_size);
        buf
    }

    pub(crate) fn decode(buf: &[u8; Self::SIZE]) -> Self {
        EndOfDirectory {
            signature: get_u32(buf, 0),
            records_number: get_u16(buf, 4),
            comment_len: get_u16(buf, 6),
            dir_record_offset: get_u64(buf, 8),
            dir_record_size: get_u32(buf, 16),
        }
    }
}

/// In-memory directory map entry: a directory header plus its extras, name
/// and comment. Built at pack time, serialized at `write()`.
#[derive(Debug, Clone)]
pub(crate) struct DirectoryEntry {
    pub header: DirectoryFileHeader,
    pub extra: Vec<LocalFileExtraField>,
    pub name: String,
    pub comment: String,
}

impl DirectoryEntry {
    pub(crate) fn permissions(&self) -> Option<u16> {
        self.extra
            .iter()
            .find(|e| e.id == EXTRA_PERMISSIONS)
            .map(|e| e.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_file_header_roundtrips() {
        let hdr = LocalFileHeader {
            signature: SIG_LOCAL_HEADER,
            version: FORMAT_VERSION,
            general: GENERAL_STREAMED,
            compression: CompressionMethod::Zstd as u16,
            filename_len: 7,
            crc32: 0xDEAD_BEEF,
            compressed_size: 123,
            uncompressed_size: 456,
            mtime: -42,
            offset_gap: 0,
            extra_len: LocalFileExtraField::SIZE as u16,
        };
        let encoded = hdr.encode();
        assert_eq!(encoded.len(), LocalFileHeader::SIZE);
        let decoded = LocalFileHeader::decode(&encoded);
        assert_eq!(decoded.signature, hdr.signature);
        assert_eq!(decoded.compressed_size, hdr.compressed_size);
        assert_eq!(decoded.uncompressed_size, hdr.uncompressed_size);
        assert_eq!(decoded.mtime, hdr.mtime);
        assert_eq!(decoded.extra_len, hdr.extra_len);
    }

    #[test]
    fn directory_file_header_roundtrips() {
        let hdr = DirectoryFileHeader {
            signature: SIG_DIRECTORY_ENTRY,
            version_by: FORMAT_VERSION,
            version_min: FORMAT_VERSION,
            general: 0,
            compress_method: CompressionMethod::None as u16,
            crc32: 7,
            mtime: 99,
            compressed_size: 10,
            uncompressed_size: 10,
            offset_file: 200,
            offset_record: 150,
            filename_len: 3,
            extra_len: 4,
            comment_len: 0,
            attrs_internal: 0,
            attrs_external: 0,
        };
        let encoded = hdr.encode();
        assert_eq!(encoded.len(), DirectoryFileHeader::SIZE);
        let decoded = DirectoryFileHeader::decode(&encoded);
        assert_eq!(decoded.offset_file, hdr.offset_file);
        assert_eq!(decoded.offset_record, hdr.offset_record);
        assert_eq!(decoded.filename_len, hdr.filename_len);
    }

    #[test]
    fn end_of_directory_roundtrips() {
        let eod = EndOfDirectory {
            signature: SIG_END_OF_DIRECTORY,
            records_number: 3,
            comment_len: 0,
            dir_record_offset: 4096,
            dir_record_size: 512,
        };
        let encoded = eod.encode();
        assert_eq!(encoded.len(), EndOfDirectory::SIZE);
        let decoded = EndOfDirectory::decode(&encoded);
        assert_eq!(decoded.records_number, 3);
        assert_eq!(decoded.dir_record_offset, 4096);
        assert_eq!(decoded.dir_record_size, 512);
    }

    #[test]
    fn signature_bytes_match_spec() {
        // `N S 02 01` little-endian etc.
        let mut buf = [0u8; 4];
        put_u32(&mut buf, 0, SIG_LOCAL_HEADER);
        assert_eq!(buf, [0x4E, 0x53, 0x01, 0x02]);

        put_u32(&mut buf, 0, SIG_DIRECTORY_ENTRY);
        assert_eq!(buf, [0x4E, 0x53, 0x05, 0x06]);

        put_u32(&mut buf, 0, SIG_END_OF_DIRECTORY);
        assert_eq!(buf, [0x4E, 0x53, 0x07, 0x08]);
    }
}
