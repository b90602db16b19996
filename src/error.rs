//! Error types for zpack.

use std::io;

/// Result type for zpack operations.
pub type Result<T> = std::result::Result<T, ZPackError>;

/// The flat error-kind enumeration the engine's sticky `last_error` and the
/// `good`/`fail`/`bad` status triad report against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Ok,
    ReadDirectoryEnd,
    DirectoryEndSignature,
    OpeningArchiveFile,
    OpeningRepackFile,
    ReadEntryHeader,
    ReadEntryName,
    ReadEntryExtra,
    ReadEntryComment,
    ReadLocalHeader,
    PackFileOpen,
    PackItemSize,
    ExtractGeneral,
    WriteWrongSeek,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ErrorKind::Ok => "ok",
            ErrorKind::ReadDirectoryEnd => "failed to read end-of-directory record",
            ErrorKind::DirectoryEndSignature => "end-of-directory signature mismatch",
            ErrorKind::OpeningArchiveFile => "failed to open archive file",
            ErrorKind::OpeningRepackFile => "failed to open repack sibling file",
            ErrorKind::ReadEntryHeader => "failed to read directory entry header",
            ErrorKind::ReadEntryName => "failed to read directory entry name",
            ErrorKind::ReadEntryExtra => "failed to read directory entry extra field",
            ErrorKind::ReadEntryComment => "failed to read directory entry comment",
            ErrorKind::ReadLocalHeader => "failed to read local file header during repack",
            ErrorKind::PackFileOpen => "failed to open source file for packing",
            ErrorKind::PackItemSize => "item data is empty",
            ErrorKind::ExtractGeneral => "extraction failed",
            ErrorKind::WriteWrongSeek => "directory write landed on an invalid seek position",
            ErrorKind::Unknown => "unknown error",
        };
        write!(f, "{msg}")
    }
}

/// Error type for zpack operations.
#[derive(Debug)]
pub enum ZPackError {
    /// I/O error.
    Io(io::Error),
    /// One of the flat error kinds from the archive's own error model.
    Kind(ErrorKind),
    /// Compression or decompression backend failure.
    Compression(String),
    /// The requested entry does not exist in the directory map.
    EntryNotFound(String),
    /// Stored CRC-32 did not match the computed CRC-32 of extracted data.
    CrcMismatch { name: String, stored: u32, computed: u32 },
}

impl std::fmt::Display for ZPackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZPackError::Io(e) => write!(f, "I/O error: {e}"),
            ZPackError::Kind(k) => write!(f, "{k}"),
            ZPackError::Compression(msg) => write!(f, "compression error: {msg}"),
            ZPackError::EntryNotFound(name) => write!(f, "entry not found: {name}"),
            ZPackError::CrcMismatch { name, stored, computed } => write!(
                f,
                "CRC-32 mismatch for {name}: stored {stored:#010x}, computed {computed:#010x}"
            ),
        }
    }
}

impl std::error::Error for ZPackError {}

impl From<io::Error> for ZPackError {
    fn from(err: io::Error) -> Self {
        ZPackError::Io(err)
    }
}

impl From<ErrorKind> for ZPackError {
    fn from(kind: ErrorKind) -> Self {
        ZPackError::Kind(kind)
    }
}
