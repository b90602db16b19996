//! # zpack: single-file archive container with Zstandard compression
//!
//! `zpack` packs an arbitrary set of named byte streams into one file, each
//! compressed independently with Zstandard, tracked by an in-archive
//! directory at the tail of the file so the set of items can be listed and
//! looked up without scanning the whole archive. Removing an item only
//! erases its directory entry; the payload becomes dead space until the
//! next [`engine::ZPack::write`] or an explicit [`engine::ZPack::repack`].
//!
//! ## Quick start
//!
//! ```no_run
//! use zpack::ZPack;
//!
//! let mut archive = ZPack::open("archive.zpk", true)?;
//! archive.pack_item("hello.txt", b"hello, world", "", "")?;
//! archive.write()?;
//!
//! let text = archive.extract_str("hello.txt");
//! assert_eq!(text, "hello, world");
//! # Ok::<(), zpack::ZPackError>(())
//! ```

mod codec;
mod compression;
pub mod engine;
pub mod error;
mod records;

pub use engine::{ZPack, ZPackStats};
pub use error::{ErrorKind, Result, ZPackError};
pub use records::CompressionMethod;
