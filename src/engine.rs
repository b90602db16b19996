//! The archive engine: owns the file handle, the in-memory directory map,
//! and the offset invariants; drives open, pack, remove, extract, write
//! (flush directory), and repack.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::compression;
use crate::error::{ErrorKind, Result, ZPackError};
use crate::records::{
    CompressionMethod, DirectoryEntry, DirectoryFileHeader, EndOfDirectory, LocalFileExtraField,
    LocalFileHeader, FORMAT_VERSION, GENERAL_STREAMED, SIG_DIRECTORY_ENTRY, SIG_END_OF_DIRECTORY,
    SIG_LOCAL_HEADER,
};

/// Default size of the transient I/O buffer: `min(block_size_bytes,
/// block_size_max)` per the spec, both defaulting to 6 MiB.
const DEFAULT_BLOCK_SIZE: usize = 6 * 1024 * 1024;

/// Items of this size or smaller are always stored uncompressed — the
/// framing overhead isn't worth it.
const STORE_THRESHOLD: u64 = 80;

/// Default POSIX-style permission bits for in-memory items packed via
/// [`ZPack::pack_item`]: owner read/write, others read.
const DEFAULT_ITEM_PERMS: u16 = 0o604;

/// Named states for the archive engine, tracked purely for diagnostics —
/// never consulted as a correctness gate, since `&mut self` borrowing
/// already rules out two operations overlapping on one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Closed,
    Open,
    Writing,
    Flushing,
    Repacking,
}

/// Snapshot of archive-level statistics, refreshed by [`ZPack::write`] and
/// [`ZPack::repack`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZPackStats {
    pub files_size_uncompressed: u64,
    pub files_size_compressed: u64,
    pub archive_size: u64,
    pub records: u32,
    pub last_offset: u64,
    pub directory_offset: u64,
}

/// The archive engine. Owns exactly one open file handle; never shared
/// across threads (no `Sync` impl is provided, and none is needed — every
/// mutating operation takes `&mut self`, so the borrow checker already
/// rules out concurrent use from a single thread, and the type simply isn't
/// sent across threads in the API this crate exposes).
pub struct ZPack {
    file: File,
    archive_name: PathBuf,
    directory: HashMap<String, DirectoryEntry>,
    dir_end: EndOfDirectory,
    border_offset: u64,
    stats: ZPackStats,
    last_error: ErrorKind,
    block_size_bytes: usize,
    block_size_max: usize,
    state: EngineState,
}

impl ZPack {
    /// Opens (creating if necessary) the archive at `path`. If `truncate` is
    /// set the file is emptied first. On a non-empty, non-truncated file the
    /// end-of-directory trailer and central directory are parsed; a parse
    /// failure sets the sticky error state but the engine is still returned
    /// open and usable.
    pub fn open<P: AsRef<Path>>(path: P, truncate: bool) -> Result<ZPack> {
        let archive_name = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        if truncate {
            options.truncate(true);
        }
        let file = options.open(&archive_name)?;

        let mut engine = ZPack {
            file,
            archive_name,
            directory: HashMap::new(),
            dir_end: EndOfDirectory::default(),
            border_offset: 0,
            stats: ZPackStats::default(),
            last_error: ErrorKind::Ok,
            block_size_bytes: DEFAULT_BLOCK_SIZE,
            block_size_max: DEFAULT_BLOCK_SIZE,
            state: EngineState::Open,
        };

        let len = engine.file.metadata()?.len();
        engine.file.seek(SeekFrom::End(0))?;
        engine.border_offset = len;

        if !truncate && len > 0 {
            // Errors here are recorded on last_error; the engine stays open.
            let _ = engine.read_directory();
        }

        Ok(engine)
    }

    /// Re-opens the archive file from scratch, re-parsing its directory.
    /// Used after [`ZPack::repack`] replaces the backing file.
    fn reopen(&mut self) -> Result<()> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        let file = options.open(&self.archive_name)?;

        let len = file.metadata()?.len();
        self.file = file;
        self.file.seek(SeekFrom::End(0))?;
        self.border_offset = len;
        self.directory.clear();
        self.dir_end = EndOfDirectory::default();

        if len > 0 {
            let _ = self.read_directory();
        }

        Ok(())
    }

    /// Releases the file handle. Rust's `File` already closes on drop; this
    /// method exists as an explicit close point, and consumes `self` so the
    /// engine can't be used again afterward.
    pub fn close(mut self) {
        self.state = EngineState::Closed;
    }

    /// Runs `f` with the engine's diagnostic state set to `during`,
    /// restoring it to `Open` afterward regardless of whether `f` returned
    /// `Ok` or `Err` — the reset happens on unwind of the inner closure, not
    /// on a fallible cleanup path.
    fn transition<T>(&mut self, during: EngineState, f: impl FnOnce(&mut Self) -> T) -> T {
        let prior = self.state;
        self.state = during;
        let result = f(self);
        self.state = prior;
        result
    }

    /// Resets the sticky error state to OK.
    pub fn clear(&mut self) {
        self.last_error = ErrorKind::Ok;
    }

    /// Mirrors the file handle's status plus the sticky error code: `true`
    /// when the last operation succeeded.
    pub fn good(&self) -> bool {
        self.last_error == ErrorKind::Ok
    }

    /// `true` when the last operation failed.
    pub fn fail(&self) -> bool {
        !self.good()
    }

    /// Alias for [`ZPack::fail`]: the engine tracks a single sticky error
    /// code rather than distinct fail/bad bits.
    pub fn bad(&self) -> bool {
        !self.good()
    }

    /// Current archive statistics, valid as of the last [`ZPack::write`] or
    /// [`ZPack::repack`] call.
    pub fn stats(&self) -> ZPackStats {
        self.stats
    }

    /// Number of items currently tracked in the in-memory directory (may
    /// include items not yet flushed to disk via `write()`).
    pub fn len(&self) -> usize {
        self.directory.len()
    }

    /// Whether the in-memory directory has no items.
    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    /// Item names currently tracked, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.directory.keys().map(String::as_str)
    }

    fn read_directory(&mut self) -> Result<()> {
        let eod_size = EndOfDirectory::SIZE as u64;
        let file_len = self.file.metadata()?.len();
        if file_len < eod_size {
            self.last_error = ErrorKind::ReadDirectoryEnd;
            return Err(ErrorKind::ReadDirectoryEnd.into());
        }

        self.file.seek(SeekFrom::End(-(eod_size as i64)))?;
        let mut buf = [0u8; EndOfDirectory::SIZE];
        if self.file.read_exact(&mut buf).is_err() {
            self.last_error = ErrorKind::ReadDirectoryEnd;
            return Err(ErrorKind::ReadDirectoryEnd.into());
        }

        let dir_end = EndOfDirectory::decode(&buf);
        if dir_end.signature != SIG_END_OF_DIRECTORY {
            self.dir_end = EndOfDirectory::default();
            self.last_error = ErrorKind::DirectoryEndSignature;
            return Err(ErrorKind::DirectoryEndSignature.into());
        }

        self.dir_end = dir_end;

        if dir_end.records_number == 0 {
            return Ok(());
        }

        self.directory.clear();
        self.file.seek(SeekFrom::Start(dir_end.dir_record_offset))?;

        for _ in 0..dir_end.records_number {
            let mut hbuf = [0u8; DirectoryFileHeader::SIZE];
            if self.file.read_exact(&mut hbuf).is_err() {
                self.last_error = ErrorKind::ReadEntryHeader;
                return Err(ErrorKind::ReadEntryHeader.into());
            }
            let header = DirectoryFileHeader::decode(&hbuf);

            let mut name = String::new();
            if header.filename_len > 0 {
                let mut nbuf = vec![0u8; header.filename_len as usize];
                if self.file.read_exact(&mut nbuf).is_err() {
                    self.last_error = ErrorKind::ReadEntryName;
                    return Err(ErrorKind::ReadEntryName.into());
                }
                name = String::from_utf8_lossy(&nbuf).into_owned();
            }

            let extra_entries = header.extra_len as usize / LocalFileExtraField::SIZE;
            let mut extra = Vec::with_capacity(extra_entries);
            for _ in 0..extra_entries {
                let mut ebuf = [0u8; LocalFileExtraField::SIZE];
                if self.file.read_exact(&mut ebuf).is_err() {
                    self.last_error = ErrorKind::ReadEntryExtra;
                    return Err(ErrorKind::ReadEntryExtra.into());
                }
                extra.push(LocalFileExtraField::decode(&ebuf));
            }

            let mut comment = String::new();
            if header.comment_len > 0 {
                let mut cbuf = vec![0u8; header.comment_len as usize];
                if self.file.read_exact(&mut cbuf).is_err() {
                    self.last_error = ErrorKind::ReadEntryComment;
                    return Err(ErrorKind::ReadEntryComment.into());
                }
                comment = String::from_utf8_lossy(&cbuf).into_owned();
            }

            self.directory.insert(
                name.clone(),
                DirectoryEntry {
                    header,
                    extra,
                    name,
                    comment,
                },
            );
        }

        Ok(())
    }

    /// Packs a filesystem file into the archive under `dir/basename`.
    /// Permissions and modification time are taken from the source file's
    /// metadata (POSIX mode bits on Unix; a fixed owner-read/write,
    /// others-read default on platforms without a native permission model).
    pub fn pack_file<P: AsRef<Path>>(&mut self, path: P, dir: &str, comment: &str) -> Result<()> {
        let path = path.as_ref();
        self.transition(EngineState::Writing, |this| {
            let metadata = std::fs::metadata(path).map_err(|e| {
                this.last_error = ErrorKind::PackFileOpen;
                ZPackError::Io(e)
            })?;
            let size = metadata.len();
            let mtime = mtime_secs(&metadata);
            let perms = permissions_bits(&metadata);

            let base = path
                .file_name()
                .ok_or(ErrorKind::PackFileOpen)?
                .to_string_lossy()
                .into_owned();
            let item_name = normalize_name(dir, &base);

            let mut source = File::open(path).map_err(|e| {
                this.last_error = ErrorKind::PackFileOpen;
                ZPackError::Io(e)
            })?;

            this.pack_data(
                &mut source,
                &item_name,
                perms,
                size,
                mtime,
                comment,
                CompressionMethod::Zstd,
            )
        })
    }

    /// Packs an in-memory buffer into the archive under `dir/name`, stamped
    /// with the current time as its modification time.
    pub fn pack_item(&mut self, name: &str, data: &[u8], dir: &str, comment: &str) -> Result<()> {
        if data.is_empty() {
            self.last_error = ErrorKind::PackItemSize;
            return Err(ErrorKind::PackItemSize.into());
        }

        let mtime = now_secs();
        let item_name = normalize_name(dir, name);

        self.transition(EngineState::Writing, |this| {
            let mut source = data;
            this.pack_data(
                &mut source,
                &item_name,
                DEFAULT_ITEM_PERMS,
                data.len() as u64,
                mtime,
                comment,
                CompressionMethod::Zstd,
            )
        })
    }

    fn pack_data<R: Read>(
        &mut self,
        source: &mut R,
        item_name: &str,
        perms: u16,
        file_size: u64,
        mtime: i64,
        comment: &str,
        requested_method: CompressionMethod,
    ) -> Result<()> {
        if let Some(existing) = self.directory.get(item_name) {
            if existing.header.uncompressed_size == file_size && existing.header.mtime == mtime {
                return Ok(());
            }
        }

        let offset_start = self.dir_end.dir_record_offset;

        let mut compress_method = requested_method;
        if file_size <= STORE_THRESHOLD {
            compress_method = CompressionMethod::None;
        }

        let ibuf_size = self.block_size_bytes.min(self.block_size_max) as u64;
        let single_step = file_size <= ibuf_size;

        let extra_perms = LocalFileExtraField::permissions(perms);
        let mut general_flag: u16 = 0;

        // Single-step: buffer, CRC and (maybe) compress fully before any
        // bytes are written, so the local header can be written once with
        // final values already known.
        let mut single_payload: Option<Vec<u8>> = None;
        let mut precomputed_crc = 0u32;
        let mut precomputed_compressed_size = 0u64;

        if single_step {
            let mut raw = vec![0u8; file_size as usize];
            source.read_exact(&mut raw)?;

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&raw);
            precomputed_crc = hasher.finalize();

            if compress_method != CompressionMethod::None {
                let bound = compression::bound(raw.len());
                let mut obuf = vec![0u8; bound];
                let n = compression::compress_block(&raw, &mut obuf)?;
                obuf.truncate(n);
                precomputed_compressed_size = obuf.len() as u64;
                single_payload = Some(obuf);
            } else {
                precomputed_compressed_size = raw.len() as u64;
                single_payload = Some(raw);
            }
        } else {
            general_flag |= GENERAL_STREAMED;
        }

        let mut loc_hd = LocalFileHeader {
            signature: SIG_LOCAL_HEADER,
            version: FORMAT_VERSION,
            general: general_flag,
            compression: compress_method as u16,
            filename_len: item_name.len() as u16,
            crc32: if single_step { precomputed_crc } else { 0 },
            compressed_size: if single_step { precomputed_compressed_size } else { 0 },
            uncompressed_size: if single_step { file_size } else { 0 },
            mtime,
            offset_gap: 0,
            extra_len: LocalFileExtraField::SIZE as u16,
        };

        self.file.seek(SeekFrom::Start(offset_start))?;
        self.file.write_all(&loc_hd.encode())?;
        self.file.write_all(item_name.as_bytes())?;
        self.file.write_all(&extra_perms.encode())?;

        let file_offset = self.file.stream_position()?;

        let (final_crc, final_compressed_size) = if single_step {
            let payload = single_payload.expect("single-step payload computed above");
            self.file.write_all(&payload)?;
            (precomputed_crc, precomputed_compressed_size)
        } else {
            let mut hasher = crc32fast::Hasher::new();
            let mut chunk = vec![0u8; ibuf_size as usize];
            let mut remaining = file_size;

            let emitted = if compress_method != CompressionMethod::None {
                let counting = compression::CountingWriter::new(&mut self.file);
                let mut stream = compression::StreamCompressor::new(counting)?;
                while remaining > 0 {
                    let take = remaining.min(ibuf_size) as usize;
                    source.read_exact(&mut chunk[..take])?;
                    hasher.update(&chunk[..take]);
                    stream.consume(&chunk[..take])?;
                    remaining -= take as u64;
                }
                let counting = stream.finish()?;
                counting.count
            } else {
                while remaining > 0 {
                    let take = remaining.min(ibuf_size) as usize;
                    source.read_exact(&mut chunk[..take])?;
                    hasher.update(&chunk[..take]);
                    self.file.write_all(&chunk[..take])?;
                    remaining -= take as u64;
                }
                file_size
            };

            let crc = hasher.finalize();
            let rewind = self.file.stream_position()?;

            loc_hd.crc32 = crc;
            loc_hd.uncompressed_size = file_size;
            loc_hd.compressed_size = emitted;

            self.file.seek(SeekFrom::Start(offset_start))?;
            self.file.write_all(&loc_hd.encode())?;
            self.file.seek(SeekFrom::Start(rewind))?;

            (crc, emitted)
        };

        let offset_end = self.file.stream_position()?;

        let dir_header = DirectoryFileHeader {
            signature: SIG_DIRECTORY_ENTRY,
            version_by: FORMAT_VERSION,
            version_min: FORMAT_VERSION,
            general: general_flag,
            compress_method: compress_method as u16,
            crc32: final_crc,
            mtime,
            compressed_size: final_compressed_size,
            uncompressed_size: file_size,
            offset_file: file_offset,
            offset_record: offset_start,
            filename_len: item_name.len() as u16,
            extra_len: LocalFileExtraField::SIZE as u16,
            comment_len: comment.len() as u16,
            attrs_internal: 0,
            attrs_external: 0,
        };

        self.directory.insert(
            item_name.to_string(),
            DirectoryEntry {
                header: dir_header,
                extra: vec![extra_perms],
                name: item_name.to_string(),
                comment: comment.to_string(),
            },
        );

        self.dir_end.dir_record_offset = offset_end;

        Ok(())
    }

    /// Erases `name` from the in-memory directory map. The payload bytes
    /// remain as dead space in the file until the next `write()` or
    /// `repack()`. Returns whether an entry was actually removed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.directory.remove(name).is_some()
    }

    fn extract<W: Write>(&mut self, entry: &DirectoryEntry, sink: &mut W) -> Result<u32> {
        let compressed_size = entry.header.compressed_size;
        let compress_method = CompressionMethod::from_u16(entry.header.compress_method)?;
        let streamed = entry.header.general & GENERAL_STREAMED != 0;

        self.file.seek(SeekFrom::Start(entry.header.offset_file))?;

        let ibuf_size = (self.block_size_bytes.min(self.block_size_max) as u64)
            .min(compressed_size.max(1)) as usize;
        let mut buf = vec![0u8; ibuf_size.max(1)];

        let mut hasher = crc32fast::Hasher::new();
        let mut read_total = 0u64;

        let mut stream_decoder = if streamed && compress_method != CompressionMethod::None {
            Some(compression::StreamDecompressor::new()?)
        } else {
            None
        };

        while read_total < compressed_size {
            let remaining = compressed_size - read_total;
            let take = remaining.min(ibuf_size as u64) as usize;
            self.file.read_exact(&mut buf[..take])?;
            read_total += take as u64;

            if compress_method == CompressionMethod::None {
                sink.write_all(&buf[..take])?;
                hasher.update(&buf[..take]);
            } else if !streamed {
                let out_size = compression::frame_content_size(&buf[..take])?;
                let mut out = vec![0u8; out_size as usize];
                let n = compression::decompress_block(&buf[..take], &mut out)?;
                sink.write_all(&out[..n])?;
                hasher.update(&out[..n]);
            } else {
                let decoder = stream_decoder
                    .as_mut()
                    .expect("stream decoder initialized for streamed entries");
                decoder.consume(sink, &buf[..take], |chunk| hasher.update(chunk))?;
            }
        }

        if let Some(decoder) = stream_decoder {
            decoder.finish();
        }

        Ok(hasher.finalize())
    }

    /// Returns the full decompressed content of `name`, or an empty string
    /// if it isn't in the archive. A CRC-32 mismatch is logged but does not
    /// fail the call — see [`ZPack::extract_checked`] for a strict variant.
    /// Bytes are decoded lossily rather than validated as UTF-8.
    pub fn extract_str(&mut self, name: &str) -> String {
        let entry = match self.directory.get(name) {
            Some(e) => e.clone(),
            None => return String::new(),
        };

        let mut buf = Vec::new();
        match self.extract(&entry, &mut buf) {
            Ok(computed) => {
                if computed != entry.header.crc32 {
                    log::warn!(
                        "crc mismatch extracting {name}: stored {:#010x}, computed {:#010x}",
                        entry.header.crc32,
                        computed
                    );
                }
                String::from_utf8_lossy(&buf).into_owned()
            }
            Err(e) => {
                log::warn!("extract_str failed for {name}: {e}");
                self.last_error = ErrorKind::ExtractGeneral;
                String::new()
            }
        }
    }

    /// Like [`ZPack::extract_str`]/[`ZPack::extract_file`]'s underlying
    /// extraction, but returns `Err(ZPackError::CrcMismatch)` instead of
    /// only logging, for callers that want corruption to be a hard error.
    pub fn extract_checked(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .directory
            .get(name)
            .cloned()
            .ok_or_else(|| ZPackError::EntryNotFound(name.to_string()))?;

        let mut buf = Vec::new();
        let computed = self.extract(&entry, &mut buf)?;
        if computed != entry.header.crc32 {
            return Err(ZPackError::CrcMismatch {
                name: name.to_string(),
                stored: entry.header.crc32,
                computed,
            });
        }
        Ok(buf)
    }

    /// Extracts `name` into `dest_dir/entry_name`, creating parent
    /// directories as needed, then applies the stored `Permissions` extra
    /// field (if any) directly to the written path. Returns `Ok(false)` if
    /// `name` isn't in the archive.
    pub fn extract_file<P: AsRef<Path>>(&mut self, name: &str, dest_dir: P) -> Result<bool> {
        let entry = match self.directory.get(name) {
            Some(e) => e.clone(),
            None => return Ok(false),
        };

        let dest_dir = dest_dir.as_ref();
        if dest_dir.as_os_str().is_empty() {
            return Ok(false);
        }

        let target = dest_dir.join(&entry.name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&target)?;
        let computed = self.extract(&entry, &mut out)?;
        drop(out);

        if computed != entry.header.crc32 {
            log::warn!(
                "crc mismatch extracting {name}: stored {:#010x}, computed {:#010x}",
                entry.header.crc32,
                computed
            );
        }

        if let Some(perms) = entry.permissions() {
            apply_permissions(&target, perms)?;
        }

        Ok(true)
    }

    /// Serializes the in-memory directory to disk, then either truncates
    /// the file (if removes shrank it below the last known high-water mark)
    /// or evaluates the repack heuristic.
    pub fn write(&mut self) -> Result<()> {
        self.transition(EngineState::Flushing, |this| {
            let dir_offset = this.dir_end.dir_record_offset;
            this.file.seek(SeekFrom::Start(dir_offset))?;
            if this.file.stream_position()? != dir_offset {
                this.last_error = ErrorKind::WriteWrongSeek;
                return Err(ErrorKind::WriteWrongSeek.into());
            }

            let eod = write_directory_map(&this.directory, &mut this.file, dir_offset)?;
            this.dir_end = eod;

            let files_size_compressed: u64 = this
                .directory
                .values()
                .map(|e| e.header.compressed_size)
                .sum();
            let files_size_uncompressed: u64 = this
                .directory
                .values()
                .map(|e| e.header.uncompressed_size)
                .sum();
            let locals_size: u64 = this
                .directory
                .values()
                .map(|e| {
                    LocalFileHeader::SIZE as u64
                        + e.name.len() as u64
                        + e.extra.len() as u64 * LocalFileExtraField::SIZE as u64
                        + e.comment.len() as u64
                })
                .sum();

            let archive_size = files_size_compressed
                + eod.dir_record_size as u64
                + EndOfDirectory::SIZE as u64
                + locals_size;
            let last_offset = this.file.stream_position()?;

            this.stats = ZPackStats {
                files_size_uncompressed,
                files_size_compressed,
                archive_size,
                records: this.directory.len() as u32,
                last_offset,
                directory_offset: eod.dir_record_offset,
            };

            this.file.flush()?;

            if this.border_offset > last_offset {
                this.border_offset = last_offset;
                this.file.set_len(last_offset)?;
                this.file.seek(SeekFrom::End(0))?;
                return Ok(());
            }

            this.border_offset = last_offset;

            let mb = 1024 * 1024u64;
            let ratio_trigger = if archive_size > 30 * mb {
                1.1
            } else if archive_size > 10 * mb {
                1.2
            } else {
                1.5
            };

            if archive_size > 0 && (this.border_offset as f64 / archive_size as f64) > ratio_trigger {
                this.repack()?;
            }

            Ok(())
        })
    }

    /// Rebuilds the archive file, excluding any dead space left by removed
    /// entries, by copying every live record into a sibling file and
    /// renaming it over the current one.
    pub fn repack(&mut self) -> Result<()> {
        self.transition(EngineState::Repacking, |this| {
            let mut repack_name = this.archive_name.clone().into_os_string();
            repack_name.push("r");
            let repack_path = PathBuf::from(repack_name);

            let mut rfile = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&repack_path)
                .map_err(|e| {
                    this.last_error = ErrorKind::OpeningRepackFile;
                    ZPackError::Io(e)
                })?;

            let mut names: Vec<String> = this.directory.keys().cloned().collect();
            names.sort();

            for name in &names {
                let mut entry = this.directory.get(name).cloned().expect("name came from keys()");

                let moved_max = entry.header.compressed_size
                    + LocalFileHeader::SIZE as u64
                    + entry.header.filename_len as u64
                    + entry.header.extra_len as u64;

                this.file.seek(SeekFrom::Start(entry.header.offset_record))?;
                let mut check = [0u8; LocalFileHeader::SIZE];
                if this.file.read_exact(&mut check).is_err() {
                    this.last_error = ErrorKind::ReadLocalHeader;
                    return Err(ErrorKind::ReadLocalHeader.into());
                }
                if LocalFileHeader::decode(&check).signature != SIG_LOCAL_HEADER {
                    this.last_error = ErrorKind::ReadLocalHeader;
                    return Err(ErrorKind::ReadLocalHeader.into());
                }

                this.file.seek(SeekFrom::Start(entry.header.offset_record))?;

                let new_record_offset = rfile.stream_position()?;
                let new_file_offset = new_record_offset
                    + LocalFileHeader::SIZE as u64
                    + entry.header.filename_len as u64
                    + entry.header.extra_len as u64;

                let buf_size = (this.block_size_bytes.min(this.block_size_max) as u64)
                    .min(moved_max.max(1)) as usize;
                let mut buf = vec![0u8; buf_size.max(1)];
                let mut moved = 0u64;
                while moved < moved_max {
                    let take = (moved_max - moved).min(buf_size as u64) as usize;
                    this.file.read_exact(&mut buf[..take])?;
                    rfile.write_all(&buf[..take])?;
                    moved += take as u64;
                }

                entry.header.offset_record = new_record_offset;
                entry.header.offset_file = new_file_offset;
                this.directory.insert(name.clone(), entry);
            }

            let dir_offset = rfile.stream_position()?;
            write_directory_map(&this.directory, &mut rfile, dir_offset)?;

            rfile.flush()?;
            drop(rfile);

            // Close the current handle before the rename so Windows doesn't
            // refuse to replace a file that's still open.
            let placeholder = OpenOptions::new().read(true).open(&repack_path)?;
            let old_file = std::mem::replace(&mut this.file, placeholder);
            drop(old_file);

            std::fs::rename(&repack_path, &this.archive_name)?;

            this.reopen()
        })
    }

    /// Sets the size of the transient pack/extract/repack I/O buffer,
    /// capped by the archive's own `block_size_max`.
    pub fn set_block_size(&mut self, bytes: usize) {
        self.block_size_bytes = bytes;
    }
}

fn write_directory_map<W: Write + Seek>(
    directory: &HashMap<String, DirectoryEntry>,
    stream: &mut W,
    dir_offset: u64,
) -> Result<EndOfDirectory> {
    let mut dir_size: u32 = 0;

    let mut names: Vec<&String> = directory.keys().collect();
    names.sort();

    for name in names {
        let entry = &directory[name];

        stream.write_all(&entry.header.encode())?;
        stream.write_all(entry.name.as_bytes())?;
        for extra in &entry.extra {
            stream.write_all(&extra.encode())?;
            dir_size += LocalFileExtraField::SIZE as u32;
        }
        stream.write_all(entry.comment.as_bytes())?;

        dir_size += DirectoryFileHeader::SIZE as u32;
        dir_size += entry.name.len() as u32;
        dir_size += entry.comment.len() as u32;
    }

    let eod = EndOfDirectory {
        signature: SIG_END_OF_DIRECTORY,
        records_number: directory.len() as u16,
        comment_len: 0,
        dir_record_offset: dir_offset,
        dir_record_size: dir_size,
    };
    stream.write_all(&eod.encode())?;

    Ok(eod)
}

fn normalize_name(dir: &str, base: &str) -> String {
    if dir.is_empty() {
        base.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{base}")
    } else {
        format!("{dir}/{base}")
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn permissions_bits(metadata: &std::fs::Metadata) -> u16 {
    use std::os::unix::fs::PermissionsExt;
    (metadata.permissions().mode() & 0o7777) as u16
}

#[cfg(not(unix))]
fn permissions_bits(_metadata: &std::fs::Metadata) -> u16 {
    DEFAULT_ITEM_PERMS
}

#[cfg(unix)]
fn apply_permissions(path: &Path, perms: u16) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(perms as u32))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_permissions(_path: &Path, _perms: u16) -> Result<()> {
    Ok(())
}
