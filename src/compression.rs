//! Compression backend, backed by `zstd`: block-mode compress/decompress
//! plus streaming compress/decompress. A compressor instance is
//! single-direction — the streaming compressor and streaming decompressor
//! are distinct types rather than one struct with a runtime mode flag, so
//! misuse is a type error instead of a runtime one.

use crate::error::{Result, ZPackError};
use std::io::Write;

fn zstd_err(context: &str, e: std::io::Error) -> ZPackError {
    ZPackError::Compression(format!("{context}: {e}"))
}

/// Fixed compression level used for every item.
pub(crate) const COMPRESSION_LEVEL: i32 = 19;

/// Upper bound on compressed output size for a block of `in_size` bytes.
pub(crate) fn bound(in_size: usize) -> usize {
    zstd::zstd_safe::compress_bound(in_size)
}

/// Compresses `input` into `output` in one shot, returning the number of
/// bytes written.
pub(crate) fn compress_block(input: &[u8], output: &mut [u8]) -> Result<usize> {
    zstd::bulk::compress_to_buffer(input, output, COMPRESSION_LEVEL)
        .map_err(|e| zstd_err("compress_block", e))
}

/// Reads the uncompressed size recorded in a Zstd frame header.
pub(crate) fn frame_content_size(input: &[u8]) -> Result<u64> {
    match zstd::zstd_safe::get_frame_content_size(input) {
        Ok(Some(size)) => Ok(size),
        Ok(None) | Err(_) => Err(ZPackError::Compression(
            "could not determine decompressed frame size".to_string(),
        )),
    }
}

/// Decompresses a single Zstd block of known output size.
pub(crate) fn decompress_block(input: &[u8], output: &mut [u8]) -> Result<usize> {
    zstd::bulk::decompress_to_buffer(input, output).map_err(|e| zstd_err("decompress_block", e))
}

/// Streams compressed output to `sink` as uncompressed bytes are fed in,
/// tracking total compressed bytes emitted.
pub(crate) struct StreamCompressor<'a, W: Write> {
    encoder: zstd::stream::Encoder<'a, W>,
}

impl<'a, W: Write> StreamCompressor<'a, W> {
    pub(crate) fn new(sink: W) -> Result<Self> {
        let encoder = zstd::stream::Encoder::new(sink, COMPRESSION_LEVEL)
            .map_err(|e| zstd_err("stream compress setup", e))?;
        Ok(StreamCompressor { encoder })
    }

    /// Feeds `bytes` through the encoder; the encoder writes compressed
    /// output to the sink as it goes.
    pub(crate) fn consume(&mut self, bytes: &[u8]) -> Result<()> {
        self.encoder
            .write_all(bytes)
            .map_err(|e| zstd_err("stream compress consume", e))
    }

    /// Finalizes the stream and hands back the sink, so the caller (which
    /// owns a byte-counting wrapper around it) can read off the total
    /// compressed bytes emitted.
    pub(crate) fn finish(self) -> Result<W> {
        self.encoder
            .finish()
            .map_err(|e| zstd_err("stream compress end", e))
    }
}

/// Counts bytes written through it, so the engine can learn the total
/// compressed size emitted by a streaming session without the compressor
/// needing direct access to the underlying file's position.
pub(crate) struct CountingWriter<W: Write> {
    inner: W,
    pub(crate) count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        CountingWriter { inner, count: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming decompressor: feed compressed chunks in, get decompressed bytes
/// written to `sink` and observed via `observer` (for external CRC
/// computation) out.
pub(crate) struct StreamDecompressor<'a> {
    decoder: zstd::stream::raw::Decoder<'a>,
}

impl<'a> StreamDecompressor<'a> {
    pub(crate) fn new() -> Result<Self> {
        let decoder =
            zstd::stream::raw::Decoder::new().map_err(|e| zstd_err("stream decompress setup", e))?;
        Ok(StreamDecompressor { decoder })
    }

    /// Decompresses `bytes`, writing output to `sink` and passing each
    /// produced chunk to `observer`.
    pub(crate) fn consume(
        &mut self,
        sink: &mut impl Write,
        bytes: &[u8],
        mut observer: impl FnMut(&[u8]),
    ) -> Result<()> {
        use zstd::stream::raw::Operation;

        let mut in_buffer = zstd::stream::raw::InBuffer::around(bytes);
        let mut out = vec![0u8; 1 << 16];

        while in_buffer.pos < in_buffer.src.len() {
            let mut out_buffer = zstd::stream::raw::OutBuffer::around(&mut out);
            self.decoder
                .run(&mut in_buffer, &mut out_buffer)
                .map_err(|e| zstd_err("stream decompress consume", e))?;
            let produced = out_buffer.pos();
            if produced > 0 {
                sink.write_all(&out[..produced])?;
                observer(&out[..produced]);
            } else if in_buffer.pos == in_buffer.src.len() {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn finish(self) {
        drop(self);
    }
}
