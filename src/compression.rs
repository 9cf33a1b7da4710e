//! Streaming LZ4 compression for snapshots
//!
//! Snapshots are written in the standard LZ4 frame format, so any `lz4`
//! command line tool can restore them. Both directions stream through
//! bounded blocks; a target is never loaded into memory as a whole.
//!
//! ## Examples
//!
//! ```rust
//! use hfbr::compression::{compress_stream, decompress_stream};
//!
//! let data = b"print('Hello, World!')\n".repeat(100);
//! let mut compressed = Vec::new();
//! let stats = compress_stream(&mut data.as_slice(), &mut compressed).unwrap();
//! assert_eq!(stats.bytes_in, data.len() as u64);
//! assert!(stats.bytes_out < stats.bytes_in);
//!
//! let mut restored = Vec::new();
//! decompress_stream(&mut compressed.as_slice(), &mut restored).unwrap();
//! assert_eq!(restored, data);
//! ```

use crate::error::{HfbrError, Result};
use crate::utils::{block_transfer, BLOCK_SIZE};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

/// File name suffix of every snapshot, without the leading dot
pub const SNAPSHOT_SUFFIX: &str = "lz4";

/// Statistics of one compression run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStats {
    /// Uncompressed bytes read
    pub bytes_in: u64,
    /// Compressed bytes written
    pub bytes_out: u64,
    /// Wall time in milliseconds
    pub compression_time_ms: u64,
}

impl CompressionStats {
    /// Compressed size relative to the input (0.0 for empty input)
    pub fn ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            return 0.0;
        }
        self.bytes_out as f64 / self.bytes_in as f64
    }
}

/// Writer wrapper counting the bytes that pass through it
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Compress everything from `reader` into `writer` as one LZ4 frame
pub fn compress_stream<R, W>(reader: &mut R, writer: W) -> Result<CompressionStats>
where
    R: Read + ?Sized,
    W: Write,
{
    let start = Instant::now();
    let mut encoder = FrameEncoder::new(CountingWriter {
        inner: writer,
        count: 0,
    });
    let bytes_in = block_transfer(reader, &mut encoder, BLOCK_SIZE)?;
    let mut counted = encoder
        .finish()
        .map_err(|e| HfbrError::compression(format!("LZ4 frame finish failed: {}", e)))?;
    counted.flush()?;

    let stats = CompressionStats {
        bytes_in,
        bytes_out: counted.count,
        compression_time_ms: start.elapsed().as_millis() as u64,
    };
    trace!(
        "Compressed {} bytes -> {} bytes in {}ms",
        stats.bytes_in,
        stats.bytes_out,
        stats.compression_time_ms
    );
    Ok(stats)
}

/// Decompress one LZ4 frame stream from `reader` into `writer`
pub fn decompress_stream<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: Read,
    W: Write + ?Sized,
{
    let mut decoder = FrameDecoder::new(reader);
    block_transfer(&mut decoder, writer, BLOCK_SIZE)
        .map_err(|e| HfbrError::decompression(format!("LZ4 frame decode failed: {}", e)))
}

/// Compress everything from `source` into a new file at `destination`.
///
/// The frame is written to a temporary file next to `destination` and only
/// renamed into place once complete. On failure nothing is left behind; an
/// existing file at `destination` is replaced only on success.
pub fn compress_file<R: Read + ?Sized>(
    source: &mut R,
    destination: &Path,
) -> Result<CompressionStats> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let temp = NamedTempFile::new_in(dir)?;
    let stats = compress_stream(&mut BufReader::new(source), temp.as_file())?;
    temp.as_file().sync_all()?;
    temp.persist(destination).map_err(|e| e.error)?;

    debug!(
        "Wrote snapshot {:?}: {} -> {} bytes ({:.1}%)",
        destination,
        stats.bytes_in,
        stats.bytes_out,
        stats.ratio() * 100.0
    );
    Ok(stats)
}

/// Decompress a snapshot file fully into memory
pub fn decompress_file(path: &Path) -> Result<Vec<u8>> {
    let mut input = BufReader::new(File::open(path)?);
    let mut restored = Vec::new();
    decompress_stream(&mut input, &mut restored)?;
    Ok(restored)
}
