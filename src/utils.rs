//! Utility functions for hfbr
//!
//! Block-wise copying, content digesting and the small file helpers used by
//! the change guard.
//!
//! ## Categories of Utilities
//!
//! ### Streaming
//! - [`block_transfer`] copies a reader into a writer in bounded blocks
//! - [`digest_reader`] hashes a reader with SHA-512 without buffering it whole
//!
//! ### Digest persistence
//! - [`read_digest`] loads a stored digest, mapping a missing file to empty
//! - [`atomic_write`] replaces a file so readers never see a partial digest
//!
//! ## Example Usage
//!
//! ```rust
//! use hfbr::utils::{block_transfer, digest_reader};
//!
//! let mut out = Vec::new();
//! let copied = block_transfer(&mut &b"hello world"[..], &mut out, 4).unwrap();
//! assert_eq!(copied, 11);
//! assert_eq!(out, b"hello world");
//!
//! let digest = digest_reader(&mut &b"abc"[..]).unwrap();
//! assert_eq!(digest.len(), 64);
//! ```

use sha2::{Digest, Sha512};
use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::trace;

/// Block size used when streaming the target (16 KiB)
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Copy everything from `reader` into `writer`, `block_size` bytes at a time.
///
/// Returns the number of bytes copied. Interrupted reads are retried.
///
/// # Panics
///
/// Panics if `block_size` is 0.
pub fn block_transfer<R, W>(reader: &mut R, writer: &mut W, block_size: usize) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    assert!(block_size > 0, "block size must be positive");
    let mut buffer = vec![0u8; block_size];
    let mut total = 0u64;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..bytes_read])?;
        total += bytes_read as u64;
    }

    Ok(total)
}

/// Adapter that lets a hasher act as the sink of [`block_transfer`]
struct HashWriter<'a>(&'a mut Sha512);

impl Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compute the SHA-512 digest of everything `reader` yields.
///
/// The content is streamed in [`BLOCK_SIZE`] blocks; the returned vector is
/// always 64 bytes long.
pub fn digest_reader<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut hasher = Sha512::new();
    let bytes = block_transfer(reader, &mut HashWriter(&mut hasher), BLOCK_SIZE)?;
    trace!("Digested {} bytes", bytes);
    Ok(hasher.finalize().to_vec())
}

/// Read a previously stored digest.
///
/// A missing file is not an error: it yields an empty digest, which never
/// matches a real one.
pub fn read_digest(path: &Path) -> io::Result<Vec<u8>> {
    match fs::read(path) {
        Ok(digest) => Ok(digest),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            trace!("No stored digest at {:?}", path);
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Write file content atomically.
///
/// The content goes to a temporary file in the same directory which is then
/// renamed over `path`, so a crash never leaves a truncated file behind.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Short hexadecimal prefix of a digest, for log lines
pub fn short_hex(digest: &[u8]) -> String {
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}
