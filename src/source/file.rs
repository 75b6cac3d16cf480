//! Reading a mailbox file into a [`Buffer`].
//!
//! Files of 8 KiB and up are memory-mapped read-only when mapping is
//! permitted; smaller files, and any file whose mapping fails, are read
//! into a grown heap buffer instead.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::error::{MboxckError, Result};
use crate::source::buffer::Buffer;

/// Files at least this large are mapped rather than read.
const MMAP_THRESHOLD: u64 = 8 * 1024;

/// Initial size of the fallback read buffer.
const READ_INITIAL_SIZE: usize = 64 * 1024;

/// Growth factor applied when the read buffer fills up.
const READ_GROWTH_FACTOR: f64 = 1.5;

/// Read the file at `path`, mapping it when possible.
pub fn read_mailbox(path: &Path, use_mmap: bool) -> Result<Arc<Buffer>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MboxckError::FileNotFound(path.to_path_buf())
        } else {
            MboxckError::io(path, e)
        }
    })?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);

    if use_mmap && size >= MMAP_THRESHOLD {
        // Safety: the mapping is private and read-only; concurrent
        // writers are fended off by the dotlock protocol, not the map.
        match unsafe { Mmap::map(&file) } {
            Ok(map) => {
                debug!(path = %path.display(), size, "mapped mailbox");
                return Ok(Arc::new(Buffer::Mapped(map)));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "mmap failed, falling back to read");
            }
        }
    }

    Ok(Arc::new(Buffer::Heap(read_grown(file, path, size)?)))
}

/// Read the whole file through a buffer that starts at 64 KiB and grows
/// by 1.5 until everything fits.
fn read_grown(mut file: File, path: &Path, size_hint: u64) -> Result<Vec<u8>> {
    let mut capacity = if size_hint > 0 {
        size_hint as usize
    } else {
        READ_INITIAL_SIZE
    };
    let mut buf = vec![0u8; capacity];
    let mut filled = 0;

    loop {
        if filled == capacity {
            capacity = (capacity as f64 * READ_GROWTH_FACTOR) as usize + 1;
            buf.resize(capacity, 0);
        }
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(MboxckError::io(path, e)),
        }
    }

    buf.truncate(filled);
    debug!(path = %path.display(), bytes = filled, "read mailbox");
    Ok(buf)
}
