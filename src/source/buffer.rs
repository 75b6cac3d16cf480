//! Backing buffers and provenance-tagged byte strings.
//!
//! A [`Buffer`] holds the raw bytes of one mailbox, either heap-allocated
//! or memory-mapped. A [`Segment`] is the string type used throughout the
//! crate: either a zero-copy view into a shared buffer, bytes synthesized
//! by a repair, or a static literal. The provenance stays distinguishable
//! so untouched sections can be re-emitted verbatim on write.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use memmap2::Mmap;

/// Immutable backing store for a mailbox's bytes.
pub enum Buffer {
    /// File contents read into memory.
    Heap(Vec<u8>),
    /// Read-only memory mapping of the file.
    Mapped(Mmap),
}

impl Buffer {
    pub fn is_mapped(&self) -> bool {
        matches!(self, Buffer::Mapped(_))
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Buffer::Heap(v) => v,
            Buffer::Mapped(m) => m,
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Buffer::Heap(v) => write!(f, "Buffer::Heap({} bytes)", v.len()),
            Buffer::Mapped(m) => write!(f, "Buffer::Mapped({} bytes)", m.len()),
        }
    }
}

/// Where a segment's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Zero-copy view into a heap-read buffer.
    SharedBorrowed,
    /// Zero-copy view into a memory mapping.
    OwnedMapped,
    /// Heap bytes created by a repair or synthesis.
    OwnedAllocated,
    /// Compile-time literal.
    StaticLiteral,
}

/// A byte string with provenance.
///
/// Equality and hashing operate on byte content only.
#[derive(Clone)]
pub enum Segment {
    /// `(start, len)` view into a heap-backed buffer.
    Borrow {
        base: Arc<Buffer>,
        start: usize,
        len: usize,
    },
    /// `(start, len)` view into a memory-mapped buffer.
    Mmap {
        base: Arc<Buffer>,
        start: usize,
        len: usize,
    },
    /// Bytes owned by this segment.
    Owned(Vec<u8>),
    /// Static literal bytes.
    Static(&'static [u8]),
}

impl Segment {
    /// Zero-copy view into `base`; picks the variant matching the buffer.
    pub fn view(base: &Arc<Buffer>, start: usize, end: usize) -> Segment {
        debug_assert!(start <= end && end <= base.len());
        let (start, len) = (start, end - start);
        if base.is_mapped() {
            Segment::Mmap {
                base: Arc::clone(base),
                start,
                len,
            }
        } else {
            Segment::Borrow {
                base: Arc::clone(base),
                start,
                len,
            }
        }
    }

    pub fn empty() -> Segment {
        Segment::Static(b"")
    }

    pub fn from_str(s: &str) -> Segment {
        Segment::Owned(s.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Segment::Borrow { base, start, len } | Segment::Mmap { base, start, len } => {
                &base[*start..*start + *len]
            }
            Segment::Owned(v) => v,
            Segment::Static(s) => s,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Segment::Borrow { len, .. } | Segment::Mmap { len, .. } => *len,
            Segment::Owned(v) => v.len(),
            Segment::Static(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn provenance(&self) -> Provenance {
        match self {
            Segment::Borrow { .. } => Provenance::SharedBorrowed,
            Segment::Mmap { .. } => Provenance::OwnedMapped,
            Segment::Owned(_) => Provenance::OwnedAllocated,
            Segment::Static(_) => Provenance::StaticLiteral,
        }
    }

    /// Sub-segment over `[from, to)`. Views stay zero-copy; owned and
    /// static bytes are re-sliced by copy and reference respectively.
    pub fn slice(&self, from: usize, to: usize) -> Segment {
        debug_assert!(from <= to && to <= self.len());
        match self {
            Segment::Borrow { base, start, .. } => Segment::Borrow {
                base: Arc::clone(base),
                start: start + from,
                len: to - from,
            },
            Segment::Mmap { base, start, .. } => Segment::Mmap {
                base: Arc::clone(base),
                start: start + from,
                len: to - from,
            },
            Segment::Owned(v) => Segment::Owned(v[from..to].to_vec()),
            Segment::Static(s) => Segment::Static(&s[from..to]),
        }
    }

    /// Shorten the segment in place to `new_len` bytes.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len >= self.len() {
            return;
        }
        match self {
            Segment::Borrow { len, .. } | Segment::Mmap { len, .. } => *len = new_len,
            Segment::Owned(v) => v.truncate(new_len),
            Segment::Static(s) => *s = &s[..new_len],
        }
    }

    /// Trim ASCII whitespace from both ends, keeping provenance.
    pub fn trimmed(&self) -> Segment {
        let bytes = self.as_bytes();
        let start = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(bytes.len());
        let end = bytes
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(start, |p| p + 1);
        self.slice(start, end)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Lossy UTF-8 rendering for messages shown to the user.
    pub fn display(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Parse the segment as a decimal integer, ignoring surrounding
    /// whitespace. Returns `None` on any other content.
    pub fn to_integer(&self) -> Option<i64> {
        let s = std::str::from_utf8(self.as_bytes()).ok()?;
        s.trim().parse().ok()
    }

    pub fn eq_ignore_ascii_case(&self, other: &[u8]) -> bool {
        self.as_bytes().eq_ignore_ascii_case(other)
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Segment {}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:?})", self.provenance(), self.display())
    }
}
