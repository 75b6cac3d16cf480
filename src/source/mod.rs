//! Byte source: buffers, provenance-tagged segments, file reading,
//! mailbox locking, and signal handling.

pub mod buffer;
pub mod file;
pub mod lock;
pub mod signals;
