//! The mailbox: an exclusively-locked file and its parsed messages.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::CoreConfig;
use crate::error::Result;
use crate::model::message::Message;
use crate::parser::message::parse_mailbox;
use crate::report::Reporter;
use crate::source::buffer::Buffer;
use crate::source::{file, lock};

/// A mailbox and its messages, in file order.
///
/// Messages keep their parse-time numbers; deletion leaves a tombstone in
/// place and the writer skips it. The mailbox owns the underlying byte
/// buffer, which every message borrows through its segments.
#[derive(Debug)]
pub struct Mailbox {
    source: PathBuf,
    name: String,
    data: Option<Arc<Buffer>>,
    messages: Vec<Message>,
    numbered: usize,
    appended: bool,
    locked: bool,
}

impl Mailbox {
    /// Lock, read, and parse the mailbox at `path`.
    pub fn open(path: &Path, config: &CoreConfig, reporter: &mut Reporter) -> Result<Self> {
        Self::open_inner(path, config, reporter, false)
    }

    /// Like [`Mailbox::open`], but a missing file yields an empty
    /// mailbox instead of an error. Used by `save`.
    pub fn open_or_create(
        path: &Path,
        config: &CoreConfig,
        reporter: &mut Reporter,
    ) -> Result<Self> {
        Self::open_inner(path, config, reporter, true)
    }

    fn open_inner(
        path: &Path,
        config: &CoreConfig,
        reporter: &mut Reporter,
        create: bool,
    ) -> Result<Self> {
        if !config.dry_run {
            if reporter.is_verbose() {
                reporter.note(format!("Locking mailbox {}", path.display()));
            }
            lock::lock(path, config.lock_timeout, reporter)?;
        }

        if reporter.is_verbose() {
            reporter.note(format!("Opening mailbox {}", path.display()));
        }

        let data = match file::read_mailbox(path, config.use_mmap) {
            Ok(data) => Some(data),
            Err(crate::error::MboxckError::FileNotFound(_)) if create => None,
            Err(e) => {
                if !config.dry_run {
                    lock::unlock(path);
                }
                return Err(e);
            }
        };

        let mut mbox = Self {
            source: path.to_path_buf(),
            name: mailbox_name(path),
            data: data.clone(),
            messages: Vec::new(),
            numbered: 0,
            appended: false,
            locked: !config.dry_run,
        };

        if let Some(data) = &data {
            mbox.messages = parse_mailbox(data, config.strict, reporter);
            mbox.numbered = mbox.messages.len();
        }

        Ok(mbox)
    }

    /// Parse an in-memory mailbox. No file, no lock. Used by tests and
    /// internal re-parses.
    pub fn from_bytes(name: &str, bytes: Vec<u8>, strict: bool, reporter: &mut Reporter) -> Self {
        let data = Arc::new(Buffer::Heap(bytes));
        let messages = parse_mailbox(&data, strict, reporter);
        let numbered = messages.len();
        Self {
            source: PathBuf::from(name),
            name: name.to_string(),
            data: Some(data),
            messages,
            numbered,
            appended: false,
            locked: false,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> Option<&Arc<Buffer>> {
        self.data.as_ref()
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    /// Message by 1-based position in the mailbox.
    pub fn message(&self, num: usize) -> Option<&Message> {
        (num >= 1).then(|| self.messages.get(num - 1)).flatten()
    }

    pub fn message_mut(&mut self, num: usize) -> Option<&mut Message> {
        (num >= 1)
            .then(move || self.messages.get_mut(num - 1))
            .flatten()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut [Message] {
        &mut self.messages
    }

    /// Append a message (renumbered to the next free number).
    pub fn append(&mut self, mut msg: Message) {
        self.numbered += 1;
        msg.set_number(self.numbered);
        msg.mark_dirty();
        self.messages.push(msg);
        self.appended = true;
    }

    /// Splice a message in after 1-based position `pos`.
    pub fn insert_after(&mut self, pos: usize, msg: Message) {
        debug_assert!(pos >= 1 && pos <= self.messages.len());
        self.messages.insert(pos, msg);
    }

    /// Hand out the next message number (for splits).
    pub fn next_number(&mut self) -> usize {
        self.numbered += 1;
        self.numbered
    }

    /// Dirty when any message is dirty, or messages were appended.
    pub fn is_dirty(&self) -> bool {
        self.appended || self.messages.iter().any(Message::is_dirty)
    }

    pub fn clear_dirty(&mut self) {
        self.appended = false;
        for msg in &mut self.messages {
            msg.clear_dirty();
        }
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        if self.locked {
            lock::unlock(&self.source);
        }
    }
}

fn mailbox_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: &[u8] = b"\
From a@b Thu Jan 04 10:00:00 2024\nSubject: x\n\nbody\n";

    #[test]
    fn test_from_bytes_and_lookup() {
        let mut rep = Reporter::silent();
        let mbox = Mailbox::from_bytes("test", ONE.to_vec(), false, &mut rep);
        assert_eq!(mbox.count(), 1);
        assert!(mbox.message(1).is_some());
        assert!(mbox.message(0).is_none());
        assert!(mbox.message(2).is_none());
        assert!(!mbox.is_dirty());
    }

    #[test]
    fn test_dirty_propagates_from_message() {
        let mut rep = Reporter::silent();
        let mut mbox = Mailbox::from_bytes("test", ONE.to_vec(), false, &mut rep);
        mbox.message_mut(1).unwrap().set_deleted(true);
        assert!(mbox.is_dirty());
        mbox.clear_dirty();
        assert!(!mbox.is_dirty());
        assert!(mbox.message(1).unwrap().is_deleted());
    }

    #[test]
    fn test_append_renumbers() {
        let mut rep = Reporter::silent();
        let mut mbox = Mailbox::from_bytes("test", ONE.to_vec(), false, &mut rep);
        let clone = mbox.message(1).unwrap().clone();
        mbox.append(clone);
        assert_eq!(mbox.count(), 2);
        assert_eq!(mbox.message(2).unwrap().number(), 2);
        assert!(mbox.is_dirty());
    }

    #[test]
    fn test_open_missing_file_errors_and_unlocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let mut rep = Reporter::silent();
        let config = CoreConfig::default();
        let err = Mailbox::open(&path, &config, &mut rep).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::exit::NOINPUT);
        assert!(!dir.path().join("absent.lock").exists());
    }
}
