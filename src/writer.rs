//! Serializing a mailbox back to disk.
//!
//! Untouched messages re-emit their verbatim envelope and header bytes;
//! dirty data is reconstructed from the model. The file itself is
//! replaced atomically: write a sibling temp file, optionally rename the
//! original to `<path>~`, then rename the temp into place.

use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

use crate::config::CoreConfig;
use crate::error::{MboxckError, Result};
use crate::model::mailbox::Mailbox;
use crate::model::message::Message;
use crate::report::Reporter;
use crate::source::buffer::Segment;

/// Serialize one message in mboxo framing (no body quoting).
pub fn write_message<W: Write>(out: &mut W, msg: &Message) -> io::Result<()> {
    if let Some(envelope) = msg.envelope_line() {
        out.write_all(envelope.as_bytes())?;
    } else if let (Some(sender), Some(date)) = (msg.envelope_sender(), msg.envelope_date()) {
        out.write_all(b"From ")?;
        out.write_all(sender.as_bytes())?;
        out.write_all(b" ")?;
        out.write_all(date.ctime().as_bytes())?;
        out.write_all(b"\n")?;
    }

    for header in msg.headers().iter() {
        match header.original_line() {
            Some(line) => out.write_all(line.as_bytes())?,
            None => {
                out.write_all(header.key().as_bytes())?;
                if header.key().as_bytes() != b">From " {
                    out.write_all(b": ")?;
                }
                out.write_all(header.value().as_bytes())?;
                out.write_all(b"\n")?;
            }
        }
    }

    out.write_all(b"\n")?;
    out.write_all(msg.body().as_bytes())
}

/// Serialize every surviving message, separated by single blank lines.
/// With `sanitize`, IMAP bookkeeping headers are migrated first.
pub fn write_mailbox_to<W: Write>(out: &mut W, mbox: &mut Mailbox, sanitize: bool) -> io::Result<()> {
    if sanitize {
        sanitize_imap_headers(mbox);
    }

    for msg in mbox.messages() {
        if !msg.is_deleted() {
            write_message(out, msg)?;
            out.write_all(b"\n")?;
        }
    }

    Ok(())
}

/// Write the mailbox to `dest` with temp-file-and-rename. Honors backup
/// and dry-run settings.
pub fn write_mailbox(
    mbox: &mut Mailbox,
    dest: &Path,
    config: &CoreConfig,
    reporter: &mut Reporter,
) -> Result<()> {
    if reporter.is_verbose() {
        if mbox.source() == dest {
            reporter.note(format!("Saving mailbox {}", mbox.name()));
        } else {
            reporter.note(format!(
                "Saving mailbox {} to {}",
                mbox.name(),
                dest.display()
            ));
        }
    }

    if config.dry_run {
        reporter.note(format!(
            "Dry run -- leaving {} untouched",
            dest.display()
        ));
        return Ok(());
    }

    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let stem = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mbox".to_string());

    let mut temp = tempfile::Builder::new()
        .prefix(&format!("{stem}-"))
        .tempfile_in(dir)
        .map_err(|e| MboxckError::io(dest, e))?;

    write_mailbox_to(temp.as_file_mut(), mbox, true).map_err(|e| MboxckError::io(dest, e))?;
    temp.as_file_mut()
        .sync_all()
        .map_err(|e| MboxckError::io(dest, e))?;

    if config.backup && dest.exists() {
        let mut backup = dest.as_os_str().to_os_string();
        backup.push("~");
        std::fs::rename(dest, &backup).map_err(|e| MboxckError::Replace {
            from: dest.to_path_buf(),
            to: backup.clone().into(),
            source: e,
        })?;
    }

    let temp_path = temp.path().to_path_buf();
    temp.persist(dest).map_err(|e| MboxckError::Replace {
        from: temp_path,
        to: dest.to_path_buf(),
        source: e.error,
    })?;

    debug!(dest = %dest.display(), "mailbox written");
    mbox.clear_dirty();
    Ok(())
}

/// Save the mailbox over its own source, unless nothing changed.
/// Returns true when a write happened.
pub fn save_mailbox(
    mbox: &mut Mailbox,
    force: bool,
    config: &CoreConfig,
    reporter: &mut Reporter,
) -> Result<bool> {
    if !mbox.is_dirty() && !force {
        reporter.note(format!("Leaving mailbox {} unchanged", mbox.name()));
        return Ok(false);
    }
    let dest = mbox.source().to_path_buf();
    write_mailbox(mbox, &dest, config, reporter)?;
    Ok(!config.dry_run)
}

/// Dovecot and c-client keep IMAP state in an `X-IMAP`/`X-IMAPbase`
/// header that must live on the first message. When the holder is not
/// the first surviving message, the value moves to `X-IMAPbase` there
/// and both spellings are dropped from the old holder.
fn sanitize_imap_headers(mbox: &mut Mailbox) {
    let first = mbox
        .messages()
        .iter()
        .position(|m| !m.is_deleted())
        .map(|i| i + 1);

    let holder = mbox
        .messages()
        .iter()
        .position(|m| m.header("X-IMAPbase").is_some() || m.header("X-IMAP").is_some())
        .map(|i| i + 1);

    let (Some(first), Some(holder)) = (first, holder) else {
        return;
    };
    if first == holder {
        return;
    }

    let value = {
        let h = mbox.message(holder).unwrap();
        h.header("X-IMAPbase")
            .or_else(|| h.header("X-IMAP"))
            .cloned()
            .unwrap()
    };

    mbox.message_mut(first)
        .unwrap()
        .set_header("X-IMAPbase", value);
    let old = mbox.message_mut(holder).unwrap();
    old.delete_header("X-IMAP", false);
    old.delete_header("X-IMAPbase", false);
}
