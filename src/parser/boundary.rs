//! The message-boundary engine: where does a body end?
//!
//! Strategies are tried in a fixed order and the first valid end wins.
//! A valid end is EOF, or a byte beginning a valid `From ` envelope line
//! preceded by a newline:
//!
//! A. Respect a declared `Content-Length`, with a one-byte fuzz for
//!    lengths that miscount the trailing newline.
//! B. Detect the Dovecot "From "-space corruption: spurious headers
//!    injected into the body make the declared length look short.
//! C. For multipart messages, stop after the closing MIME boundary.
//! D. Scan for the earliest valid `From ` line preceded by a newline.
//! E. End of file, minus one trailing newline.

use crate::model::header::HeaderList;
use crate::model::message::DovecotBug;
use crate::parser::cursor::Cursor;
use crate::parser::envelope;
use crate::parser::header::mime_parameter;
use crate::report::Reporter;
use crate::source::buffer::Segment;

/// Artifact patterns to try, most specific first. Dovecot always writes
/// X-UID with the other artifacts varying by version and mailbox state.
const DOVECOT_PATTERNS: [DovecotBug; 8] = [
    DovecotBug::X_UID_KEYS
        .union(DovecotBug::CONTENT_LENGTH)
        .union(DovecotBug::STATUS),
    DovecotBug::X_UID_KEYS.union(DovecotBug::CONTENT_LENGTH),
    DovecotBug::X_UID_KEYS.union(DovecotBug::STATUS),
    DovecotBug::X_UID_KEYS,
    DovecotBug::X_UID_KEYS
        .union(DovecotBug::CONTENT_LENGTH)
        .union(DovecotBug::STATUS)
        .union(DovecotBug::NEWLINE),
    DovecotBug::X_UID_KEYS
        .union(DovecotBug::CONTENT_LENGTH)
        .union(DovecotBug::NEWLINE),
    DovecotBug::X_UID_KEYS
        .union(DovecotBug::STATUS)
        .union(DovecotBug::NEWLINE),
    DovecotBug::X_UID_KEYS.union(DovecotBug::NEWLINE),
];

/// Advance the cursor from the start of a body to its end, returning the
/// Dovecot mask when strategy B confirmed the corruption.
pub fn find_body_end(
    cur: &mut Cursor,
    headers: &HeaderList,
    tag: &str,
    strict: bool,
    reporter: &mut Reporter,
) -> DovecotBug {
    let body_pos = cur.position();
    let declared = headers
        .get("Content-Length")
        .and_then(Segment::to_integer)
        .filter(|&n| n >= 0);

    // Strategy A: declared Content-Length.
    if let Some(cllen) = declared {
        let cllen = cllen as usize;
        if body_pos + cllen <= cur.len() {
            cur.move_to(body_pos + cllen);
            let mut end = cur.position();

            // Fuzz: a length that counted the separator newline lands
            // directly on the next "From". Only applies when a newline
            // really precedes; Content-Length plus trailing newline is
            // authoritative otherwise.
            if cur.peek() == Some(b'F') && end > body_pos && cur.data()[end - 1] == b'\n' {
                end -= 1;
                cur.move_to(end);
            }

            let accepted = cur.at_end()
                || (cur.take_newline() && (cur.at_end() || envelope::peek_from_line(cur)));
            if accepted {
                cur.move_to(end);
                return DovecotBug::empty();
            }

            // Strategy B: Dovecot "From "-space bug.
            cur.move_to(body_pos + cllen);
            if let Some(bug) = dovecot_workaround(cur, cllen) {
                return bug;
            }
        }
    }

    // Strategy C: closing MIME boundary.
    if let Some(ct) = headers.get("Content-Type") {
        let ct = ct.as_bytes();
        if ct.len() >= 9 && ct[..9].eq_ignore_ascii_case(b"multipart") {
            if let Some(boundary) = mime_parameter(ct, b"boundary") {
                let mut closing = Vec::with_capacity(boundary.len() + 4);
                closing.extend_from_slice(b"--");
                closing.extend_from_slice(&boundary);
                closing.extend_from_slice(b"--");

                cur.move_to(body_pos);
                if cur.take_until(&closing, false).is_some()
                    && cur.advance(-1)
                    && cur.take_newline()
                    && cur.take_literal(&closing, false)
                    && cur.take_newline()
                {
                    return DovecotBug::empty();
                }
            }
        }
    }

    // Strategy D: earliest valid From line preceded by a newline. The
    // first body line gets a chance too; the newline ending the headers
    // serves double duty there.
    cur.move_to(body_pos);
    let mut candidate = cur.position();
    let mut found = None;
    loop {
        if envelope::peek_from_line(cur) {
            found = Some(candidate);
            break;
        }
        if !envelope::seek_from_line(cur, 1) {
            break;
        }
        candidate = cur.position();
        cur.take_newline();
    }
    if let Some(end) = found {
        cur.move_to(end);
        if let Some(cl) = declared {
            let body_len = (end - body_pos) as i64;
            if cl != body_len {
                warn_content_length(tag, cl, body_len, strict, reporter);
            }
        }
        return DovecotBug::empty();
    }

    // Strategy E: end of file minus one trailing newline.
    cur.move_to(cur.len());
    if cur.position() > body_pos {
        cur.advance(-1);
        if !matches!(cur.peek(), Some(b'\n') | Some(b'\r')) {
            cur.advance(1);
        }
    }
    DovecotBug::empty()
}

/// The parse-time half of strategy B. The cursor sits at the declared
/// (failed) endpoint; on success it is left at the corrected end and the
/// confirmed pattern is returned, otherwise it is restored.
fn dovecot_workaround(cur: &mut Cursor, cllen: usize) -> Option<DovecotBug> {
    let declared_end = cur.position();

    for &bug in &DOVECOT_PATTERNS {
        cur.move_to(declared_end - cllen);
        let (extra, hits) = scan_artifacts(cur, declared_end, bug, None);
        // Every bit of the pattern must have matched something, so the
        // recorded mask describes exactly what was injected.
        if extra == 0 || hits != bug || !cur.move_to(declared_end + extra) {
            continue;
        }

        // Same fuzz as strategy A: maybe we landed exactly on the next
        // "From " (or at EOF) and the newline sits one byte back.
        if matches!(cur.peek(), Some(b'F') | None) {
            let pos = cur.position();
            if pos > 0 && cur.data()[pos - 1] == b'\n' {
                cur.move_to(pos - 1);
            }
        }

        // One or two newlines; Dovecot may have added one of its own.
        let mut end = cur.position();
        if !cur.take_newline() {
            continue;
        }
        if cur.take_newline() {
            end = cur.position() - 1;
        }

        if cur.at_end() || envelope::peek_from_line(cur) {
            cur.move_to(end);
            return Some(bug);
        }
    }

    cur.move_to(declared_end);
    None
}

/// Walk a body counting the bytes of injected artifacts matching `bug`.
///
/// Artifacts begin after any line that parses as a full `From ` envelope
/// (the user's own text, which stays in the body): headers drawn from
/// Content-Length/X-UID/X-Keywords/Status per the mask, plus one blank
/// line when the mask says so. With `parts`, the segments *between*
/// artifacts are collected, which is exactly the repaired body.
fn scan_artifacts(
    cur: &mut Cursor,
    end_pos: usize,
    bug: DovecotBug,
    mut parts: Option<&mut Vec<Segment>>,
) -> (usize, DovecotBug) {
    let mut extra = 0;
    let mut hits = DovecotBug::empty();
    let mut part_start = cur.position();

    loop {
        if envelope::take_from_line(cur).is_none() {
            if cur.take_until_newline().is_none() || cur.position() >= end_pos {
                break;
            }
            cur.take_newline();
            continue;
        }

        while !cur.at_end() {
            let pos = cur.position();

            if cur.take_newline() {
                if bug.contains(DovecotBug::NEWLINE) {
                    extra += cur.position() - pos;
                    hits |= DovecotBug::NEWLINE;
                    if let Some(parts) = parts.as_deref_mut() {
                        parts.push(cur.segment(part_start, pos));
                        part_start = cur.position();
                    }
                }
                // The newline ending the artifacts may also be the one
                // preceding the next "From " line, so rescan from it.
                cur.move_to(pos);
                break;
            }

            let matched = if bug.contains(DovecotBug::CONTENT_LENGTH)
                && cur.take_literal(b"Content-Length", true)
            {
                Some(DovecotBug::CONTENT_LENGTH)
            } else if bug.contains(DovecotBug::X_UID_KEYS)
                && (cur.take_literal(b"X-UID", true) || cur.take_literal(b"X-Keywords", true))
            {
                Some(DovecotBug::X_UID_KEYS)
            } else if bug.contains(DovecotBug::STATUS) && cur.take_literal(b"Status", true) {
                Some(DovecotBug::STATUS)
            } else {
                None
            };

            match matched {
                Some(bit) if cur.take_literal(b":", false) => {
                    cur.take_line();
                    extra += cur.position() - pos;
                    hits |= bit;
                    if let Some(parts) = parts.as_deref_mut() {
                        parts.push(cur.segment(part_start, pos));
                        part_start = cur.position();
                    }
                }
                _ => {
                    cur.take_line();
                }
            }
        }
    }

    if let Some(parts) = parts {
        cur.move_to(cur.len());
        parts.push(cur.segment(part_start, cur.len()));
    }

    (extra, hits)
}

/// Rebuild a corrupted body with the injected artifacts elided.
pub fn strip_artifacts(body: &Segment, bug: DovecotBug) -> Vec<u8> {
    let mut cur = Cursor::over(body.to_vec());
    let end = cur.len();
    let mut parts = Vec::new();
    let _ = scan_artifacts(&mut cur, end, bug, Some(&mut parts));

    let mut out = Vec::with_capacity(body.len());
    for part in &parts {
        out.extend_from_slice(part.as_bytes());
    }
    out
}

/// Quantify a Content-Length mismatch. Off-by-one is only worth a
/// warning in strict mode.
pub fn warn_content_length(
    tag: &str,
    declared: i64,
    actual: i64,
    strict: bool,
    reporter: &mut Reporter,
) {
    let delta = (declared - actual).abs();
    if delta > 1 && declared > actual {
        reporter.warn(format!(
            "Message {tag}: Truncated, {} bytes missing",
            declared - actual
        ));
    } else if delta > 1 {
        reporter.warn(format!(
            "Message {tag}: Oversized, {} bytes too many",
            actual - declared
        ));
    } else if strict {
        reporter.warn(format!(
            "Message {tag}: Incorrect Content-Length: {declared}; using {actual}"
        ));
    }
}
