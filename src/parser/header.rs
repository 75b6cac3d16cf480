//! RFC-822 header parsing: key/value extraction with folding, and the
//! small slice of MIME needed for end-of-message heuristics.

use crate::model::header::{Header, HeaderList};
use crate::parser::cursor::Cursor;
use crate::report::Reporter;

/// Parse one header starting at the cursor.
///
/// Fails (cursor rewound to the line start) when the line turns out to be
/// a `From ` envelope, carries no colon, starts with an illegal byte, or
/// the input ends mid-header. A `>From ` line is accepted as a header
/// whose key is the literal `>From ` (space included, no colon).
pub fn take_header(cur: &mut Cursor, reporter: &mut Reporter) -> Option<Header> {
    let line_start = cur.position();

    match cur.peek() {
        None => return None,
        Some(ch) if ch <= b' ' || ch == b':' => {
            reporter.warn_at(
                cur,
                format!(
                    "Header starts with illegal character {:?} {{@{line_start}}}",
                    ch as char
                ),
            );
            return None;
        }
        Some(_) => {}
    }

    // Key: bytes up to the colon. A space inside the key is only legal
    // for the ">From " pseudo-header; "From " here means the header block
    // ended and a new message begins.
    let key_start = cur.position();
    let key = loop {
        match cur.take_char() {
            None => {
                cur.move_to(line_start);
                return None;
            }
            Some(b':') => {
                break cur.segment(key_start, cur.position() - 1).trimmed();
            }
            Some(b'\n') => {
                cur.move_to(line_start);
                reporter.warn_at(
                    cur,
                    format!("Header line without a colon {{@{line_start}}}"),
                );
                return None;
            }
            Some(b' ') => {
                let so_far = cur.segment(key_start, cur.position());
                if so_far.as_bytes() == b"From " {
                    cur.move_to(line_start);
                    reporter.warn_at(
                        cur,
                        format!("Encountered unexpected \"From \" line in headers {{@{line_start}}}"),
                    );
                    return None;
                }
                if so_far.as_bytes() == b">From " {
                    reporter.warn_at(
                        cur,
                        format!(
                            "Encountered unexpected \">From \" line in headers {{@{line_start}}}"
                        ),
                    );
                    break so_far;
                }
            }
            Some(_) => {}
        }
    };

    // Value: this line plus any continuation lines starting with space
    // or tab, concatenated raw and trimmed at the ends.
    cur.take_spaces();
    let value_start = cur.position();
    let mut value_end = cur.position();
    loop {
        match cur.take_until_newline() {
            Some(_) => {
                value_end = cur.position();
                cur.take_newline();
            }
            None => {
                cur.move_to(cur.len());
                value_end = cur.position();
                break;
            }
        }
        match cur.peek() {
            Some(b' ') | Some(b'\t') => continue,
            _ => break,
        }
    }
    let value = cur.segment(value_start, value_end).trimmed();
    let line = cur.segment(line_start, cur.position());

    Some(Header::new(key, value, Some(line)))
}

/// Parse headers until a blank line is consumed. A parse failure or EOF
/// ends the block early; the partial list is kept with a warning.
pub fn parse_headers(cur: &mut Cursor, tag: &str, reporter: &mut Reporter) -> HeaderList {
    let mut headers = HeaderList::new();

    loop {
        if cur.take_newline() {
            break;
        }
        if cur.at_end() {
            reporter.warn(format!("Message {tag}: Header parsing ended prematurely"));
            break;
        }
        match take_header(cur, reporter) {
            Some(h) => headers.push(h),
            None => {
                reporter.warn(format!("Message {tag}: Header parsing ended prematurely"));
                break;
            }
        }
    }

    headers
}

/// Extract a `key=value` parameter from a structured header value such as
/// `Content-Type: multipart/mixed; boundary="X"`. Quoted and bare values
/// are both handled; bare values end at the next `;`.
pub fn mime_parameter(value: &[u8], key: &[u8]) -> Option<Vec<u8>> {
    let mut at = 0;
    loop {
        let semi = at + value[at..].iter().position(|&b| b == b';')?;
        let mut i = semi + 1;
        while matches!(value.get(i), Some(b' ') | Some(b'\t')) {
            i += 1;
        }
        if value.len() - i >= key.len() && value[i..i + key.len()].eq_ignore_ascii_case(key) {
            i += key.len();
            while matches!(value.get(i), Some(b' ') | Some(b'\t')) {
                i += 1;
            }
            if value.get(i) == Some(&b'=') {
                i += 1;
                while matches!(value.get(i), Some(b' ') | Some(b'\t')) {
                    i += 1;
                }
                if value.get(i) == Some(&b'"') {
                    i += 1;
                    let end = i + value[i..].iter().position(|&b| b == b'"')?;
                    return Some(value[i..end].to_vec());
                }
                let end = value[i..]
                    .iter()
                    .position(|&b| b == b';')
                    .map_or(value.len(), |p| i + p);
                return Some(trim_ascii(&value[i..end]).to_vec());
            }
        }
        at = semi + 1;
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}
