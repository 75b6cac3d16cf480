//! The mbox envelope: `From <sender> <ctime>` lines.
//!
//! The ctime parser is deliberately loose, since real mail systems leave
//! out the seconds field and put timezones on either side of the year:
//! `Www Mmm DD HH:MM[:SS] [ZONE ]YYYY[ ZONE]`.

use chrono::NaiveDateTime;

use crate::parser::cursor::Cursor;
use crate::source::buffer::Segment;

pub const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
pub const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Broken-down envelope timestamp, kept exactly as parsed so the line can
/// be re-rendered without drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeDate {
    pub weekday: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub year: u16,
}

impl EnvelopeDate {
    /// Render in ctime form: `Thu Jan 01 00:00:00 2024`.
    pub fn ctime(&self) -> String {
        format!(
            "{} {} {:02} {:02}:{:02}:{:02} {:4}",
            WEEKDAYS[self.weekday as usize % 7],
            MONTHS[self.month as usize % 12],
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.year
        )
    }

    /// Render in RFC-822 form: `Thu, 1 Jan 2024 00:00:00 +0000`.
    pub fn rfc2822(&self) -> String {
        format!(
            "{}, {:>2} {} {:4} {:02}:{:02}:{:02} +0000",
            WEEKDAYS[self.weekday as usize % 7],
            self.day,
            MONTHS[self.month as usize % 12],
            self.year,
            self.hour,
            self.minute,
            self.second
        )
    }

    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        chrono::NaiveDate::from_ymd_opt(self.year as i32, self.month as u32 + 1, self.day as u32)?
            .and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32)
    }
}

/// A validated envelope line.
#[derive(Debug, Clone)]
pub struct FromLine {
    /// The verbatim line, trailing newline included.
    pub line: Segment,
    /// Envelope sender token. May be empty.
    pub sender: Segment,
    pub date: EnvelopeDate,
}

/// Consume a full `From <sender> <ctime>\n` line. Trailing garbage after
/// the timestamp (`remote from foo` and friends) is skipped. On failure
/// the cursor rewinds fully.
pub fn take_from_line(cur: &mut Cursor) -> Option<FromLine> {
    let start = cur.position();

    if !cur.take_literal(b"From ", false) {
        return None;
    }

    let sender = match take_token_to_space(cur) {
        Some(s) => s,
        None => {
            cur.move_to(start);
            return None;
        }
    };

    // There shouldn't be more than one space, but just in case.
    cur.take_spaces();

    let date = match take_ctime(cur) {
        Some(d) => d,
        None => {
            cur.move_to(start);
            return None;
        }
    };

    cur.take_until_newline();
    if !cur.take_newline() {
        cur.move_to(start);
        return None;
    }

    Some(FromLine {
        line: cur.segment(start, cur.position()),
        sender,
        date,
    })
}

/// Would a full envelope line parse at this position?
pub fn peek_from_line(cur: &Cursor) -> bool {
    let mut probe = cur.clone();
    take_from_line(&mut probe).is_some()
}

/// Seek to the next `From ` occurrence that is preceded by `newlines`
/// newlines and lies past the starting position. On success the cursor
/// rests before those newlines; on failure it does not move.
pub fn seek_from_line(cur: &mut Cursor, newlines: usize) -> bool {
    let saved = cur.position();

    while cur.take_until(b"From ", false).is_some() {
        let found = cur.position();
        let mut backed = 0;
        while backed < newlines && cur.back_over_newline() {
            backed += 1;
        }
        if backed == newlines && cur.position() > saved {
            return true;
        }
        cur.move_to(found + b"From ".len());
    }

    cur.move_to(saved);
    false
}

/// Consume the loose ctime format. On failure the cursor rewinds.
pub fn take_ctime(cur: &mut Cursor) -> Option<EnvelopeDate> {
    let start = cur.position();
    match ctime_fields(cur) {
        Some(date) => Some(date),
        None => {
            cur.move_to(start);
            None
        }
    }
}

fn ctime_fields(cur: &mut Cursor) -> Option<EnvelopeDate> {
    let weekday = take_keyword(cur, &WEEKDAYS)? as u8;
    if !cur.take_literal(b" ", false) {
        return None;
    }
    let month = take_keyword(cur, &MONTHS)? as u8;
    if !cur.take_literal(b" ", false) {
        return None;
    }
    let day = take_two_digits(cur)?;
    if !cur.take_literal(b" ", false) {
        return None;
    }
    let hour = take_two_digits(cur)?;
    if !cur.take_literal(b":", false) {
        return None;
    }
    let minute = take_two_digits(cur)?;
    let second = if cur.take_literal(b":", false) {
        take_two_digits(cur)?
    } else {
        0
    };
    if !cur.take_literal(b" ", false) {
        return None;
    }

    // Timezone before the year, named or signed-numeric.
    let mut got_zone = false;
    if matches!(cur.peek(), Some(c) if c.is_ascii_alphabetic() || c == b'+' || c == b'-') {
        take_token_to_space(cur)?;
        if !cur.take_literal(b" ", false) {
            return None;
        }
        got_zone = true;
    }

    let y1 = take_two_digits(cur)? as u16;
    let y2 = take_two_digits(cur)? as u16;
    let year = y1 * 100 + y2;

    // Timezone after the year. Stays within the line.
    if !got_zone {
        let mark = cur.position();
        if cur.take_literal(b" ", false)
            && matches!(cur.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'+' || c == b'-')
        {
            while matches!(cur.peek(), Some(c) if c != b' ' && c != b'\n' && c != b'\r') {
                cur.advance(1);
            }
        } else {
            cur.move_to(mark);
        }
    }

    Some(EnvelopeDate {
        weekday,
        month,
        day,
        hour,
        minute,
        second,
        year,
    })
}

/// Match one of `words` exactly (case-sensitive), returning its index.
fn take_keyword(cur: &mut Cursor, words: &[&str]) -> Option<usize> {
    words
        .iter()
        .position(|w| cur.take_literal(w.as_bytes(), false))
}

/// Two digits; a leading space counts as zero (` 1` is day one).
fn take_two_digits(cur: &mut Cursor) -> Option<u8> {
    let start = cur.position();
    let c1 = match cur.take_char()? {
        b' ' => b'0',
        c => c,
    };
    let c2 = cur.take_char().unwrap_or(0);
    if c1.is_ascii_digit() && c2.is_ascii_digit() {
        Some((c1 - b'0') * 10 + (c2 - b'0'))
    } else {
        cur.move_to(start);
        None
    }
}

/// Bytes up to the next space on this line. Empty when already at a
/// space; fails (cursor unmoved) when the line or input ends first.
fn take_token_to_space(cur: &mut Cursor) -> Option<Segment> {
    let start = cur.position();
    loop {
        match cur.peek() {
            Some(b' ') => return Some(cur.segment(start, cur.position())),
            Some(b'\n') | Some(b'\r') | None => {
                cur.move_to(start);
                return None;
            }
            Some(_) => {
                cur.advance(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(bytes: &[u8]) -> Cursor {
        Cursor::over(bytes.to_vec())
    }

    #[test]
    fn test_ctime_with_seconds() {
        let mut cur = cursor(b"Tue Apr  1 12:34:56 2008\n");
        let d = take_ctime(&mut cur).unwrap();
        assert_eq!(d.weekday, 2);
        assert_eq!(d.month, 3);
        assert_eq!(d.day, 1);
        assert_eq!(d.second, 56);
        assert_eq!(d.year, 2008);
    }

    #[test]
    fn test_ctime_without_seconds_with_zone() {
        let mut cur = cursor(b"Wed May 15 11:37 PDT 1996\n");
        let d = take_ctime(&mut cur).unwrap();
        assert_eq!(d.second, 0);
        assert_eq!(d.year, 1996);
        assert_eq!(cur.peek(), Some(b'\n'));
    }

    #[test]
    fn test_ctime_zone_after_year() {
        let mut cur = cursor(b"Wed May 15 11:37:00 1996 +0200\n");
        let d = take_ctime(&mut cur).unwrap();
        assert_eq!(d.year, 1996);
        assert_eq!(cur.peek(), Some(b'\n'));
    }

    #[test]
    fn test_ctime_rejects_bad_month() {
        let mut cur = cursor(b"Wed Mai 15 11:37:00 1996\n");
        assert!(take_ctime(&mut cur).is_none());
        assert_eq!(cur.position(), 0);
    }

    #[test]
    fn test_from_line_basic() {
        let mut cur = cursor(b"From user@example.com Thu Jan 01 00:00:00 2024\nX");
        let fl = take_from_line(&mut cur).unwrap();
        assert_eq!(fl.sender.as_bytes(), b"user@example.com");
        assert_eq!(fl.date.year, 2024);
        assert!(fl.line.as_bytes().ends_with(b"2024\n"));
        assert_eq!(cur.peek(), Some(b'X'));
    }

    #[test]
    fn test_from_line_trailing_garbage() {
        let mut cur = cursor(b"From uucp Thu Jan 01 00:00:00 2024 remote from foobar\n");
        let fl = take_from_line(&mut cur).unwrap();
        assert_eq!(fl.sender.as_bytes(), b"uucp");
        assert!(cur.at_end());
    }

    #[test]
    fn test_from_line_empty_sender() {
        let mut cur = cursor(b"From  Thu Jan 01 00:00:00 2024\n");
        let fl = take_from_line(&mut cur).unwrap();
        assert!(fl.sender.is_empty());
    }

    #[test]
    fn test_from_line_rejects_header() {
        let mut cur = cursor(b"From: someone <a@b>\n");
        assert!(take_from_line(&mut cur).is_none());
        assert_eq!(cur.position(), 0);
    }

    #[test]
    fn test_from_line_requires_newline() {
        let mut cur = cursor(b"From a@b Thu Jan 01 00:00:00 2024");
        assert!(take_from_line(&mut cur).is_none());
        assert_eq!(cur.position(), 0);
    }

    #[test]
    fn test_seek_from_line() {
        let data = b"body line\nmore body\n\nFrom a@b Thu Jan 01 00:00:00 2024\n";
        let mut cur = cursor(data);
        assert!(seek_from_line(&mut cur, 2));
        assert_eq!(cur.position(), 19);
        assert!(cur.take_newline() && cur.take_newline());
        assert!(peek_from_line(&cur));
    }

    #[test]
    fn test_seek_from_line_skips_unpreceded() {
        let data = b"quoting: From a@b\n\nFrom b@c Thu Jan 01 00:00:00 2024\n";
        let mut cur = cursor(data);
        assert!(seek_from_line(&mut cur, 1));
        // Lands before the newline that precedes the second "From ".
        assert_eq!(cur.position(), 18);
    }

    #[test]
    fn test_renderings() {
        let d = EnvelopeDate {
            weekday: 4,
            month: 0,
            day: 1,
            hour: 0,
            minute: 7,
            second: 9,
            year: 2024,
        };
        assert_eq!(d.ctime(), "Thu Jan 01 00:07:09 2024");
        assert_eq!(d.rfc2822(), "Thu,  1 Jan 2024 00:07:09 +0000");
        assert!(d.to_naive().is_some());
    }
}
