//! Driving the parse: one message, then a whole mailbox.

use std::sync::Arc;

use tracing::debug;

use crate::model::message::Message;
use crate::parser::boundary::find_body_end;
use crate::parser::cursor::Cursor;
use crate::parser::envelope::take_from_line;
use crate::parser::header::parse_headers;
use crate::report::Reporter;
use crate::source::buffer::Buffer;

/// Parse one message at the cursor. Returns `None` at end of input.
pub fn parse_message(
    cur: &mut Cursor,
    number: usize,
    strict: bool,
    reporter: &mut Reporter,
) -> Option<Message> {
    // Stray blank lines between messages should not be here, but are.
    if cur.take_newline() {
        reporter.warn(format!(
            "Unexpected newline(s) after message {}",
            number.saturating_sub(1)
        ));
        while cur.take_newline() {}
    }

    if cur.at_end() {
        return None;
    }

    let offset = cur.position();
    let tag = format!("#{number} {{@{offset}}}");

    let (envelope_line, envelope_sender, envelope_date) = match take_from_line(cur) {
        Some(fl) => {
            if fl.sender.is_empty() {
                reporter.warn(format!("Empty envelope sender for message {tag}"));
            }
            (Some(fl.line), Some(fl.sender), Some(fl.date))
        }
        None => {
            reporter.warn_at(
                cur,
                format!("Could not find a valid \"From \" line for message {tag}"),
            );
            (None, None, None)
        }
    };

    let headers = parse_headers(cur, &tag, reporter);

    let body_start = cur.position();
    let dovecot_bug = find_body_end(cur, &headers, &tag, strict, reporter);
    let body = cur.segment(body_start, cur.position());
    let raw = cur.segment(offset, cur.position());

    Some(Message::new(
        number,
        offset,
        raw,
        envelope_line,
        envelope_sender,
        envelope_date,
        headers,
        body,
        dovecot_bug,
    ))
}

/// Parse a whole mailbox buffer into messages in file order.
pub fn parse_mailbox(data: &Arc<Buffer>, strict: bool, reporter: &mut Reporter) -> Vec<Message> {
    let mut cur = Cursor::new(Arc::clone(data));
    let mut messages = Vec::new();

    while let Some(msg) = parse_message(&mut cur, messages.len() + 1, strict, reporter) {
        messages.push(msg);
        cur.take_newline();
    }

    if !cur.at_end() {
        reporter.warn_at(
            &cur,
            format!(
                "Unparsable garbage at end of mailbox (@{}): {:?}",
                cur.position(),
                cur.rest().display().chars().take(72).collect::<String>()
            ),
        );
    }

    debug!(count = messages.len(), "parsed mailbox");
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> (Vec<Message>, Reporter) {
        let data = Arc::new(Buffer::Heap(bytes.to_vec()));
        let mut rep = Reporter::silent();
        let msgs = parse_mailbox(&data, false, &mut rep);
        (msgs, rep)
    }

    const TWO: &[u8] = b"\
From alice@example.com Thu Jan 04 10:00:00 2024\n\
From: Alice <alice@example.com>\n\
Subject: Hello\n\
Content-Length: 11\n\
\n\
first body\n\
\n\
From bob@example.com Fri Jan 05 11:30:00 2024\n\
Subject: Re: Hello\n\
\n\
second body\n";

    #[test]
    fn test_parse_two_messages() {
        let (msgs, rep) = parse(TWO);
        assert_eq!(msgs.len(), 2);
        assert_eq!(rep.warning_count(), 0);

        let first = &msgs[0];
        assert_eq!(first.number(), 1);
        assert_eq!(first.tag(), "#1 {@0}");
        assert_eq!(
            first.envelope_sender().unwrap().as_bytes(),
            b"alice@example.com"
        );
        assert_eq!(first.header("subject").unwrap().as_bytes(), b"Hello");
        assert_eq!(first.body().as_bytes(), b"first body\n");

        let second = &msgs[1];
        assert_eq!(second.number(), 2);
        assert_eq!(second.body().as_bytes(), b"second body");
        assert!(!second.is_dirty());
    }

    #[test]
    fn test_raw_covers_extent() {
        let (msgs, _) = parse(TWO);
        let second_start = msgs[1].raw().as_bytes();
        assert!(second_start.starts_with(b"From bob@"));
        assert!(msgs[0].raw().as_bytes().starts_with(b"From alice@"));
    }

    #[test]
    fn test_missing_envelope_warns() {
        let data = b"From: no envelope <x@y>\nSubject: s\n\nbody\n";
        let (msgs, rep) = parse(data);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].envelope_line().is_none());
        assert!(rep
            .warnings()
            .iter()
            .any(|w| w.contains("Could not find a valid \"From \" line")));
    }

    #[test]
    fn test_leading_blank_lines_warn() {
        let mut data = b"\n\n".to_vec();
        data.extend_from_slice(TWO);
        let (msgs, rep) = parse(&data);
        assert_eq!(msgs.len(), 2);
        assert!(rep
            .warnings()
            .iter()
            .any(|w| w.contains("Unexpected newline(s)")));
    }

    #[test]
    fn test_extra_separator_newline_joins_body() {
        // A second blank line between messages is slack the From scan
        // folds into the preceding body.
        let mut data = TWO.to_vec();
        let split = data.windows(9).position(|w| w == b"\nFrom bob").unwrap() + 1;
        data.insert(split, b'\n');
        let (msgs, _) = parse(&data);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].body().as_bytes(), b"first body\n\n");
    }

    #[test]
    fn test_empty_input() {
        let (msgs, rep) = parse(b"");
        assert!(msgs.is_empty());
        assert_eq!(rep.warning_count(), 0);
    }
}
