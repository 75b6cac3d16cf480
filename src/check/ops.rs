//! Joining and splitting messages.

use crate::check::set::MessageSet;
use crate::check::Prompter;
use crate::model::mailbox::Mailbox;
use crate::parser::cursor::Cursor;
use crate::parser::envelope;
use crate::parser::message::parse_message;
use crate::report::Reporter;
use crate::source::buffer::Segment;

/// Append the full raw extent (envelope, headers, body) of every further
/// message in the set onto the body of the first, newline-separated, and
/// tombstone the appended ones. Returns how many were appended.
pub fn join_messages(mbox: &mut Mailbox, set: &MessageSet, reporter: &mut Reporter) -> usize {
    let numbers: Vec<usize> = set.iter(mbox.count()).collect();
    let Some((&first, rest)) = numbers.split_first() else {
        return 0;
    };
    if rest.is_empty() {
        return 0;
    }

    let mut joined = mbox
        .message(first)
        .map(|m| m.body().to_vec())
        .unwrap_or_default();
    let mut appended = 0;
    for &num in rest {
        let Some(raw) = mbox.message(num).map(|m| m.raw().to_vec()) else {
            continue;
        };
        joined.push(b'\n');
        joined.extend_from_slice(&raw);
        mbox.message_mut(num).unwrap().set_deleted(true);
        appended += 1;
    }

    if let Some(msg) = mbox.message_mut(first) {
        msg.set_body(Segment::Owned(joined));
        reporter.note(format!(
            "Appended {appended} message{} onto message {}",
            if appended == 1 { "" } else { "s" },
            msg.tag()
        ));
    }

    appended
}

/// Look for a `\n\nFrom ` envelope inside the body of message `num`; on
/// a (possibly confirmed) hit, cut the body there, parse the tail as new
/// messages, and splice them in right after. Returns true if a split
/// happened.
pub fn split_message(
    mbox: &mut Mailbox,
    num: usize,
    interactive: bool,
    prompter: &mut dyn Prompter,
    reporter: &mut Reporter,
) -> bool {
    let Some(msg) = mbox.message(num) else {
        return false;
    };
    let tag = msg.tag();
    let body = msg.body().clone();

    let mut cur = Cursor::over(body.to_vec());
    loop {
        if !envelope::seek_from_line(&mut cur, 2) {
            return false;
        }
        cur.take_newline();
        cur.take_newline();
        let split_at = cur.position();

        let Some(from_line) = envelope::take_from_line(&mut cur) else {
            continue;
        };

        let shown = from_line.line.trimmed();
        reporter.note(format!(
            "Message {tag}: Found \"From \" line in body:\n \"{}\"",
            shown.display()
        ));

        if interactive && !prompter.ask_yes_no("Split message?", true) {
            continue;
        }

        // Parse everything from the split point as fresh messages and
        // splice them in after this one.
        let mut tail = Cursor::over(body.slice(split_at, body.len()).to_vec());
        let mut at = num;
        let mut created = 0;
        loop {
            let number = mbox.next_number();
            match parse_message(&mut tail, number, false, reporter) {
                Some(mut new_msg) => {
                    new_msg.mark_dirty();
                    reporter.note(format!("Created new message {}", new_msg.tag()));
                    mbox.insert_after(at, new_msg);
                    at += 1;
                    created += 1;
                    tail.take_newline();
                }
                None => break,
            }
        }

        if created > 0 {
            let msg = mbox.message_mut(num).unwrap();
            msg.set_body(body.slice(0, split_at - 1));
            return true;
        }
        return false;
    }
}
