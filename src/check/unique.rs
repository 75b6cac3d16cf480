//! Duplicate detection: sort by Message-ID, compare neighbors, delete
//! confirmed duplicates.

use std::io::Write as _;
use std::process::Command;

use crate::check::Prompter;
use crate::error::Result;
use crate::model::mailbox::Mailbox;
use crate::model::message::Message;
use crate::report::Reporter;
use crate::writer;

/// Headers that must agree before two same-ID messages count as equal.
const COMPARE_KEYS: [&str; 18] = [
    "From",
    "To",
    "Cc",
    "Bcc",
    "Subject",
    "Date",
    "Resent-From",
    "Resent-To",
    "Resent-cc",
    "Resent-bcc",
    "Resent-Subject",
    "Resent-Date",
    "Resent-Message-ID",
    "X-From",
    "X-To",
    "X-cc",
    "X-Subject",
    "X-Date",
];

/// Remove duplicate messages. Equal-ID pairs whose salient headers and
/// body also match lose the later copy; mismatching pairs are put to the
/// user in interactive mode.
pub fn unique_mailbox(
    mbox: &mut Mailbox,
    interactive: bool,
    pager: &str,
    prompter: &mut dyn Prompter,
    reporter: &mut Reporter,
) -> Result<usize> {
    for msg in mbox.messages_mut() {
        msg.prime_message_id();
    }

    // Sort positions by Message-ID, case-sensitive, absent IDs first.
    let mut order: Vec<usize> = (1..=mbox.count()).collect();
    order.sort_by(|&a, &b| {
        let ida = mbox.message(a).and_then(Message::cached_message_id);
        let idb = mbox.message(b).and_then(Message::cached_message_id);
        ida.map(|s| s.as_bytes())
            .unwrap_or(b"")
            .cmp(idb.map(|s| s.as_bytes()).unwrap_or(b""))
    });

    let mut removed = 0;
    let mut auto_choice: Option<char> = None;

    for pair in order.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let (same, id_display) = {
            let ma = mbox.message(a).unwrap();
            let mb = mbox.message(b).unwrap();

            if ma.is_deleted() || mb.is_deleted() {
                continue;
            }
            let (Some(ida), Some(idb)) = (ma.cached_message_id(), mb.cached_message_id()) else {
                continue;
            };
            if ida != idb {
                continue;
            }
            let id_display = ida.display().into_owned();

            let mut same = true;
            for key in COMPARE_KEYS {
                if ma.header(key) != mb.header(key) {
                    reporter.note(format!(
                        "Messages {} and {} have the same Message-ID\n {}, but different {} lines",
                        ma.tag(),
                        mb.tag(),
                        id_display,
                        key
                    ));
                    same = false;
                    break;
                }
            }
            if same && ma.body() != mb.body() {
                reporter.note(format!(
                    "Messages {} and {} have the same Message-ID\n {}, but different bodies",
                    ma.tag(),
                    mb.tag(),
                    id_display
                ));
                same = false;
            }
            (same, id_display)
        };

        if same {
            {
                let ma = mbox.message(a).unwrap();
                let mb = mbox.message(b).unwrap();
                reporter.note(format!(
                    "Messages {} and {} with Message-ID\n {} are the same, deleting the latter",
                    ma.tag(),
                    mb.tag(),
                    id_display
                ));
            }
            mbox.message_mut(b).unwrap().set_deleted(true);
            removed += 1;
        } else if interactive {
            match resolve_pair(mbox, a, b, &mut auto_choice, pager, prompter, reporter) {
                Some(count) => removed += count,
                None => break,
            }
        }
    }

    reporter.note(format!(
        "{} {} duplicate{}",
        if removed == 0 { "Found" } else { "Deleted" },
        removed,
        if removed == 1 { "" } else { "s" }
    ));

    Ok(removed)
}

/// Ask which of two near-duplicates to delete. Returns the number
/// deleted, or `None` on quit.
fn resolve_pair(
    mbox: &mut Mailbox,
    a: usize,
    b: usize,
    auto_choice: &mut Option<char>,
    pager: &str,
    prompter: &mut dyn Prompter,
    reporter: &mut Reporter,
) -> Option<usize> {
    loop {
        let mut choice = match *auto_choice {
            Some(c) => c,
            None => prompter.ask_choice(
                "Please choose which message to delete (or b(oth), d(iff), or n(either)):",
                "12bnBNdq",
                'n',
            ),
        };

        if choice.is_ascii_uppercase() {
            choice = choice.to_ascii_lowercase();
            *auto_choice = Some(choice);
        }

        match choice {
            '1' => {
                reporter.note("Deleting the first message");
                mbox.message_mut(a).unwrap().set_deleted(true);
                return Some(1);
            }
            '2' => {
                reporter.note("Deleting the second message");
                mbox.message_mut(b).unwrap().set_deleted(true);
                return Some(1);
            }
            'b' => {
                reporter.note("Deleting both messages");
                mbox.message_mut(a).unwrap().set_deleted(true);
                mbox.message_mut(b).unwrap().set_deleted(true);
                return Some(2);
            }
            'd' => {
                diff_messages(
                    mbox.message(a).unwrap(),
                    mbox.message(b).unwrap(),
                    pager,
                    reporter,
                );
            }
            'n' => {
                reporter.note("Deleting no messages");
                return Some(0);
            }
            _ => return None,
        }
    }
}

/// Write both messages to temp files and run `diff` through the pager.
pub fn diff_messages(a: &Message, b: &Message, pager: &str, reporter: &mut Reporter) {
    let result = (|| -> std::io::Result<()> {
        let mut file_a = tempfile::NamedTempFile::new()?;
        writer::write_message(file_a.as_file_mut(), a)?;
        file_a.flush()?;
        let mut file_b = tempfile::NamedTempFile::new()?;
        writer::write_message(file_b.as_file_mut(), b)?;
        file_b.flush()?;

        let cmd = format!(
            "diff -dc {} {} | {}",
            file_a.path().display(),
            file_b.path().display(),
            pager
        );
        Command::new("sh").arg("-c").arg(&cmd).status()?;
        Ok(())
    })();

    if let Err(e) = result {
        reporter.warn(format!("Could not run diff: {e}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::testing::Scripted;

    fn message(id: &str, subject: &str, body: &str) -> Vec<u8> {
        format!(
            "From x@y Thu Jan 04 10:00:00 2024\n\
             Message-ID: {id}\n\
             Subject: {subject}\n\
             \n\
             {body}\n"
        )
        .into_bytes()
    }

    fn mailbox(parts: &[Vec<u8>]) -> Mailbox {
        let mut bytes = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                bytes.push(b'\n');
            }
            bytes.extend_from_slice(part);
        }
        let mut rep = Reporter::silent();
        Mailbox::from_bytes("t", bytes, false, &mut rep)
    }

    fn run(mbox: &mut Mailbox, interactive: bool, answers: Vec<char>) -> usize {
        let mut rep = Reporter::silent();
        let mut prompter = Scripted(answers);
        unique_mailbox(mbox, interactive, "cat", &mut prompter, &mut rep).unwrap()
    }

    #[test]
    fn test_exact_duplicates_lose_the_later_copy() {
        let mut mbox = mailbox(&[
            message("<dup@x>", "same", "same body"),
            message("<dup@x>", "same", "same body"),
            message("<other@x>", "different", "other body"),
        ]);
        assert_eq!(run(&mut mbox, false, vec![]), 1);
        assert!(!mbox.message(1).unwrap().is_deleted());
        assert!(mbox.message(2).unwrap().is_deleted());
        assert!(!mbox.message(3).unwrap().is_deleted());
    }

    #[test]
    fn test_differing_headers_survive_noninteractive() {
        let mut mbox = mailbox(&[
            message("<dup@x>", "one", "same body"),
            message("<dup@x>", "two", "same body"),
        ]);
        assert_eq!(run(&mut mbox, false, vec![]), 0);
        assert!(!mbox.message(1).unwrap().is_deleted());
        assert!(!mbox.message(2).unwrap().is_deleted());
    }

    #[test]
    fn test_differing_bodies_prompt_interactively() {
        let mut mbox = mailbox(&[
            message("<dup@x>", "same", "body a"),
            message("<dup@x>", "same", "body b"),
        ]);
        assert_eq!(run(&mut mbox, true, vec!['2']), 1);
        assert!(mbox.message(2).unwrap().is_deleted());
    }

    #[test]
    fn test_missing_ids_never_pair() {
        let mut mbox = mailbox(&[
            "From x@y Thu Jan 04 10:00:00 2024\nSubject: a\n\nbody\n"
                .as_bytes()
                .to_vec(),
            "From x@y Thu Jan 04 11:00:00 2024\nSubject: a\n\nbody\n"
                .as_bytes()
                .to_vec(),
        ]);
        assert_eq!(run(&mut mbox, false, vec![]), 0);
    }
}
