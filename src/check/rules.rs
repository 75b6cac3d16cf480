//! The rule battery run by `check` and `repair`.
//!
//! Rules run per message, in order: Content-Length sanity (with the
//! Dovecot rewrite when the parse flagged one), Message-ID presence,
//! stray `>From ` headers, From and Date presence with fallback sources,
//! and illegal header bytes. Strict mode enables the full battery;
//! otherwise only Content-Length mismatches and Message-ID substitution
//! from X-Message-ID are enforced.

use crate::check::{Prompter, RepairState};
use crate::error::{MboxckError, Result};
use crate::model::mailbox::Mailbox;
use crate::model::message::Message;
use crate::parser::boundary::{strip_artifacts, warn_content_length};
use crate::report::Reporter;
use crate::source::buffer::Segment;
use crate::source::signals;

/// Headers hashed into a synthesized Message-ID, when present.
const ID_HEADER_KEYS: [&str; 6] = ["Cc", "Date", "From", "Sender", "Subject", "To"];

const SYNTHETIC_ID_SUFFIX: &str = "@synthesized-by-mfck";

/// Check every message, repairing when `repair` is set. Interactive mode
/// asks per occurrence, with uppercase answers applying to the rest.
pub fn check_mailbox(
    mbox: &mut Mailbox,
    strict: bool,
    repair: bool,
    interactive: bool,
    prompter: &mut dyn Prompter,
    reporter: &mut Reporter,
) -> Result<()> {
    let mut state = RepairState::new(repair, interactive, prompter);

    for i in 0..mbox.count() {
        if signals::take_interrupt() {
            return Err(MboxckError::Cancelled);
        }
        let msg = &mut mbox.messages_mut()[i];
        if !check_message(msg, strict, &mut state, reporter) {
            break;
        }
    }

    Ok(())
}

/// Run all rules on one message. Returns false when the user quit.
fn check_message(
    msg: &mut Message,
    strict: bool,
    state: &mut RepairState,
    reporter: &mut Reporter,
) -> bool {
    let tag = msg.tag();

    // Content-Length sanity. Mismatches always matter; a missing header
    // only in strict mode.
    let declared = msg.header("Content-Length").cloned();
    let declared_len = declared.as_ref().and_then(Segment::to_integer);
    let body_len = msg.body_len() as i64;

    if declared_len != Some(body_len) && (declared.is_some() || strict) {
        if !msg.dovecot_bug().is_empty() {
            reporter.warn(format!(
                "Message {tag}: Corrupted by Dovecot \"From \" bug{}",
                if state.repairing_all() {
                    " (repairing)"
                } else {
                    ""
                }
            ));
            if state.should_repair() {
                repair_dovecot_body(msg, strict, reporter);
            } else if state.quit() {
                return false;
            }
        } else {
            match &declared {
                None => reporter.warn(format!(
                    "Message {tag}: Missing Content-Length:, should be {body_len}{}",
                    if state.repairing_all() {
                        " (repairing)"
                    } else {
                        ""
                    }
                )),
                Some(value) => reporter.warn(format!(
                    "Message {tag}: Incorrect Content-Length: {}, should be {body_len}{}",
                    value.display(),
                    if state.repairing_all() {
                        " (repairing)"
                    } else {
                        ""
                    }
                )),
            }
            if state.should_repair() {
                msg.set_header("Content-Length", Segment::from_str(&body_len.to_string()));
            } else if state.quit() {
                return false;
            }
        }
    }

    // Message-ID presence. A usable X-Message-ID substitutes in any
    // mode; synthesizing a fresh one is a strict-mode repair.
    let id_missing = msg.header("Message-ID").map_or(true, Segment::is_empty);
    if id_missing {
        let substitute = msg
            .header("X-Message-ID")
            .filter(|v| !v.is_empty())
            .cloned();
        match substitute {
            Some(value) => {
                reporter.warn(format!(
                    "Message {tag}: Missing Message-ID: header, {} X-Message-ID:\n \"{}\"",
                    if state.repairing_all() {
                        "using"
                    } else {
                        "but could use"
                    },
                    value.display()
                ));
                if state.should_repair() {
                    msg.set_header("Message-ID", value);
                } else if state.quit() {
                    return false;
                }
            }
            None if strict => {
                let synthetic = synthesize_message_id(msg);
                reporter.warn(format!(
                    "Message {tag}: Missing Message-ID: header, {} with {}",
                    if state.repairing_all() {
                        "replacing"
                    } else {
                        "could replace"
                    },
                    synthetic.display()
                ));
                if state.should_repair() {
                    msg.set_header("Message-ID", synthetic);
                } else if state.quit() {
                    return false;
                }
            }
            None => {}
        }
    }

    // Only strict tests below.
    if !strict {
        return true;
    }

    // Stray ">From " headers.
    if let Some(value) = msg.header(">From ").cloned() {
        reporter.warn(format!(
            "Message {tag}: Bogus \">From \" line in the headers:\n \">From {}\"{}",
            value.display(),
            if state.repairing_all() {
                " (removing)"
            } else {
                ""
            }
        ));
        if state.should_repair() {
            msg.delete_header(">From ", false);
        } else if state.quit() {
            return false;
        }
    }

    // From presence.
    if msg.header("From").is_none() {
        let fallback = msg
            .header("X-From")
            .cloned()
            .map(|v| ("X-From", v))
            .or_else(|| msg.header("Sender").cloned().map(|v| ("Sender", v)))
            .or_else(|| {
                msg.header("Return-Path")
                    .cloned()
                    .map(|v| ("Return-Path", v))
            })
            .or_else(|| {
                msg.envelope_sender()
                    .cloned()
                    .map(|v| ("envelope sender", v))
            });
        match fallback {
            None => reporter.warn(format!("Message {tag}: Missing From: header")),
            Some((source, value)) => {
                reporter.warn(format!(
                    "Message {tag}: Missing From: header, {} {source}:\n \"{}\"",
                    if state.repairing_all() {
                        "using"
                    } else {
                        "but could use"
                    },
                    value.display()
                ));
                if state.should_repair() {
                    msg.set_header("From", value);
                } else if state.quit() {
                    return false;
                }
            }
        }
    }

    // Date presence.
    if msg.header("Date").is_none() {
        let fallback = msg
            .header("X-Date")
            .cloned()
            .map(|v| ("X-Date", v))
            .or_else(|| received_date(msg).map(|v| ("Received", v)))
            .or_else(|| {
                let sender_ok = msg.envelope_sender().is_some_and(|s| !s.is_empty());
                (sender_ok)
                    .then(|| msg.envelope_date())
                    .flatten()
                    .map(|d| ("envelope date", Segment::from_str(&d.rfc2822())))
            });
        match fallback {
            None => reporter.warn(format!("Message {tag}: Missing Date: header")),
            Some((source, value)) => {
                reporter.warn(format!(
                    "Message {tag}: Missing Date: header, {} {source}:\n \"{}\"",
                    if state.repairing_all() {
                        "using"
                    } else {
                        "but could use"
                    },
                    value.display()
                ));
                if state.should_repair() {
                    msg.set_header("Date", value);
                } else if state.quit() {
                    return false;
                }
            }
        }
    }

    // Undeclared binary data in header lines.
    for header in msg.headers().iter() {
        let line = header.original_line().unwrap_or_else(|| header.value());
        if let Some(pos) = find_illegal_byte(line.as_bytes()) {
            let bad = line.as_bytes()[pos];
            reporter.warn(format!(
                "Message {tag}: Illegal character {:#04x} in header:\n {}",
                bad,
                excerpt(&line.display(), 72)
            ));
        }
    }

    true
}

/// Strip the Dovecot artifacts out of the body and restore the
/// Content-Length header to the real length.
pub fn repair_dovecot_body(msg: &mut Message, strict: bool, reporter: &mut Reporter) {
    let repaired = strip_artifacts(msg.body(), msg.dovecot_bug());
    msg.set_body(Segment::Owned(repaired));
    msg.clear_dovecot_bug();

    let body_len = msg.body_len() as i64;
    let declared = msg.header("Content-Length").and_then(Segment::to_integer);
    if declared != Some(body_len) {
        if let Some(declared) = declared {
            warn_content_length(&msg.tag(), declared, body_len, strict, reporter);
        }
        msg.set_header("Content-Length", Segment::from_str(&body_len.to_string()));
    }
}

/// `<hex(md5(identifying headers ++ body))@synthesized-by-mfck>`, with
/// the headers taken in message order.
pub fn synthesize_message_id(msg: &Message) -> Segment {
    let mut ctx = md5::Context::new();
    for header in msg.headers().iter() {
        if ID_HEADER_KEYS.iter().any(|k| header.is(k)) {
            ctx.consume(header.value().as_bytes());
        }
    }
    ctx.consume(msg.body().as_bytes());
    let digest = ctx.compute();
    Segment::Owned(format!("<{digest:x}{SYNTHETIC_ID_SUFFIX}>").into_bytes())
}

/// The date tail of the last `Received:` header, after its `;`.
fn received_date(msg: &Message) -> Option<Segment> {
    let received = msg.headers().get_last("Received")?;
    let pos = received.as_bytes().iter().position(|&b| b == b';')?;
    Some(received.slice(pos + 1, received.len()).trimmed())
}

/// Position of the first byte that is control (other than tab/CR/LF) or
/// outside printable ASCII.
fn find_illegal_byte(bytes: &[u8]) -> Option<usize> {
    bytes
        .iter()
        .position(|&b| !matches!(b, b'\t' | b'\r' | b'\n') && (b < 0x20 || b > 0x7e))
}

fn excerpt(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::testing::Scripted;
    use crate::model::mailbox::Mailbox;

    fn parse(bytes: &[u8], strict: bool) -> (Mailbox, Reporter) {
        let mut rep = Reporter::silent();
        let mbox = Mailbox::from_bytes("test", bytes.to_vec(), strict, &mut rep);
        (mbox, rep)
    }

    fn run_check(mbox: &mut Mailbox, strict: bool, repair: bool) -> Reporter {
        let mut rep = Reporter::silent();
        let mut prompter = Scripted(vec![]);
        check_mailbox(mbox, strict, repair, false, &mut prompter, &mut rep).unwrap();
        rep
    }

    const STALE_CL: &[u8] = b"\
From a@b Thu Jan 04 10:00:00 2024\n\
Subject: s\n\
Content-Length: 99\n\
\n\
short\n\
\n\
From b@c Fri Jan 05 11:00:00 2024\n\
Subject: t\n\
\n\
tail\n";

    #[test]
    fn test_incorrect_content_length_reported_and_repaired() {
        let (mut mbox, _) = parse(STALE_CL, false);

        let rep = run_check(&mut mbox, false, false);
        assert_eq!(rep.warning_count(), 1);
        assert!(rep.warnings()[0].contains("Incorrect Content-Length: 99, should be 6"));
        assert!(!mbox.is_dirty());

        let rep = run_check(&mut mbox, false, true);
        assert!(rep.warnings()[0].contains("(repairing)"));
        assert!(mbox.is_dirty());
        assert_eq!(
            mbox.message(1).unwrap().header("Content-Length").unwrap(),
            &Segment::from_str("6")
        );
    }

    #[test]
    fn test_missing_content_length_strict_only() {
        let data = b"From a@b Thu Jan 04 10:00:00 2024\nSubject: s\n\nbody\n";
        let (mut mbox, _) = parse(data, false);

        let rep = run_check(&mut mbox, false, false);
        assert_eq!(rep.warning_count(), 0);

        let rep = run_check(&mut mbox, true, false);
        assert!(rep
            .warnings()
            .iter()
            .any(|w| w.contains("Missing Content-Length:, should be 4")));
    }

    #[test]
    fn test_synthesized_message_id_format() {
        let data = b"\
From a@b Thu Jan 04 10:00:00 2024\n\
From: Alice <a@b>\n\
Date: Thu, 04 Jan 2024 10:00:00 +0000\n\
Subject: s\n\
Content-Length: 5\n\
\n\
body\n";
        let (mut mbox, _) = parse(data, false);

        let expected = {
            let mut ctx = md5::Context::new();
            ctx.consume(b"Alice <a@b>");
            ctx.consume(b"Thu, 04 Jan 2024 10:00:00 +0000");
            ctx.consume(b"s");
            ctx.consume(b"body\n");
            format!("<{:x}@synthesized-by-mfck>", ctx.compute())
        };

        let rep = run_check(&mut mbox, true, true);
        assert!(rep
            .warnings()
            .iter()
            .any(|w| w.contains("Missing Message-ID")));
        assert_eq!(
            mbox.message(1).unwrap().header("Message-ID").unwrap(),
            &Segment::from_str(&expected)
        );
    }

    #[test]
    fn test_x_message_id_substitution() {
        let data = b"\
From a@b Thu Jan 04 10:00:00 2024\n\
X-Message-ID: <kept@x>\n\
Content-Length: 5\n\
\n\
body\n";
        let (mut mbox, _) = parse(data, false);
        run_check(&mut mbox, false, true);
        assert_eq!(
            mbox.message(1).unwrap().header("Message-ID").unwrap(),
            &Segment::from_str("<kept@x>")
        );
    }

    #[test]
    fn test_from_and_date_fallbacks() {
        let data = b"\
From envelope@host Thu Jan 04 10:00:00 2024\n\
Sender: real@sender\n\
Received: by relay (local); Thu, 04 Jan 2024 09:59:59 +0000\n\
Message-ID: <m@x>\n\
Content-Length: 5\n\
\n\
body\n";
        let (mut mbox, _) = parse(data, false);
        run_check(&mut mbox, true, true);

        let msg = mbox.message(1).unwrap();
        assert_eq!(msg.header("From").unwrap(), &Segment::from_str("real@sender"));
        assert_eq!(
            msg.header("Date").unwrap(),
            &Segment::from_str("Thu, 04 Jan 2024 09:59:59 +0000")
        );
    }

    #[test]
    fn test_date_from_envelope_when_no_received() {
        let data = b"\
From envelope@host Thu Jan 04 10:00:00 2024\n\
From: someone <s@x>\n\
Message-ID: <m@x>\n\
Content-Length: 5\n\
\n\
body\n";
        let (mut mbox, _) = parse(data, false);
        run_check(&mut mbox, true, true);
        assert_eq!(
            mbox.message(1).unwrap().header("Date").unwrap(),
            &Segment::from_str("Thu,  4 Jan 2024 10:00:00 +0000")
        );
    }

    #[test]
    fn test_illegal_header_bytes_flagged() {
        let mut data = b"\
From a@b Thu Jan 04 10:00:00 2024\n\
Message-ID: <m@x>\n\
From: ok <o@k>\n\
Date: Thu, 04 Jan 2024 10:00:00 +0000\n\
Subject: bad "
            .to_vec();
        data.push(0x01);
        data.extend_from_slice(b" byte\nContent-Length: 5\n\nbody\n");
        let (mut mbox, _) = parse(&data, false);
        let rep = run_check(&mut mbox, true, false);
        assert!(rep
            .warnings()
            .iter()
            .any(|w| w.contains("Illegal character 0x01")));
    }

    #[test]
    fn test_quit_stops_checking() {
        let (mut mbox, _) = parse(STALE_CL, false);
        let mut rep = Reporter::silent();
        let mut prompter = Scripted(vec!['q']);
        check_mailbox(&mut mbox, false, true, true, &mut prompter, &mut rep).unwrap();
        assert!(!mbox.is_dirty());
    }
}
