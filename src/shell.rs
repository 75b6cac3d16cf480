//! The command loop: batch commands from the command line, then an
//! interactive `@ ` prompt when requested.

use std::io::Write as _;

use humansize::{format_size, BINARY};

use crate::check::ops::{join_messages, split_message};
use crate::check::rules::check_mailbox;
use crate::check::set::MessageSet;
use crate::check::unique::{diff_messages, unique_mailbox};
use crate::check::Prompter;
use crate::config::CoreConfig;
use crate::error::{MboxckError, Result};
use crate::model::mailbox::Mailbox;
use crate::model::message::Message;
use crate::report::Reporter;
use crate::source::signals;
use crate::writer;

struct CommandSpec {
    name: &'static str,
    args: &'static str,
    help: &'static str,
}

/// Prefix-matched, first match wins, so the order is significant.
const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "+", args: "", help: "go to the next message and display it" },
    CommandSpec { name: "-", args: "", help: "go to the previous message and display it" },
    CommandSpec { name: "check", args: "[strict]", help: "check the mailbox' internal consistency" },
    CommandSpec { name: "delete", args: "[<msgs>]", help: "mark one or more messages as deleted" },
    CommandSpec { name: "diff", args: "<msg1> <msg2>", help: "compare two messages and show the differences" },
    CommandSpec { name: "dp", args: "", help: "delete the current message, then show the next" },
    CommandSpec { name: "exit", args: "", help: "save any changes, then leave the mailbox" },
    CommandSpec { name: "find", args: "[<header>:] <string>", help: "find messages containing the given string" },
    CommandSpec { name: "headers", args: "[<msg>]", help: "list a page full of message descriptions" },
    CommandSpec { name: "list", args: "[<msg>]", help: "list a page full of message descriptions" },
    CommandSpec { name: "help", args: "[<cmd>]", help: "get help on a specific command or all commands" },
    CommandSpec { name: "join", args: "<msgs>", help: "join messages by replacing them with a single message" },
    CommandSpec { name: "more", args: "[<msgs>]", help: "display the contents of the given message(s)" },
    CommandSpec { name: "next", args: "", help: "go to the next message and display it" },
    CommandSpec { name: "previous", args: "", help: "go to the previous message and display it" },
    CommandSpec { name: "print", args: "[<msgs>]", help: "display the contents of the given message(s)" },
    CommandSpec { name: "quit", args: "", help: "leave the mailbox without saving any changes" },
    CommandSpec { name: "repair", args: "[strict]", help: "check the mailbox' internal state and repair if needed" },
    CommandSpec { name: "save", args: "[<msgs>] <file>", help: "save the messages to the given file" },
    CommandSpec { name: "split", args: "[<msgs>]", help: "look for 'From ' lines in the messages and split them" },
    CommandSpec { name: "strict", args: "[on|off]", help: "set/show 'strict' mode when checking mailboxes" },
    CommandSpec { name: "undelete", args: "[<msgs>]", help: "undelete one or more messages" },
    CommandSpec { name: "unique", args: "", help: "unique the messages by removing duplicates" },
    CommandSpec { name: "xit", args: "", help: "leave the mailbox without saving any changes" },
    CommandSpec { name: "z", args: "", help: "show the next page of message descriptions" },
    CommandSpec { name: "z-", args: "", help: "show the previous page of message descriptions" },
    CommandSpec { name: "?", args: "[<cmd>]", help: "get help on a specific command or all commands" },
];

/// Run batch commands, then (with `-i`) the interactive prompt. Ends
/// with an autosave of a dirty mailbox unless the user quit.
pub fn run(
    mbox: &mut Mailbox,
    commands: &[String],
    config: &mut CoreConfig,
    prompter: &mut dyn Prompter,
    reporter: &mut Reporter,
) -> Result<()> {
    let mut cur: usize = 1;
    let mut batch = commands.iter();

    loop {
        if signals::take_interrupt() {
            if config.interactive {
                reporter.note("Interrupted");
                continue;
            }
            return Err(MboxckError::Cancelled);
        }

        let line = match batch.next() {
            Some(cmd) => cmd.clone(),
            None => {
                if !config.interactive {
                    break;
                }
                match prompt_line("@ ") {
                    Some(line) => line,
                    None => break,
                }
            }
        };

        match run_command(&line, mbox, &mut cur, config, prompter, reporter)? {
            Flow::Continue => {}
            Flow::Exit => break,
            Flow::Quit => {
                if mbox.is_dirty() {
                    reporter.note("Leaving modified mailbox unsaved");
                }
                return Ok(());
            }
        }
    }

    if mbox.is_dirty() {
        if config.dry_run {
            reporter.note("Dry run mode -- not autosaving modified mailbox");
        } else {
            writer::save_mailbox(mbox, false, config, reporter)?;
        }
    }

    Ok(())
}

enum Flow {
    Continue,
    Exit,
    Quit,
}

fn run_command(
    line: &str,
    mbox: &mut Mailbox,
    cur: &mut usize,
    config: &mut CoreConfig,
    prompter: &mut dyn Prompter,
    reporter: &mut Reporter,
) -> Result<Flow> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let count = mbox.count();

    // An empty line advances; a leading number shows that message.
    let (name, args) = match words.split_first() {
        None => ("next", &[][..]),
        Some((first, rest)) => match COMMANDS.iter().find(|c| c.name.starts_with(first)) {
            Some(spec) => (spec.name, rest),
            None if first.chars().all(|c| c.is_ascii_digit() || c == '-' || c == ',' || c == '*') => {
                ("print", &words[..])
            }
            None => {
                reporter.warn(format!("Unknown command: {first}"));
                return Ok(Flow::Continue);
            }
        },
    };

    match name {
        "print" | "more" => {
            if let Some(set) = set_from_args(args, Some(*cur), count, reporter) {
                for num in set.iter(count) {
                    show_message(mbox, num);
                    *cur = num;
                }
            }
        }
        "next" | "+" => {
            if *cur >= count {
                reporter.warn("No more messages");
            } else {
                *cur += 1;
                show_message(mbox, *cur);
            }
        }
        "previous" | "-" => {
            if *cur <= 1 {
                reporter.warn("No more messages");
            } else {
                *cur -= 1;
                show_message(mbox, *cur);
            }
        }
        "delete" | "undelete" => {
            if let Some(set) = set_from_args(args, Some(*cur), count, reporter) {
                for num in set.iter(count) {
                    if let Some(msg) = mbox.message_mut(num) {
                        msg.set_deleted(name == "delete");
                        *cur = num;
                    }
                }
            }
        }
        "dp" => {
            if let Some(msg) = mbox.message_mut(*cur) {
                msg.set_deleted(true);
            }
            if *cur >= count {
                reporter.warn("No more messages");
            } else {
                *cur += 1;
                show_message(mbox, *cur);
            }
        }
        "diff" => {
            let nums: Vec<usize> = args.iter().filter_map(|a| a.parse().ok()).collect();
            match (nums.first(), nums.get(1)) {
                (Some(&m1), Some(&m2)) => {
                    if let (Some(a), Some(b)) = (mbox.message(m1), mbox.message(m2)) {
                        diff_messages(a, b, &config.pager, reporter);
                    } else {
                        reporter.warn("No such message");
                    }
                }
                _ => reporter.warn("Usage: diff <msg1> <msg2>"),
            }
        }
        "headers" | "list" => {
            if let Some(first) = args.first() {
                if let Ok(num) = first.parse() {
                    *cur = num;
                }
            }
            list_page(mbox, *cur, config);
        }
        "z" => {
            let page = config.page_height.saturating_sub(1).max(1);
            *cur = (*cur + page).min(count.max(1));
            list_page(mbox, *cur, config);
        }
        "z-" => {
            let page = config.page_height.saturating_sub(1).max(1);
            *cur = cur.saturating_sub(page).max(1);
            list_page(mbox, *cur, config);
        }
        "find" => {
            if args.is_empty() {
                reporter.warn("Usage: find [<header>:] <string>");
            } else {
                let (header, needle) = match args[0].strip_suffix(':') {
                    Some(h) if args.len() > 1 => (Some(h), args[1..].join(" ")),
                    _ => (None, args.join(" ")),
                };
                find_messages(mbox, header, &needle, config);
            }
        }
        "check" | "repair" => {
            let strict = match args.first() {
                Some(a) => "strict".starts_with(a) || *a == "true",
                None => config.strict,
            };
            check_mailbox(
                mbox,
                strict,
                name == "repair",
                config.interactive,
                prompter,
                reporter,
            )?;
        }
        "unique" => {
            unique_mailbox(mbox, config.interactive, &config.pager, prompter, reporter)?;
        }
        "join" => {
            match set_from_args(args, None, count, reporter) {
                Some(set) => {
                    if join_messages(mbox, &set, reporter) == 0 {
                        reporter.warn("Please supply multiple messages to join");
                    }
                }
                None => reporter.warn("Usage: join <msgs>"),
            }
        }
        "split" => {
            if let Some(set) = set_from_args(args, Some(*cur), count, reporter) {
                for num in set.iter(count) {
                    split_message(mbox, num, config.interactive, prompter, reporter);
                    *cur = num;
                }
            }
        }
        "save" => {
            let Some((file, set_args)) = args.split_last() else {
                reporter.warn("Usage: save [<msgs>] <file>");
                return Ok(Flow::Continue);
            };
            if let Some(set) = set_from_args(set_args, Some(*cur), count, reporter) {
                save_messages(mbox, &set, file, config, reporter)?;
            }
        }
        "strict" => {
            config.strict = match args.first() {
                Some(&"on") | Some(&"true") => true,
                Some(&"off") | Some(&"false") => false,
                _ => !config.strict,
            };
            reporter.note(format!(
                "Strict checking mode is turned {}",
                if config.strict { "on" } else { "off" }
            ));
        }
        "help" | "?" => show_help(args.first().copied()),
        "exit" => return Ok(Flow::Exit),
        "quit" | "xit" => return Ok(Flow::Quit),
        _ => unreachable!("command table covers all names"),
    }

    Ok(Flow::Continue)
}

/// Parse the remaining words as one message set; empty args fall back to
/// `default`.
fn set_from_args(
    args: &[&str],
    default: Option<usize>,
    last: usize,
    reporter: &mut Reporter,
) -> Option<MessageSet> {
    let spec = args.join(",");
    if spec.is_empty() {
        return default.map(MessageSet::single);
    }
    match MessageSet::parse(&spec, last) {
        Some(set) => Some(set),
        None => {
            reporter.warn(format!("Bad message set: {spec}"));
            None
        }
    }
}

fn show_message(mbox: &Mailbox, num: usize) {
    let Some(msg) = mbox.message(num) else {
        return;
    };
    println!("[Mailbox {}: Message {}]", mbox.name(), msg.tag());
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let _ = writer::write_message(&mut out, msg);
    let _ = out.flush();
}

fn list_page(mbox: &Mailbox, from: usize, config: &CoreConfig) {
    let page = if config.page_height == 0 {
        usize::MAX
    } else {
        config.page_height.saturating_sub(1).max(1)
    };
    for num in from..mbox.count().min(from.saturating_add(page) - 1) + 1 {
        if let Some(msg) = mbox.message(num) {
            println!("{}", list_line(num, msg, config.page_width));
        }
    }
}

fn list_line(num: usize, msg: &Message, width: usize) -> String {
    let date = short_date(msg);
    let from = msg
        .header("From")
        .map(|v| v.display().into_owned())
        .or_else(|| msg.envelope_sender().map(|s| s.display().into_owned()))
        .unwrap_or_default();
    let subject = msg
        .header("Subject")
        .map(|v| v.display().into_owned())
        .unwrap_or_default();
    let size = format_size(msg.raw().len() as u64, BINARY);

    let line = format!(
        "{:>4}{} {:16} {:<25} {:>9}  {}",
        num,
        if msg.is_deleted() { 'D' } else { ' ' },
        date,
        clip(&from, 25),
        size,
        subject
    );
    if width > 0 {
        clip(&line, width)
    } else {
        line
    }
}

fn short_date(msg: &Message) -> String {
    if let Some(value) = msg.header("Date") {
        if let Ok(text) = std::str::from_utf8(value.as_bytes()) {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(text.trim()) {
                return dt.format("%Y-%m-%d %H:%M").to_string();
            }
        }
    }
    msg.envelope_date()
        .and_then(|d| d.to_naive())
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn find_messages(mbox: &Mailbox, header: Option<&str>, needle: &str, config: &CoreConfig) {
    let needle = needle.as_bytes().to_ascii_lowercase();

    for (ix, msg) in mbox.messages().iter().enumerate() {
        let hit = match header {
            Some(key) => msg
                .headers()
                .iter()
                .filter(|h| h.is(key))
                .any(|h| contains_ci(h.value().as_bytes(), &needle)),
            None => {
                msg.headers()
                    .iter()
                    .any(|h| {
                        h.original_line()
                            .map(|l| contains_ci(l.as_bytes(), &needle))
                            .unwrap_or_else(|| contains_ci(h.value().as_bytes(), &needle))
                    })
                    || contains_ci(msg.body().as_bytes(), &needle)
            }
        };
        if hit {
            println!("{}", list_line(ix + 1, msg, config.page_width));
        }
    }
}

fn contains_ci(haystack: &[u8], lowered_needle: &[u8]) -> bool {
    if lowered_needle.is_empty() {
        return true;
    }
    haystack
        .windows(lowered_needle.len())
        .any(|w| w.to_ascii_lowercase() == lowered_needle)
}

fn show_help(topic: Option<&str>) {
    for spec in COMMANDS {
        if let Some(t) = topic {
            if !spec.name.starts_with(t) {
                continue;
            }
        }
        println!("{:<10} {:<18} {}", spec.name, spec.args, spec.help);
    }
}

fn save_messages(
    mbox: &Mailbox,
    set: &MessageSet,
    file: &str,
    config: &CoreConfig,
    reporter: &mut Reporter,
) -> Result<()> {
    let path = std::path::Path::new(file);
    let mut target = Mailbox::open_or_create(path, config, reporter)?;

    let mut saved = 0;
    for num in set.iter(mbox.count()) {
        if let Some(msg) = mbox.message(num) {
            target.append(msg.clone());
            saved += 1;
        }
    }

    writer::save_mailbox(&mut target, false, config, reporter)?;
    reporter.note(format!(
        "{saved} message{} saved to {file}",
        if saved == 1 { "" } else { "s" }
    ));
    Ok(())
}

fn prompt_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::testing::Scripted;

    const TWO: &[u8] = b"\
From a@x Thu Jan 04 10:00:00 2024\nSubject: one\nContent-Length: 9\n\nbody one\n\n\
From b@x Thu Jan 04 11:00:00 2024\nSubject: two\nContent-Length: 9\n\nbody two\n";

    fn mailbox() -> Mailbox {
        let mut rep = Reporter::silent();
        Mailbox::from_bytes("t", TWO.to_vec(), false, &mut rep)
    }

    fn run_batch(mbox: &mut Mailbox, commands: &[&str]) -> Reporter {
        let mut config = CoreConfig {
            dry_run: true,
            ..CoreConfig::default()
        };
        let mut rep = Reporter::silent();
        let mut prompter = Scripted(vec![]);
        let commands: Vec<String> = commands.iter().map(|s| s.to_string()).collect();
        run(mbox, &commands, &mut config, &mut prompter, &mut rep).unwrap();
        rep
    }

    #[test]
    fn test_delete_and_undelete_batch() {
        let mut mbox = mailbox();
        run_batch(&mut mbox, &["delete 1-2", "undelete 2"]);
        assert!(mbox.message(1).unwrap().is_deleted());
        assert!(!mbox.message(2).unwrap().is_deleted());
    }

    #[test]
    fn test_prefix_matching_dispatch() {
        let mut mbox = mailbox();
        run_batch(&mut mbox, &["del 1"]);
        assert!(mbox.message(1).unwrap().is_deleted());
    }

    #[test]
    fn test_unknown_command_warns() {
        let mut mbox = mailbox();
        let rep = run_batch(&mut mbox, &["frobnicate"]);
        assert!(rep.warnings().iter().any(|w| w.contains("Unknown command")));
    }

    #[test]
    fn test_check_command_reports() {
        let mut data = TWO.to_vec();
        // Break the first Content-Length.
        let pos = data.windows(18).position(|w| w == b"Content-Length: 9\n").unwrap();
        data[pos + 16] = b'7';
        let mut rep = Reporter::silent();
        let mut mbox = Mailbox::from_bytes("t", data, false, &mut rep);

        let rep = run_batch(&mut mbox, &["check"]);
        assert!(rep
            .warnings()
            .iter()
            .any(|w| w.contains("Incorrect Content-Length")));
    }

    #[test]
    fn test_join_command() {
        let mut mbox = mailbox();
        run_batch(&mut mbox, &["join 1,2"]);
        assert!(mbox.message(2).unwrap().is_deleted());
        assert!(mbox.message(1).unwrap().is_dirty());
    }
}
