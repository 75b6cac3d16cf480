//! Integration tests for parsing, checking, repair, uniquing, and the
//! writer, built around whole-mailbox fixtures.

use mboxck::check::rules::check_mailbox;
use mboxck::check::unique::unique_mailbox;
use mboxck::check::Prompter;
use mboxck::config::CoreConfig;
use mboxck::model::mailbox::Mailbox;
use mboxck::report::Reporter;
use mboxck::writer;

/// Prompter that always takes the offered default.
struct AnswerDefault;

impl Prompter for AnswerDefault {
    fn ask_choice(&mut self, _question: &str, _choices: &str, default: char) -> char {
        default
    }
}

fn parse(bytes: &[u8]) -> (Mailbox, Reporter) {
    let mut rep = Reporter::silent();
    let mbox = Mailbox::from_bytes("fixture", bytes.to_vec(), false, &mut rep);
    (mbox, rep)
}

fn serialize(mbox: &mut Mailbox) -> Vec<u8> {
    let mut out = Vec::new();
    writer::write_mailbox_to(&mut out, mbox, true).unwrap();
    out
}

fn repair(mbox: &mut Mailbox, strict: bool) -> Reporter {
    let mut rep = Reporter::silent();
    let mut prompter = AnswerDefault;
    check_mailbox(mbox, strict, true, false, &mut prompter, &mut rep).unwrap();
    rep
}

fn report(mbox: &mut Mailbox, strict: bool) -> Reporter {
    let mut rep = Reporter::silent();
    let mut prompter = AnswerDefault;
    check_mailbox(mbox, strict, false, false, &mut prompter, &mut rep).unwrap();
    rep
}

// ─── S1: clean round trip ───────────────────────────────────────────

const CLEAN: &[u8] = b"\
From alice@example.com Thu Jan 04 10:00:00 2024\n\
From: Alice <alice@example.com>\n\
Message-ID: <one@example.com>\n\
Content-Length: 11\n\
\n\
Hello Bob!\n\
\n\
From bob@example.com Fri Jan 05 11:30:00 2024\n\
From: Bob <bob@example.com>\n\
Message-ID: <two@example.com>\n\
Content-Length: 5\n\
\n\
Bye.\n\
\n";

#[test]
fn test_s1_clean_mailbox_round_trips() {
    let (mut mbox, rep) = parse(CLEAN);
    assert_eq!(rep.warning_count(), 0);
    assert_eq!(mbox.count(), 2);
    assert!(!mbox.is_dirty());
    assert_eq!(serialize(&mut mbox), CLEAN);

    let check_rep = report(&mut mbox, false);
    assert_eq!(check_rep.warning_count(), 0);
}

// ─── S2: stale Content-Length ───────────────────────────────────────

fn stale_cl_mailbox() -> Vec<u8> {
    // 97 bytes of body, but the header claims 100.
    let body = vec![b'x'; 96];
    let mut data = Vec::new();
    data.extend_from_slice(
        b"From alice@example.com Thu Jan 04 10:00:00 2024\n\
          Subject: stale\n\
          Content-Length: 100\n\
          \n",
    );
    data.extend_from_slice(&body);
    data.extend_from_slice(b"\n\n");
    data.extend_from_slice(
        b"From bar@x.example Wed Jan 01 00:00:00 2020\n\
          Subject: follower\n\
          Content-Length: 5\n\
          \n\
          tail\n\
          \n",
    );
    data
}

#[test]
fn test_s2_stale_content_length_reported() {
    let (_, rep) = parse(&stale_cl_mailbox());
    assert_eq!(rep.warning_count(), 1);
    assert!(
        rep.warnings()[0].contains("3 bytes"),
        "expected a size-mismatch warning, got: {:?}",
        rep.warnings()
    );
}

#[test]
fn test_s2_stale_content_length_repaired() {
    let (mut mbox, _) = parse(&stale_cl_mailbox());
    let rep = repair(&mut mbox, false);
    assert!(rep.warnings()[0].contains("Incorrect Content-Length: 100, should be 97"));
    assert!(mbox.is_dirty());

    let out = serialize(&mut mbox);
    let (mut reparsed, rep) = parse(&out);
    assert_eq!(rep.warning_count(), 0);
    let rep = report(&mut reparsed, false);
    assert_eq!(rep.warning_count(), 0);
}

// ─── S3: the Dovecot "From " bug ────────────────────────────────────

// The user's real 58-byte body; its second line is an ordinary text
// line that happens to be a valid "From " line.
const DOVECOT_CLEAN_BODY: &[u8] =
    b"line one\nFrom me@home Wed Jun 05 10:00:00 2019\nline three\n";
const DOVECOT_INJECTED: &[u8] = b"X-UID: 42\nContent-Length: 200\n";

fn dovecot_mailbox() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(
        b"From outer@example.com Thu Jan 04 10:00:00 2024\n\
          Subject: corrupted\n\
          Content-Length: 58\n\
          \n",
    );
    data.extend_from_slice(&DOVECOT_CLEAN_BODY[..47]);
    data.extend_from_slice(DOVECOT_INJECTED);
    data.extend_from_slice(&DOVECOT_CLEAN_BODY[47..]);
    data.extend_from_slice(b"\n");
    data.extend_from_slice(
        b"From after@example.com Fri Jan 05 11:30:00 2024\n\
          Subject: follower\n\
          Content-Length: 5\n\
          \n\
          tail\n\
          \n",
    );
    data
}

#[test]
fn test_s3_dovecot_bug_detected_and_repaired() {
    use mboxck::model::message::DovecotBug;

    let (mut mbox, _) = parse(&dovecot_mailbox());
    assert_eq!(mbox.count(), 2);
    assert_eq!(
        mbox.message(1).unwrap().dovecot_bug(),
        DovecotBug::X_UID_KEYS | DovecotBug::CONTENT_LENGTH
    );

    let rep = repair(&mut mbox, false);
    assert!(rep
        .warnings()
        .iter()
        .any(|w| w.contains("Corrupted by Dovecot")));

    let msg = mbox.message(1).unwrap();
    assert!(msg.dovecot_bug().is_empty());
    assert_eq!(msg.body().as_bytes(), DOVECOT_CLEAN_BODY);
    assert_eq!(
        msg.header("Content-Length").unwrap().as_bytes(),
        b"58"
    );

    let out = serialize(&mut mbox);
    let (_, rep) = parse(&out);
    assert_eq!(rep.warning_count(), 0);
}

#[test]
fn test_dovecot_detection_is_invertible() {
    let (mbox, _) = parse(&dovecot_mailbox());
    let corrupted = mbox.message(1).unwrap().body().to_vec();

    // The on-disk body is the repaired body with the artifacts put back.
    let repaired = {
        let (mut mbox, _) = parse(&dovecot_mailbox());
        repair(&mut mbox, false);
        mbox.message(1).unwrap().body().to_vec()
    };
    let mut rebuilt = repaired[..47].to_vec();
    rebuilt.extend_from_slice(DOVECOT_INJECTED);
    rebuilt.extend_from_slice(&repaired[47..]);
    assert_eq!(rebuilt, corrupted);
}

// ─── S4: synthesized Message-ID ─────────────────────────────────────

#[test]
fn test_s4_missing_message_id_synthesized() {
    let data = b"\
From alice@example.com Thu Jan 04 10:00:00 2024\n\
From: Alice <alice@example.com>\n\
Date: Thu, 04 Jan 2024 10:00:00 +0000\n\
Subject: no id\n\
Content-Length: 5\n\
\n\
body\n\
\n";
    let (mut mbox, _) = parse(data);
    repair(&mut mbox, true);

    let expected = {
        let mut ctx = md5::Context::new();
        ctx.consume(b"Alice <alice@example.com>");
        ctx.consume(b"Thu, 04 Jan 2024 10:00:00 +0000");
        ctx.consume(b"no id");
        ctx.consume(b"body\n");
        format!("<{:x}@synthesized-by-mfck>", ctx.compute())
    };
    assert_eq!(
        mbox.message(1).unwrap().header("Message-ID").unwrap().as_bytes(),
        expected.as_bytes()
    );
}

// ─── S5: duplicate removal ──────────────────────────────────────────

const DUPLICATES: &[u8] = b"\
From a@x Thu Jan 04 10:00:00 2024\n\
From: A <a@x>\n\
Subject: twin\n\
Message-ID: <twin@x>\n\
Content-Length: 10\n\
\n\
same body\n\
\n\
From a@x Thu Jan 04 10:00:00 2024\n\
From: A <a@x>\n\
Subject: twin\n\
Message-ID: <twin@x>\n\
Content-Length: 10\n\
\n\
same body\n\
\n";

#[test]
fn test_s5_duplicates_removed_once() {
    let (mut mbox, _) = parse(DUPLICATES);
    let mut rep = Reporter::silent();
    let mut prompter = AnswerDefault;
    let removed = unique_mailbox(&mut mbox, false, "cat", &mut prompter, &mut rep).unwrap();
    assert_eq!(removed, 1);
    assert!(mbox.message(2).unwrap().is_deleted());

    let out = serialize(&mut mbox);
    let (reparsed, _) = parse(&out);
    assert_eq!(reparsed.count(), 1);

    // Stability: surviving same-ID pairs must differ somewhere.
    let mut rep2 = Reporter::silent();
    let mut prompter2 = AnswerDefault;
    let removed_again =
        unique_mailbox(&mut mbox, false, "cat", &mut prompter2, &mut rep2).unwrap();
    assert_eq!(removed_again, 0);
}

// ─── S6: X-IMAPbase migration ───────────────────────────────────────

#[test]
fn test_s6_imapbase_moves_to_surviving_first() {
    let data = b"\
From seed@x Thu Jan 04 10:00:00 2024\n\
X-IMAPbase: 1234 5678\n\
Subject: uid seed\n\
Content-Length: 5\n\
\n\
seed\n\
\n\
From rest@x Fri Jan 05 11:00:00 2024\n\
Subject: keeper\n\
Content-Length: 5\n\
\n\
keep\n\
\n";
    let (mut mbox, _) = parse(data);
    mbox.message_mut(1).unwrap().set_deleted(true);

    let out = serialize(&mut mbox);
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("From rest@x"));
    assert!(!text.contains("uid seed"));
    assert_eq!(text.matches("X-IMAPbase: 1234 5678").count(), 1);
    assert_eq!(text.matches("X-IMAP").count(), 1);
}

// ─── Properties ─────────────────────────────────────────────────────

#[test]
fn test_round_trip_without_content_length() {
    let data: &[u8] = b"\
From a@x Thu Jan 04 10:00:00 2024\n\
Subject: folded\n\
\theader value\n\
\n\
plain body\n\
\n\
From b@x Fri Jan 05 11:00:00 2024\n\
Subject: second\n\
\n\
last body\n";
    let (mut mbox, rep) = parse(data);
    assert_eq!(rep.warning_count(), 0);
    assert!(!mbox.is_dirty());
    assert_eq!(serialize(&mut mbox), data);
}

#[test]
fn test_repair_is_idempotent() {
    let mut corpus = stale_cl_mailbox();
    corpus.extend_from_slice(&dovecot_mailbox());

    let (mut mbox, _) = parse(&corpus);
    repair(&mut mbox, true);
    let once = serialize(&mut mbox);

    let (mut mbox, _) = parse(&once);
    let rep = repair(&mut mbox, true);
    assert_eq!(rep.warning_count(), 0, "second repair found: {:?}", rep.warnings());
    let twice = serialize(&mut mbox);

    assert_eq!(once, twice);
}

#[test]
fn test_content_length_sound_after_repair() {
    let mut corpus = stale_cl_mailbox();
    corpus.extend_from_slice(&dovecot_mailbox());

    let (mut mbox, _) = parse(&corpus);
    repair(&mut mbox, true);

    for msg in mbox.messages() {
        assert!(msg.dovecot_bug().is_empty());
        let declared: usize = msg
            .header("Content-Length")
            .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
            .and_then(|s| s.trim().parse().ok())
            .expect("Content-Length present after strict repair");
        assert_eq!(declared, msg.body_len(), "message {}", msg.tag());
    }
}

// ─── Locked open ────────────────────────────────────────────────────

#[test]
fn test_open_holds_and_releases_the_dotlock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inbox");
    std::fs::write(&path, CLEAN).unwrap();

    let config = CoreConfig::default();
    let mut rep = Reporter::silent();
    let mbox = Mailbox::open(&path, &config, &mut rep).unwrap();
    assert_eq!(mbox.count(), 2);
    assert!(dir.path().join("inbox.lock").exists());

    drop(mbox);
    assert!(!dir.path().join("inbox.lock").exists());
}

#[test]
fn test_full_cycle_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inbox");
    std::fs::write(&path, stale_cl_mailbox()).unwrap();

    let config = CoreConfig::default();
    let mut rep = Reporter::silent();
    let mut mbox = Mailbox::open(&path, &config, &mut rep).unwrap();
    repair(&mut mbox, false);
    writer::save_mailbox(&mut mbox, false, &config, &mut rep).unwrap();
    drop(mbox);

    let written = std::fs::read(&path).unwrap();
    let (_, rep) = parse(&written);
    assert_eq!(rep.warning_count(), 0);
}
