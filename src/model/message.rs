//! A single mail message and its mutation-tracking state.

use bitflags::bitflags;

use crate::model::header::HeaderList;
use crate::parser::envelope::EnvelopeDate;
use crate::source::buffer::Segment;

bitflags! {
    /// Which artifacts the Dovecot "From "-space corruption injected into
    /// a message body: any subset of the X-UID/X-Keywords pair, a fresh
    /// Content-Length, a Status header, and an extra blank line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DovecotBug: u8 {
        const X_UID_KEYS     = 0x01;
        const CONTENT_LENGTH = 0x02;
        const STATUS         = 0x04;
        const NEWLINE        = 0x08;
    }
}

/// One message of a mailbox.
///
/// While `dirty` is unset, `raw` still covers the verbatim on-disk extent
/// of the message (envelope line through end of body). Mutations go
/// through the setters here so the dirty bit cannot be missed.
#[derive(Debug, Clone)]
pub struct Message {
    number: usize,
    offset: usize,
    raw: Segment,
    envelope_line: Option<Segment>,
    envelope_sender: Option<Segment>,
    envelope_date: Option<EnvelopeDate>,
    headers: HeaderList,
    body: Segment,
    cached_message_id: Option<Option<Segment>>,
    deleted: bool,
    dirty: bool,
    dovecot_bug: DovecotBug,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        number: usize,
        offset: usize,
        raw: Segment,
        envelope_line: Option<Segment>,
        envelope_sender: Option<Segment>,
        envelope_date: Option<EnvelopeDate>,
        headers: HeaderList,
        body: Segment,
        dovecot_bug: DovecotBug,
    ) -> Self {
        Self {
            number,
            offset,
            raw,
            envelope_line,
            envelope_sender,
            envelope_date,
            headers,
            body,
            cached_message_id: None,
            deleted: false,
            dirty: false,
            dovecot_bug,
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub(crate) fn set_number(&mut self, number: usize) {
        self.number = number;
    }

    /// Human-readable label: `#<num> {@<byte offset>}`.
    pub fn tag(&self) -> String {
        format!("#{} {{@{}}}", self.number, self.offset)
    }

    pub fn raw(&self) -> &Segment {
        &self.raw
    }

    pub fn envelope_line(&self) -> Option<&Segment> {
        self.envelope_line.as_ref()
    }

    pub fn envelope_sender(&self) -> Option<&Segment> {
        self.envelope_sender.as_ref()
    }

    pub fn envelope_date(&self) -> Option<&EnvelopeDate> {
        self.envelope_date.as_ref()
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    /// First value of the named header.
    pub fn header(&self, key: &str) -> Option<&Segment> {
        self.headers.get(key)
    }

    pub fn set_header(&mut self, key: &str, value: Segment) {
        self.headers.set(key, value);
        if key.eq_ignore_ascii_case("Message-ID") {
            self.cached_message_id = None;
        }
        self.mark_dirty();
    }

    pub fn delete_header(&mut self, key: &str, all: bool) -> usize {
        let removed = self.headers.delete(key, all);
        if removed > 0 {
            self.mark_dirty();
        }
        removed
    }

    pub fn body(&self) -> &Segment {
        &self.body
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn set_body(&mut self, body: Segment) {
        self.body = body;
        self.mark_dirty();
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        if self.deleted != deleted {
            self.deleted = deleted;
            self.mark_dirty();
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn dovecot_bug(&self) -> DovecotBug {
        self.dovecot_bug
    }

    pub fn clear_dovecot_bug(&mut self) {
        self.dovecot_bug = DovecotBug::empty();
    }

    /// Cache and return the `Message-ID:` value. `None` when the message
    /// carries no such header.
    pub fn prime_message_id(&mut self) -> Option<&Segment> {
        if self.cached_message_id.is_none() {
            self.cached_message_id = Some(self.headers.get("Message-ID").cloned());
        }
        self.cached_message_id.as_ref().unwrap().as_ref()
    }

    /// The cached `Message-ID:` value, if `prime_message_id` ran.
    pub fn cached_message_id(&self) -> Option<&Segment> {
        self.cached_message_id.as_ref().and_then(|c| c.as_ref())
    }
}
