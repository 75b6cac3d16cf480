//! Core data model: headers, messages, and the mailbox that owns them.

pub mod header;
pub mod mailbox;
pub mod message;
