//! `mboxck` — a consistency checker and repair tool for mbox files.
//!
//! This crate provides the core library: the tolerant mbox parser with
//! its message-boundary engine, the corruption checker and repairer, the
//! duplicate detector, and the atomic mailbox writer.

pub mod check;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod report;
pub mod shell;
pub mod source;
pub mod writer;
