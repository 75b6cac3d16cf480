//! User-facing notices and warnings.
//!
//! Three tiers: notices (suppressed when quiet), warnings (counted,
//! suppressed when quiet), and fatal errors (always reported, carried as
//! [`crate::error::MboxckError`] to the exit path). Warnings are recorded
//! so callers can report the total on exit.

use crate::parser::cursor::Cursor;

/// Lines of context shown before and after a parse warning with `-C`.
const CONTEXT_LINES: usize = 2;

/// Collects notices and warnings for one run.
#[derive(Debug, Default)]
pub struct Reporter {
    quiet: bool,
    verbose: bool,
    show_context: bool,
    warnings: Vec<String>,
}

impl Reporter {
    pub fn new(quiet: bool, verbose: bool, show_context: bool) -> Self {
        Self {
            quiet,
            verbose,
            show_context,
            warnings: Vec::new(),
        }
    }

    /// A reporter that records but never prints. Used by tests.
    pub fn silent() -> Self {
        Self::new(true, false, false)
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Informational notice. Suppressed in quiet mode.
    pub fn note(&mut self, msg: impl AsRef<str>) {
        if !self.quiet {
            println!("# {}", msg.as_ref());
        }
    }

    /// Warning: reported, counted.
    pub fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        if !self.quiet {
            eprintln!("! {msg}");
        }
        tracing::warn!("{msg}");
        self.warnings.push(msg);
    }

    /// Warning anchored at a cursor position; with `-C`, an excerpt of the
    /// surrounding lines is printed as well.
    pub fn warn_at(&mut self, cur: &Cursor, msg: impl Into<String>) {
        let msg = msg.into();
        if self.show_context && !self.quiet {
            eprintln!("! {msg}");
            for line in context_excerpt(cur.data(), cur.position(), CONTEXT_LINES) {
                eprintln!("| {line}");
            }
            tracing::warn!("{msg}");
            self.warnings.push(msg);
        } else {
            self.warn(msg);
        }
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Report the warning total and reset the counter. Used between files.
    pub fn flush_summary(&mut self) {
        let count = self.warnings.len();
        if count > 0 && self.verbose {
            eprintln!(
                "! {} warning{} issued",
                count,
                if count == 1 { " was" } else { "s were" }
            );
        }
        self.warnings.clear();
    }
}

/// Extract the lines around `pos`, lossily decoded for display.
fn context_excerpt(data: &[u8], pos: usize, lines: usize) -> Vec<String> {
    let pos = pos.min(data.len());
    let mut start = pos;
    let mut remaining = lines + 1;
    while start > 0 {
        if data[start - 1] == b'\n' {
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
        start -= 1;
    }
    let mut end = pos;
    let mut remaining = lines + 1;
    while end < data.len() {
        if data[end] == b'\n' {
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
        end += 1;
    }
    String::from_utf8_lossy(&data[start..end])
        .lines()
        .map(str::to_owned)
        .collect()
}
