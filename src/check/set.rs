//! Message sets: `1-5,8,10-*` style selections of messages by number.
//!
//! Grammar:
//!
//! ```text
//! set   = range ("," range)*
//! range = number ("-" (number | "*"))?   |   "*"
//! ```
//!
//! `*` denotes the last message number. Iteration yields the ascending
//! union of the ranges clamped to `[1, last]`; tombstones are not
//! filtered here, callers decide.

/// Inclusive `(min, max)` ranges in spec order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSet {
    ranges: Vec<(usize, usize)>,
}

impl MessageSet {
    /// Parse a set spec. `last` resolves `*`. Returns `None` on any
    /// syntax error or trailing garbage.
    pub fn parse(spec: &str, last: usize) -> Option<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return None;
        }
        if spec == "*" {
            return Some(Self {
                ranges: vec![(1, last)],
            });
        }

        let mut ranges = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if part == "*" {
                ranges.push((last, last));
                continue;
            }
            let (min_text, max_text) = match part.split_once('-') {
                None => (part, None),
                Some((a, b)) => (a, Some(b)),
            };
            let min: usize = min_text.trim().parse().ok()?;
            let max = match max_text.map(str::trim) {
                None => min,
                Some("") | Some("*") => last,
                Some(n) => n.parse().ok()?,
            };
            ranges.push((min, max));
        }

        Some(Self { ranges })
    }

    /// A set holding the single message `num`.
    pub fn single(num: usize) -> Self {
        Self {
            ranges: vec![(num, num)],
        }
    }

    pub fn contains(&self, num: usize) -> bool {
        self.ranges.iter().any(|&(min, max)| min <= num && num <= max)
    }

    /// Ascending numbers in `[1, last]` covered by any range.
    pub fn iter(&self, last: usize) -> impl Iterator<Item = usize> + '_ {
        (1..=last).filter(move |&n| self.contains(n))
    }

    /// Smallest covered number in `[1, last]`.
    pub fn first(&self, last: usize) -> Option<usize> {
        self.iter(last).next()
    }
}
