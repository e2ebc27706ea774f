//! Screen regions as the editor stores them.
//!
//! The editor writes regions as a dictionary literal with two coordinate
//! pairs, e.g. `{'start': (100, 200), 'end': (300, 400)}`. Both quote styles
//! and both tuple/list brackets are accepted on input; output always uses
//! the single-quote/tuple form so stored lines stay byte-compatible.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ParseError;

/// An absolute screen coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Rectangle spanned by a top-left `start` and a bottom-right `end` corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub start: Point,
    pub end: Point,
}

impl Region {
    pub const fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Horizontal extent; `i64` so corners at opposite ends of `i32` cannot overflow.
    pub fn width(&self) -> i64 {
        i64::from(self.end.x) - i64::from(self.start.x)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.end.y) - i64::from(self.start.y)
    }

    /// A region is usable for capture only when both extents are positive.
    pub fn is_valid(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{'start': {}, 'end': {}}}", self.start, self.end)
    }
}

/// Parse a region literal such as `{'start': (1, 2), 'end': (3, 4)}`.
pub fn parse_region(literal: &str) -> Result<Region, ParseError> {
    let fail = |reason: &'static str| ParseError::Region {
        literal: literal.to_string(),
        reason,
    };

    let body = literal
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| fail("expected a `{...}` literal"))?;

    let mut start = None;
    let mut end = None;
    for entry in split_top_level(body) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry
            .split_once(':')
            .ok_or_else(|| fail("entry without `:`"))?;
        let key = unquote(key.trim()).ok_or_else(|| fail("key must be a quoted string"))?;
        let point = parse_pair(value).ok_or_else(|| fail("value must be a pair of integers"))?;
        match key {
            "start" => start = Some(point),
            "end" => end = Some(point),
            _ => return Err(fail("unexpected key (only `start` and `end` are allowed)")),
        }
    }

    match (start, end) {
        (Some(start), Some(end)) => Ok(Region { start, end }),
        _ => Err(fail("both `start` and `end` are required")),
    }
}

/// Parse `(x, y)` (or `[x, y]`) into a point.
pub fn parse_point(text: &str) -> Option<Point> {
    parse_pair(text)
}

fn parse_pair(text: &str) -> Option<Point> {
    let text = text.trim();
    let inner = text
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .or_else(|| text.strip_prefix('[').and_then(|s| s.strip_suffix(']')))?;
    let (x, y) = inner.split_once(',')?;
    Some(Point {
        x: x.trim().parse().ok()?,
        y: y.trim().parse().ok()?,
    })
}

fn unquote(s: &str) -> Option<&str> {
    s.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

/// Split on commas that are not nested inside brackets.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut last = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[last..i]);
                last = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[last..]);
    parts
}
