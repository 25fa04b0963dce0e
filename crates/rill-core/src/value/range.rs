//! Range values.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::quantity::Quantity;

/// An inclusive 64-bit integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntRange {
    pub start: i64,
    pub end: i64,
}

impl IntRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, n: i64) -> bool {
        n >= self.start && n <= self.end
    }

    pub fn len(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            self.end.abs_diff(self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// An inclusive range of runes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuneRange {
    pub start: char,
    pub end: char,
}

impl RuneRange {
    pub fn new(start: char, end: char) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, r: char) -> bool {
        r >= self.start && r <= self.end
    }
}

impl fmt::Display for RuneRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'..'{}'", self.start, self.end)
    }
}

/// An inclusive range between two quantities of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantityRange {
    pub start: Quantity,
    pub end: Quantity,
}

impl QuantityRange {
    pub fn new(start: Quantity, end: Quantity) -> Option<Self> {
        start.same_kind(&end).then_some(Self { start, end })
    }
}

impl fmt::Display for QuantityRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
