//! Quantity scalars: durations, dates, counts and rates.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A non-negative span of time with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Duration(u64);

impl Duration {
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Self(ms * 1_000_000)
    }

    pub const fn from_secs(s: u64) -> Self {
        Self(s * 1_000_000_000)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    pub fn to_std(self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0)
    }
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Self(d.as_nanos().min(u64::MAX as u128) as u64)
    }
}

impl fmt::Display for Duration {
    /// `1h30m`, `2s`, `250ms`, `0s`. Units are emitted largest-first and
    /// zero-valued components are skipped.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ns = self.0;
        if ns == 0 {
            return f.write_str("0s");
        }
        const UNITS: &[(u64, &str)] = &[
            (3_600_000_000_000, "h"),
            (60_000_000_000, "mn"),
            (1_000_000_000, "s"),
            (1_000_000, "ms"),
            (1_000, "us"),
            (1, "ns"),
        ];
        for &(size, suffix) in UNITS {
            let count = ns / size;
            if count > 0 {
                write!(f, "{count}{suffix}")?;
                ns -= count * size;
            }
        }
        Ok(())
    }
}

/// A point in time, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Date(DateTime<Utc>);

impl Date {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn inner(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

macro_rules! count_scalar {
    ($(#[$doc:meta])* $name:ident, $suffix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn new(count: i64) -> Self {
                Self(count)
            }

            pub const fn get(self) -> i64 {
                self.0
            }

            pub const fn is_negative(self) -> bool {
                self.0 < 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", self.0, $suffix)
            }
        }
    };
}

count_scalar!(
    /// A number of lines.
    LineCount,
    "ln"
);
count_scalar!(
    /// A number of runes (Unicode scalar values).
    RuneCount,
    "rn"
);
count_scalar!(
    /// An event rate per second.
    SimpleRate,
    "x/s"
);

/// A number of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteCount(pub i64);

impl ByteCount {
    pub const fn new(count: i64) -> Self {
        Self(count)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

const BYTE_UNITS: &[(i64, &str)] = &[
    (1_000_000_000_000, "TB"),
    (1_000_000_000, "GB"),
    (1_000_000, "MB"),
    (1_000, "kB"),
];

impl fmt::Display for ByteCount {
    /// Largest decimal unit that divides the count evenly; bytes otherwise.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &(size, suffix) in BYTE_UNITS {
            if self.0 != 0 && self.0 % size == 0 {
                return write!(f, "{}{}", self.0 / size, suffix);
            }
        }
        write!(f, "{}B", self.0)
    }
}

/// A byte throughput per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteRate(pub i64);

impl ByteRate {
    pub const fn new(rate: i64) -> Self {
        Self(rate)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for ByteRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s", ByteCount(self.0))
    }
}

/// A TCP/UDP port, optionally annotated with the scheme it serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    pub scheme: Option<super::primitives::Scheme>,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scheme {
            Some(scheme) => write!(f, ":{}/{}", self.number, scheme),
            None => write!(f, ":{}", self.number),
        }
    }
}

/// An sRGB color with alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }
}

/// Unix-style file permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMode(pub u32);

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0o{:o}", self.0)
    }
}

/// One of the i64-backed quantity kinds, used as range bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantity {
    ByteCount(ByteCount),
    LineCount(LineCount),
    RuneCount(RuneCount),
    ByteRate(ByteRate),
    SimpleRate(SimpleRate),
    Duration(Duration),
}

impl Quantity {
    /// Two quantities are comparable when they are the same kind.
    pub fn same_kind(&self, other: &Quantity) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::ByteCount(q) => q.fmt(f),
            Quantity::LineCount(q) => q.fmt(f),
            Quantity::RuneCount(q) => q.fmt(f),
            Quantity::ByteRate(q) => q.fmt(f),
            Quantity::SimpleRate(q) => q.fmt(f),
            Quantity::Duration(q) => q.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(Duration::from_secs(2).to_string(), "2s");
        assert_eq!(Duration::from_millis(250).to_string(), "250ms");
        assert_eq!(Duration::from_secs(5400).to_string(), "1h30mn");
        assert_eq!(Duration::from_nanos(0).to_string(), "0s");
    }

    #[test]
    fn byte_count_formatting() {
        assert_eq!(ByteCount(12).to_string(), "12B");
        assert_eq!(ByteCount(3_000).to_string(), "3kB");
        assert_eq!(ByteCount(1_500_000).to_string(), "1500kB");
        assert_eq!(ByteCount(2_000_000_000).to_string(), "2GB");
    }

    #[test]
    fn rate_formatting() {
        assert_eq!(ByteRate(1_000_000).to_string(), "1MB/s");
        assert_eq!(SimpleRate(50).to_string(), "50x/s");
    }
}
