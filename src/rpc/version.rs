//! Method names and release versions.
//!
//! # Design Decisions
//! - Parsed once into newtypes; everything past parsing is infallible
//! - Hand-written matchers instead of regex (linear scan, no allocation)
//! - `ReleaseDate` orders lexically, which is chronological for `YYYY-MM-DD`

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const PREVIEW: &str = "preview";
const LATEST: &str = "latest";

/// Error returned when a method name or version does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid method name {0:?}: expected lowercase snake_case")]
    MethodName(String),
    #[error("invalid version {0:?}: expected YYYY-MM-DD, \"preview\" or \"latest\"")]
    Version(String),
}

/// An RPC method name: `^[a-z][a-z0-9]*(_[a-z0-9]+)*$`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodName(String);

impl MethodName {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if is_method_name(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(ParseError::MethodName(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_method_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    let Some(first) = bytes.first() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    let mut prev = *first;
    for &b in &bytes[1..] {
        match b {
            b'a'..=b'z' | b'0'..=b'9' => {}
            b'_' if prev != b'_' => {}
            _ => return false,
        }
        prev = b;
    }
    prev != b'_'
}

impl FromStr for MethodName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dated release, `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseDate(String);

impl ReleaseDate {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if is_release_date(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(ParseError::Version(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_release_date(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() != 10 || b[4] != b'-' || b[7] != b'-' {
        return false;
    }
    let digits = |range: std::ops::Range<usize>| b[range].iter().all(u8::is_ascii_digit);
    if !(digits(0..4) && digits(5..7) && digits(8..10)) {
        return false;
    }
    let two = |i: usize| (b[i] - b'0') * 10 + (b[i + 1] - b'0');
    let (month, day) = (two(5), two(8));
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

impl fmt::Display for ReleaseDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A version a client can request or a route can be registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Dated(ReleaseDate),
    /// Mutable bucket for experimental methods; never propagated.
    Preview,
    /// Synthetic alias for the highest dated version; never registered.
    Latest,
}

impl Version {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        match s {
            PREVIEW => Ok(Version::Preview),
            LATEST => Ok(Version::Latest),
            _ => ReleaseDate::parse(s).map(Version::Dated),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Version::Dated(date) => date.as_str(),
            Version::Preview => PREVIEW,
            Version::Latest => LATEST,
        }
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ReleaseDate> for Version {
    fn from(date: ReleaseDate) -> Self {
        Version::Dated(date)
    }
}
