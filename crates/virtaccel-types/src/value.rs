//! Channel payloads.

use serde::{Deserialize, Serialize};

/// A value read from or written to a channel.
///
/// Device settings and diagnostics are numbers. The status channel and the
/// initial beam-state override carry text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    /// A scalar number.
    Number(f64),
    /// A string value (enumeration state names, serialized blobs).
    Text(String),
}

impl ChannelValue {
    /// Interpret the value as a number.
    ///
    /// Text values are parsed after trimming whitespace, the same way a
    /// numeric record accepts a string put.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Borrow the text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

impl From<f64> for ChannelValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for ChannelValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for ChannelValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl core::fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}
