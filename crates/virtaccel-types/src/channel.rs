//! Channel metadata and drive limits.
//!
//! Metadata is fixed at registration time and ends up in the bridge
//! process's record configuration: description, engineering unit, display
//! precision and the optional drive range of a setpoint.

use serde::{Deserialize, Serialize};

/// Default display precision for numeric records.
pub const DEFAULT_PRECISION: u32 = 5;

/// How the drive range of a setpoint is derived from its initial value.
///
/// Exactly one policy applies per channel. [`DriveLimit::Unbounded`] means
/// the full numeric range is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveLimit {
    /// No limit.
    #[default]
    Unbounded,
    /// Explicit bounds.
    Explicit {
        /// Lowest accepted value.
        low: f64,
        /// Highest accepted value.
        high: f64,
    },
    /// Symmetric absolute bound: `[-|a|, +|a|]`.
    Absolute(f64),
    /// Bound relative to the initial value: `[v - |r|, v + |r|]`.
    Relative(f64),
    /// Ratio of the initial value: `[v - |v * k|, v + |v * k|]`.
    Ratio(f64),
}

impl DriveLimit {
    /// Resolve the policy against the field's initial value.
    ///
    /// Returns `None` for [`DriveLimit::Unbounded`].
    pub fn resolve(self, initial: f64) -> Option<DriveRange> {
        match self {
            Self::Unbounded => None,
            Self::Explicit { low, high } => Some(DriveRange::new(low, high)),
            Self::Absolute(a) => Some(DriveRange::new(-a.abs(), a.abs())),
            Self::Relative(r) => Some(DriveRange::new(initial - r.abs(), initial + r.abs())),
            Self::Ratio(k) => {
                let span = (initial * k).abs();
                Some(DriveRange::new(initial - span, initial + span))
            }
        }
    }
}

/// A resolved, ordered drive range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveRange {
    /// Lowest accepted value (`DRVL`).
    pub low: f64,
    /// Highest accepted value (`DRVH`).
    pub high: f64,
}

impl DriveRange {
    /// Build a range, swapping the bounds if they are given out of order.
    pub const fn new(low: f64, high: f64) -> Self {
        if low <= high {
            Self { low, high }
        } else {
            Self {
                low: high,
                high: low,
            }
        }
    }

    /// Clamp a requested value into the range.
    pub const fn clamp(&self, value: f64) -> f64 {
        if value < self.low {
            self.low
        } else if value > self.high {
            self.high
        } else {
            value
        }
    }
}

/// Descriptive metadata attached to a registered channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    /// Human-readable description (`DESC`).
    pub description: String,
    /// Engineering unit (`EGU`).
    pub unit: String,
    /// Display precision (`PREC`).
    pub precision: u32,
    /// Drive limit policy, only meaningful for setpoints.
    pub drive: DriveLimit,
}

impl ChannelMetadata {
    /// Metadata with the given description and unit, default precision and
    /// no drive limit.
    pub fn new(description: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            unit: unit.into(),
            precision: DEFAULT_PRECISION,
            drive: DriveLimit::Unbounded,
        }
    }

    /// Replace the drive limit policy.
    #[must_use]
    pub const fn with_drive(mut self, drive: DriveLimit) -> Self {
        self.drive = drive;
        self
    }

    /// Replace the display precision.
    #[must_use]
    pub const fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }
}

impl Default for ChannelMetadata {
    fn default() -> Self {
        Self::new("Element", "")
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_resolves_to_none() {
        assert_eq!(DriveLimit::Unbounded.resolve(10.0), None);
    }

    #[test]
    fn absolute_is_symmetric_around_zero() {
        let range = DriveLimit::Absolute(-0.001).resolve(0.5);
        assert_eq!(range, Some(DriveRange::new(-0.001, 0.001)));
    }

    #[test]
    fn relative_uses_relative_bound() {
        let range = DriveLimit::Relative(2.0).resolve(10.0);
        assert_eq!(range, Some(DriveRange::new(8.0, 12.0)));
    }

    #[test]
    fn ratio_handles_negative_initial_value() {
        let range = DriveLimit::Ratio(0.1).resolve(-10.0);
        assert_eq!(range, Some(DriveRange::new(-11.0, -9.0)));
    }

    #[test]
    fn explicit_bounds_are_ordered() {
        let range = DriveLimit::Explicit { low: 360.0, high: 0.0 }.resolve(90.0);
        assert_eq!(range, Some(DriveRange::new(0.0, 360.0)));
    }

    #[test]
    fn clamp_respects_bounds() {
        let range = DriveRange::new(0.0, 360.0);
        assert_eq!(range.clamp(400.0), 360.0);
        assert_eq!(range.clamp(-5.0), 0.0);
        assert_eq!(range.clamp(45.0), 45.0);
    }
}
