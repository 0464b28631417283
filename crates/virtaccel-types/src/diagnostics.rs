//! Per-element results returned by the simulation engine.
//!
//! After propagating the beam, the engine reports one [`ElementOutput`] per
//! lattice element, in lattice order. Elements that produce no output
//! (drifts, valves, magnets without monitors) carry `None`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Names of the diagnostic quantities the runtime knows how to route.
///
/// Read-only channels are bound to `(element, quantity)` pairs; the engine
/// must key its [`DiagnosticRecord`] values with these names.
pub mod quantity {
    /// Horizontal centroid position.
    pub const X: &str = "x";
    /// Vertical centroid position.
    pub const Y: &str = "y";
    /// Diagonal centroid position (profile monitors with a diagonal wire).
    pub const XY: &str = "xy";
    /// Horizontal RMS beam size.
    pub const X_RMS: &str = "xrms";
    /// Vertical RMS beam size.
    pub const Y_RMS: &str = "yrms";
    /// Diagonal RMS beam size.
    pub const XY_RMS: &str = "xyrms";
    /// X-Y correlation coefficient.
    pub const CXY: &str = "cxy";
    /// Beam phase.
    pub const PHASE: &str = "phase";
    /// Beam kinetic energy.
    pub const ENERGY: &str = "energy";
}

/// Diagnostic quantities computed at one element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    values: BTreeMap<String, f64>,
}

impl DiagnosticRecord {
    /// Create an empty record.
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, quantity: impl Into<String>, value: f64) -> Self {
        self.values.insert(quantity.into(), value);
        self
    }

    /// Insert or replace a quantity.
    pub fn insert(&mut self, quantity: impl Into<String>, value: f64) {
        self.values.insert(quantity.into(), value);
    }

    /// Look up a quantity by name.
    pub fn get(&self, quantity: &str) -> Option<f64> {
        self.values.get(quantity).copied()
    }

    /// Iterate over `(quantity, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of quantities in the record.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record holds no quantities.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The engine's output for a single lattice element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementOutput {
    /// Lattice element name.
    pub element: String,
    /// Computed diagnostics, or `None` if this element type has no output.
    pub record: Option<DiagnosticRecord>,
}

impl ElementOutput {
    /// An element with diagnostics.
    pub fn with_record(element: impl Into<String>, record: DiagnosticRecord) -> Self {
        Self {
            element: element.into(),
            record: Some(record),
        }
    }

    /// An element without output.
    pub fn empty(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            record: None,
        }
    }
}

/// Ordered per-element results of one propagation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerElementDiagnostics {
    elements: Vec<ElementOutput>,
}

impl PerElementDiagnostics {
    /// Create an empty result set.
    pub const fn new() -> Self {
        Self {
            elements: Vec::new(),
        }
    }

    /// Append the next element's output.
    pub fn push(&mut self, output: ElementOutput) {
        self.elements.push(output);
    }

    /// Iterate over element outputs in lattice order.
    pub fn iter(&self) -> impl Iterator<Item = &ElementOutput> {
        self.elements.iter()
    }

    /// Number of elements reported.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether nothing was reported.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The record reported for a named element, if any.
    ///
    /// When an element name appears more than once the first record wins.
    pub fn record_for(&self, element: &str) -> Option<&DiagnosticRecord> {
        self.elements
            .iter()
            .filter(|o| o.element == element)
            .find_map(|o| o.record.as_ref())
    }
}

impl FromIterator<ElementOutput> for PerElementDiagnostics {
    fn from_iter<I: IntoIterator<Item = ElementOutput>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn record_lookup_by_quantity() {
        let record = DiagnosticRecord::new()
            .with(quantity::X, 0.001)
            .with(quantity::ENERGY, 12.5);
        assert_eq!(record.get(quantity::X), Some(0.001));
        assert_eq!(record.get(quantity::Y), None);
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn record_for_skips_elements_without_output() {
        let diags: PerElementDiagnostics = [
            ElementOutput::empty("D1"),
            ElementOutput::with_record("BPM1", DiagnosticRecord::new().with(quantity::X, 1.0)),
        ]
        .into_iter()
        .collect();

        assert!(diags.record_for("D1").is_none());
        assert_eq!(
            diags.record_for("BPM1").and_then(|r| r.get(quantity::X)),
            Some(1.0)
        );
        assert!(diags.record_for("BPM2").is_none());
        assert_eq!(diags.len(), 2);
    }
}
