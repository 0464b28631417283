//! Field bindings.
//!
//! A [`FieldBinding`] names one scalar quantity inside the simulated
//! machine. Several channels may share a binding: a magnet exposes a
//! setpoint, a setpoint echo and a readback for the same gradient.

use serde::{Deserialize, Serialize};

/// A (device name, physical field name) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldBinding {
    /// Name of the device (lattice element) that owns the field.
    pub device: String,
    /// Physical field name inside the device, e.g. `gradient` or `phase`.
    pub field: String,
}

impl FieldBinding {
    /// Create a binding from a device name and a field name.
    pub fn new(device: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            field: field.into(),
        }
    }
}

impl core::fmt::Display for FieldBinding {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.device, self.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_device_and_field() {
        let binding = FieldBinding::new("Q1", "gradient");
        assert_eq!(binding.to_string(), "Q1.gradient");
    }

    #[test]
    fn bindings_order_by_device_then_field() {
        let a = FieldBinding::new("Q1", "b");
        let b = FieldBinding::new("Q1", "c");
        let c = FieldBinding::new("Q2", "a");
        assert!(a < b);
        assert!(b < c);
    }
}
