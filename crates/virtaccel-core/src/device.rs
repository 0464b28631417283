//! Device kinds and their channel field tables.
//!
//! Every lattice device belongs to one [`DeviceKind`]. Each kind carries a
//! static table of [`FieldSpec`]s describing which channels it exposes,
//! which settings field each one drives and how the channel is labelled.
//! The factory dispatches over this table instead of over element types.

use serde::{Deserialize, Serialize};
use virtaccel_types::{DriveLimit, quantity};

/// Whether a field is driven from a setpoint or only read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Setpoint, setpoint echo and readback.
    ReadWrite,
    /// Diagnostic readback only.
    ReadOnly,
}

/// Which sub-device a field belongs to.
///
/// Correctors are made of separately named horizontal and vertical
/// coils; every other device exposes its fields under its own name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    /// The device itself.
    Main,
    /// Horizontal corrector coil.
    Horizontal,
    /// Vertical corrector coil.
    Vertical,
}

/// One channel-backed field of a device kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    /// Sub-device owning the field.
    pub part: Part,
    /// Read-write or read-only.
    pub direction: Direction,
    /// Engineering field name used in the channel catalog.
    pub engineering: &'static str,
    /// Physics field name used as the settings / diagnostics key.
    pub physics: &'static str,
    /// Record description stem.
    pub description: &'static str,
    /// Engineering unit.
    pub unit: &'static str,
    /// Drive limit applied to the setpoint.
    pub drive: DriveLimit,
}

impl FieldSpec {
    const fn rw(
        part: Part,
        engineering: &'static str,
        physics: &'static str,
        description: &'static str,
        unit: &'static str,
    ) -> Self {
        Self {
            part,
            direction: Direction::ReadWrite,
            engineering,
            physics,
            description,
            unit,
            drive: DriveLimit::Unbounded,
        }
    }

    const fn ro(
        engineering: &'static str,
        physics: &'static str,
        description: &'static str,
        unit: &'static str,
    ) -> Self {
        Self {
            part: Part::Main,
            direction: Direction::ReadOnly,
            engineering,
            physics,
            description,
            unit,
            drive: DriveLimit::Unbounded,
        }
    }

    const fn limited(mut self, drive: DriveLimit) -> Self {
        self.drive = drive;
        self
    }
}

const CAVITY: &[FieldSpec] = &[
    FieldSpec::rw(Part::Main, "PHA", "PHASE", "Cavity Phase", "degree")
        .limited(DriveLimit::Explicit { low: 0.0, high: 360.0 }),
    FieldSpec::rw(Part::Main, "AMP", "AMPLITUDE", "Cavity Amplitude", "%"),
];

const SOLENOID: &[FieldSpec] = &[FieldSpec::rw(Part::Main, "I", "B", "Solenoid Field", "T")];

const SOLENOID_CORRECTOR: &[FieldSpec] = &[
    FieldSpec::rw(Part::Main, "I", "B", "Solenoid Field", "T"),
    FieldSpec::rw(Part::Horizontal, "I", "ANG", "Horizontal Corrector", "radian"),
    FieldSpec::rw(Part::Vertical, "I", "ANG", "Vertical Corrector", "radian"),
];

const CORRECTOR: &[FieldSpec] = &[
    FieldSpec::rw(Part::Horizontal, "I", "ANG", "Horizontal Corrector", "radian"),
    FieldSpec::rw(Part::Vertical, "I", "ANG", "Vertical Corrector", "radian"),
];

const BEND: &[FieldSpec] = &[FieldSpec::rw(Part::Main, "I", "B", "Bend Relative Field", "none")];

const EBEND: &[FieldSpec] = &[FieldSpec::rw(Part::Main, "V", "V", "EBend Field", "V")];

const QUAD: &[FieldSpec] = &[FieldSpec::rw(Part::Main, "I", "GRAD", "Quadrupole Gradient", "T/m")];

const EQUAD: &[FieldSpec] = &[FieldSpec::rw(Part::Main, "V", "V", "EQuad Field", "V")];

const SEXTUPOLE: &[FieldSpec] =
    &[FieldSpec::rw(Part::Main, "I", "B3", "Sextupole Gradient", "T/m^2")];

const BPM: &[FieldSpec] = &[
    FieldSpec::ro("X", quantity::X, "Horizontal Position", "m"),
    FieldSpec::ro("Y", quantity::Y, "Vertical Position", "m"),
    FieldSpec::ro("PHA", quantity::PHASE, "Beam Phase", "degree"),
    FieldSpec::ro("ENG", quantity::ENERGY, "Beam Energy", "MeV"),
];

const PROFILE_MONITOR: &[FieldSpec] = &[
    FieldSpec::ro("XCEN", quantity::X, "Horizontal Position", "m"),
    FieldSpec::ro("YCEN", quantity::Y, "Vertical Position", "m"),
    FieldSpec::ro("XY", quantity::XY, "Diagonal Position", "m"),
    FieldSpec::ro("XRMS", quantity::X_RMS, "Horizontal Size", "m"),
    FieldSpec::ro("YRMS", quantity::Y_RMS, "Vertical Size", "m"),
    FieldSpec::ro("XYRMS", quantity::XY_RMS, "Diagonal Size", "m"),
    FieldSpec::ro("CXY", quantity::CXY, "X-Y Correlation", "m"),
];

/// The closed set of device kinds.
///
/// Serialized with a `kind` tag holding the element type code
/// (`CAV`, `QUAD`, `BPM`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DeviceKind {
    /// RF cavity: phase and amplitude.
    #[serde(rename = "CAV")]
    Cavity,
    /// Solenoid: field.
    #[serde(rename = "SOL")]
    Solenoid,
    /// Solenoid with embedded corrector coils.
    #[serde(rename = "SOLCOR")]
    SolenoidCorrector {
        /// Horizontal coil name.
        horizontal: String,
        /// Vertical coil name.
        vertical: String,
    },
    /// Horizontal/vertical corrector pair.
    #[serde(rename = "COR")]
    Corrector {
        /// Horizontal coil name.
        horizontal: String,
        /// Vertical coil name.
        vertical: String,
    },
    /// Magnetic bend.
    #[serde(rename = "BEND")]
    Bend,
    /// Electrostatic bend.
    #[serde(rename = "EBEND")]
    EBend,
    /// Magnetic quadrupole.
    #[serde(rename = "QUAD")]
    Quad,
    /// Electrostatic quadrupole.
    #[serde(rename = "EQUAD")]
    EQuad,
    /// Sextupole.
    #[serde(rename = "SEXT")]
    Sextupole,
    /// Beam position monitor.
    #[serde(rename = "BPM")]
    Bpm,
    /// Beam profile monitor.
    #[serde(rename = "PM")]
    ProfileMonitor,
    /// Any element without channels (drift, valve, port, stripper, ...).
    #[serde(rename = "PASSIVE")]
    Passive,
}

impl DeviceKind {
    /// Element type code, as used by `drift_mask`.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Cavity => "CAV",
            Self::Solenoid => "SOL",
            Self::SolenoidCorrector { .. } => "SOLCOR",
            Self::Corrector { .. } => "COR",
            Self::Bend => "BEND",
            Self::EBend => "EBEND",
            Self::Quad => "QUAD",
            Self::EQuad => "EQUAD",
            Self::Sextupole => "SEXT",
            Self::Bpm => "BPM",
            Self::ProfileMonitor => "PM",
            Self::Passive => "PASSIVE",
        }
    }

    /// Channel field table for this kind. Empty for passive elements.
    pub const fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::Cavity => CAVITY,
            Self::Solenoid => SOLENOID,
            Self::SolenoidCorrector { .. } => SOLENOID_CORRECTOR,
            Self::Corrector { .. } => CORRECTOR,
            Self::Bend => BEND,
            Self::EBend => EBEND,
            Self::Quad => QUAD,
            Self::EQuad => EQUAD,
            Self::Sextupole => SEXTUPOLE,
            Self::Bpm => BPM,
            Self::ProfileMonitor => PROFILE_MONITOR,
            Self::Passive => &[],
        }
    }
}

/// A named device in the lattice layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Element name.
    pub name: String,
    /// Device kind, flattened into the same map.
    #[serde(flatten)]
    pub kind: DeviceKind,
}

impl Device {
    /// Create a device.
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Name under which a [`Part`] of this device is addressed.
    ///
    /// Devices without corrector coils answer with their own name.
    pub fn part_name(&self, part: Part) -> &str {
        match (&self.kind, part) {
            (
                DeviceKind::SolenoidCorrector { horizontal, .. }
                | DeviceKind::Corrector { horizontal, .. },
                Part::Horizontal,
            ) => horizontal,
            (
                DeviceKind::SolenoidCorrector { vertical, .. }
                | DeviceKind::Corrector { vertical, .. },
                Part::Vertical,
            ) => vertical,
            _ => &self.name,
        }
    }
}

/// Wrap a phase in degrees into `[0, 360)`.
pub fn normalize_phase(phase: f64) -> f64 {
    if !phase.is_finite() {
        return phase;
    }
    let wrapped = phase.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn field_tables_match_kinds() {
        assert_eq!(DeviceKind::Cavity.fields().len(), 2);
        assert_eq!(DeviceKind::Quad.fields().first().unwrap().physics, "GRAD");
        assert_eq!(DeviceKind::Bpm.fields().len(), 4);
        assert_eq!(DeviceKind::ProfileMonitor.fields().len(), 7);
        assert!(DeviceKind::Passive.fields().is_empty());
        assert!(
            DeviceKind::Bpm
                .fields()
                .iter()
                .all(|f| f.direction == Direction::ReadOnly)
        );
    }

    #[test]
    fn cavity_phase_is_limited() {
        let phase = DeviceKind::Cavity.fields().first().unwrap();
        assert_eq!(phase.drive, DriveLimit::Explicit { low: 0.0, high: 360.0 });
    }

    #[test]
    fn corrector_parts_resolve_to_coil_names() {
        let cor = Device::new(
            "DCH_D0100",
            DeviceKind::Corrector {
                horizontal: "DCH_D0100".to_owned(),
                vertical: "DCV_D0100".to_owned(),
            },
        );
        assert_eq!(cor.part_name(Part::Horizontal), "DCH_D0100");
        assert_eq!(cor.part_name(Part::Vertical), "DCV_D0100");
        assert_eq!(cor.part_name(Part::Main), "DCH_D0100");

        let quad = Device::new("QH_D0110", DeviceKind::Quad);
        assert_eq!(quad.part_name(Part::Vertical), "QH_D0110");
    }

    #[test]
    fn device_deserializes_from_yaml() {
        let yaml = r"
- name: CAV1
  kind: CAV
- name: SC1
  kind: SOLCOR
  horizontal: SC1_H
  vertical: SC1_V
- name: D1
  kind: PASSIVE
";
        let devices: Vec<Device> = serde_yml::from_str(yaml).unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices.first().unwrap().kind, DeviceKind::Cavity);
        assert_eq!(devices.get(1).unwrap().part_name(Part::Vertical), "SC1_V");
        assert_eq!(devices.get(2).unwrap().kind.code(), "PASSIVE");
    }

    #[test]
    fn phase_normalization() {
        assert_eq!(normalize_phase(0.0), 0.0);
        assert_eq!(normalize_phase(360.0), 0.0);
        assert_eq!(normalize_phase(725.0), 5.0);
        assert_eq!(normalize_phase(-90.0), 270.0);
        let tiny = normalize_phase(-1e-20);
        assert!((0.0..360.0).contains(&tiny));
    }
}
