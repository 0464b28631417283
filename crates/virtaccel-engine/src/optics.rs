//! Thin-lens centroid optics.
//!
//! A deliberately small beam model for running the runtime without an
//! external simulation code. Devices sit [`SPACING`] metres apart; magnets
//! act as thin lenses or kicks on the beam centroid, cavities change the
//! energy, and every device reports the centroid as it leaves. Beam sizes
//! are carried through unchanged apart from solenoid and quadrupole
//! focusing.

#![allow(clippy::suboptimal_flops)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;
use virtaccel_core::device::{Device, DeviceKind};
use virtaccel_core::engine::{
    BuildContext, BuildError, ModelAdapter, PropagateError, SimulationEngine,
};
use virtaccel_core::settings::Settings;
use virtaccel_types::{
    DiagnosticRecord, ElementOutput, FieldBinding, PerElementDiagnostics, quantity,
};

/// Distance between consecutive devices, in metres.
pub const SPACING: f64 = 1.0;

/// Effective length of magnets and electrostatic elements, in metres.
const EFFECTIVE_LENGTH: f64 = 0.25;

/// Beam pipe radius; a centroid outside it is lost.
const APERTURE: f64 = 0.02;

/// Energy gain of a cavity at full amplitude and crest phase, MeV/u.
const CAVITY_GAIN: f64 = 1.0;

/// RF frequency used for phase advance, Hz.
const RF_FREQUENCY: f64 = 80.5e6;

/// Atomic mass unit, MeV.
const AMU: f64 = 931.494;

/// Speed of light, m/s.
const C: f64 = 299_792_458.0;

/// Beam state at the start of the lattice.
///
/// Written as JSON to the beam control channel to override the default.
/// Missing keys keep their default value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamState {
    /// Horizontal position, m.
    pub x: f64,
    /// Horizontal angle, rad.
    pub xp: f64,
    /// Vertical position, m.
    pub y: f64,
    /// Vertical angle, rad.
    pub yp: f64,
    /// Horizontal RMS size, m.
    pub x_rms: f64,
    /// Vertical RMS size, m.
    pub y_rms: f64,
    /// Kinetic energy, MeV/u.
    pub energy: f64,
    /// RF phase, degrees.
    pub phase: f64,
    /// Charge-to-mass ratio Q/A.
    pub charge_to_mass: f64,
}

impl Default for BeamState {
    fn default() -> Self {
        Self {
            x: 0.0,
            xp: 0.0,
            y: 0.0,
            yp: 0.0,
            x_rms: 1.0e-3,
            y_rms: 1.0e-3,
            energy: 0.5,
            phase: 0.0,
            charge_to_mass: 0.138,
        }
    }
}

impl BeamState {
    /// Magnetic rigidity, T·m.
    fn rigidity(&self) -> f64 {
        let momentum = (self.energy * (self.energy + 2.0 * AMU)).sqrt();
        momentum / (C * 1e-6 * self.charge_to_mass)
    }

    /// Relativistic velocity, v/c.
    fn beta(&self) -> f64 {
        let gamma = 1.0 + self.energy / AMU;
        (1.0 - 1.0 / (gamma * gamma)).sqrt()
    }

    fn drift(&mut self, length: f64) {
        self.x += self.xp * length;
        self.y += self.yp * length;
        let beta = self.beta();
        if beta > 0.0 {
            self.phase = (self.phase + 360.0 * RF_FREQUENCY * length / (beta * C)) % 360.0;
        }
    }

    fn focus(&mut self, kx: f64, ky: f64) {
        self.xp -= kx * self.x;
        self.yp -= ky * self.y;
        self.x_rms *= (1.0 - kx * SPACING).abs().max(f64::EPSILON);
        self.y_rms *= (1.0 - ky * SPACING).abs().max(f64::EPSILON);
    }

    fn record(&self) -> DiagnosticRecord {
        DiagnosticRecord::new()
            .with(quantity::X, self.x)
            .with(quantity::Y, self.y)
            .with(quantity::PHASE, self.phase)
            .with(quantity::ENERGY, self.energy)
    }

    fn profile(&self) -> DiagnosticRecord {
        let xy = (self.x + self.y) / std::f64::consts::SQRT_2;
        let xy_rms = self.x_rms.hypot(self.y_rms) / std::f64::consts::SQRT_2;
        self.record()
            .with(quantity::XY, xy)
            .with(quantity::X_RMS, self.x_rms)
            .with(quantity::Y_RMS, self.y_rms)
            .with(quantity::XY_RMS, xy_rms)
            .with(quantity::CXY, 0.0)
    }
}

/// One lattice element with its settings resolved.
#[derive(Debug, Clone, PartialEq)]
enum Optic {
    /// Thin lens with integrated strengths (1/m) per plane.
    Lens { kx: f64, ky: f64 },
    /// Angle kick, rad.
    Kick { h: f64, v: f64 },
    /// Lens followed by a kick (solenoid with corrector coils).
    LensKick { k: f64, h: f64, v: f64 },
    /// Sextupole with integrated strength (1/m^2).
    Sextupole { k2: f64 },
    /// Accelerating gap.
    Gap { amplitude: f64, phase: f64 },
    /// Horizontal deflection error of a bend, rad.
    Deflect { angle: f64 },
    /// Beam position monitor.
    Position,
    /// Beam profile monitor.
    Profile,
}

/// Built model: initial beam plus named optics in beam order.
#[derive(Debug, Clone, PartialEq)]
pub struct Lattice {
    beam: BeamState,
    optics: Vec<(String, Optic)>,
}

/// Builds a [`Lattice`] from the layout and each cycle's settings.
#[derive(Debug, Clone)]
pub struct ThinLensAdapter {
    layout: Vec<Device>,
}

impl ThinLensAdapter {
    /// Model every device of `layout` not masked as a drift.
    pub fn new(layout: Vec<Device>, drift_mask: &BTreeSet<String>) -> Self {
        let layout = layout
            .into_iter()
            .filter(|d| d.kind != DeviceKind::Passive && !drift_mask.contains(d.kind.code()))
            .collect();
        Self { layout }
    }

    fn optic(device: &Device, settings: &Settings, beam: &BeamState) -> Result<Optic, BuildError> {
        let field = |element: &str, name: &str| {
            settings
                .get(element, name)
                .ok_or_else(|| BuildError::MissingField {
                    binding: FieldBinding::new(element, name),
                })
        };
        let brho = beam.rigidity();
        let optic = match &device.kind {
            DeviceKind::Quad => {
                let k = field(&device.name, "GRAD")? * EFFECTIVE_LENGTH / brho;
                Optic::Lens { kx: k, ky: -k }
            }
            DeviceKind::EQuad => {
                let k = field(&device.name, "V")? * 1e-3 * EFFECTIVE_LENGTH;
                Optic::Lens { kx: k, ky: -k }
            }
            DeviceKind::Solenoid => {
                let k = solenoid_strength(field(&device.name, "B")?, brho);
                Optic::Lens { kx: k, ky: k }
            }
            DeviceKind::SolenoidCorrector {
                horizontal,
                vertical,
            } => Optic::LensKick {
                k: solenoid_strength(field(&device.name, "B")?, brho),
                h: field(horizontal, "ANG")?,
                v: field(vertical, "ANG")?,
            },
            DeviceKind::Corrector {
                horizontal,
                vertical,
            } => Optic::Kick {
                h: field(horizontal, "ANG")?,
                v: field(vertical, "ANG")?,
            },
            DeviceKind::Bend => Optic::Deflect {
                angle: (field(&device.name, "B")? - 1.0) * 1e-3,
            },
            DeviceKind::EBend => Optic::Deflect {
                angle: field(&device.name, "V")? * 1e-6,
            },
            DeviceKind::Sextupole => Optic::Sextupole {
                k2: field(&device.name, "B3")? * EFFECTIVE_LENGTH / brho,
            },
            DeviceKind::Cavity => Optic::Gap {
                amplitude: field(&device.name, "AMPLITUDE")?,
                phase: field(&device.name, "PHASE")?,
            },
            DeviceKind::Bpm => Optic::Position,
            DeviceKind::ProfileMonitor => Optic::Profile,
            DeviceKind::Passive => Optic::Kick { h: 0.0, v: 0.0 },
        };
        Ok(optic)
    }
}

fn solenoid_strength(field: f64, brho: f64) -> f64 {
    let half = field / (2.0 * brho);
    half * half * EFFECTIVE_LENGTH
}

impl ModelAdapter for ThinLensAdapter {
    type Model = Lattice;

    fn build(&mut self, ctx: &BuildContext<'_>) -> Result<Lattice, BuildError> {
        let beam = match ctx.initial_beam {
            Some(blob) if !blob.trim().is_empty() => {
                serde_json::from_str(blob).map_err(|e| BuildError::InvalidBeam {
                    reason: e.to_string(),
                })?
            }
            _ => BeamState::default(),
        };
        if !(beam.energy > 0.0 && beam.charge_to_mass > 0.0) {
            return Err(BuildError::InvalidBeam {
                reason: format!(
                    "energy {} and charge-to-mass {} must be positive",
                    beam.energy, beam.charge_to_mass
                ),
            });
        }

        let optics = self
            .layout
            .iter()
            .map(|d| Ok((d.name.clone(), Self::optic(d, ctx.settings, &beam)?)))
            .collect::<Result<Vec<_>, BuildError>>()?;
        debug!(cycle = ctx.cycle, elements = optics.len(), "Lattice built");
        Ok(Lattice { beam, optics })
    }

    fn charge_to_mass(&self, model: &Lattice) -> Option<f64> {
        Some(model.beam.charge_to_mass)
    }
}

/// Tracks the centroid through a [`Lattice`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThinLensEngine;

impl SimulationEngine for ThinLensEngine {
    type Model = Lattice;

    fn propagate(&mut self, model: &Lattice) -> Result<PerElementDiagnostics, PropagateError> {
        let mut beam = model.beam;
        let mut out = PerElementDiagnostics::new();

        for (name, optic) in &model.optics {
            beam.drift(SPACING);
            let record = match *optic {
                Optic::Lens { kx, ky } => {
                    beam.focus(kx, ky);
                    beam.record()
                }
                Optic::Kick { h, v } => {
                    beam.xp += h;
                    beam.yp += v;
                    beam.record()
                }
                Optic::LensKick { k, h, v } => {
                    beam.focus(k, k);
                    beam.xp += h;
                    beam.yp += v;
                    beam.record()
                }
                Optic::Sextupole { k2 } => {
                    let (x, y) = (beam.x, beam.y);
                    beam.xp -= k2 * (x * x - y * y);
                    beam.yp += 2.0 * k2 * x * y;
                    beam.record()
                }
                Optic::Gap { amplitude, phase } => {
                    let offset = (beam.phase - phase).to_radians();
                    beam.energy += CAVITY_GAIN * amplitude * offset.cos();
                    if beam.energy <= 0.0 {
                        return Err(PropagateError::BeamLost {
                            element: name.clone(),
                            reason: format!("decelerated to {:.4} MeV/u", beam.energy),
                        });
                    }
                    beam.record()
                }
                Optic::Deflect { angle } => {
                    beam.xp += angle;
                    beam.record()
                }
                Optic::Position => beam.record(),
                Optic::Profile => beam.profile(),
            };

            if !(beam.x.is_finite() && beam.y.is_finite()) {
                return Err(PropagateError::Failed {
                    reason: format!("non-finite centroid at {name}"),
                });
            }
            if beam.x.hypot(beam.y) > APERTURE {
                return Err(PropagateError::BeamLost {
                    element: name.clone(),
                    reason: format!("centroid ({:.4}, {:.4}) m outside aperture", beam.x, beam.y),
                });
            }
            out.push(ElementOutput::with_record(name.clone(), record));
        }
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::path::Path;

    use super::*;

    fn layout() -> Vec<Device> {
        vec![
            Device::new(
                "DC1",
                DeviceKind::Corrector {
                    horizontal: "DCH1".to_owned(),
                    vertical: "DCV1".to_owned(),
                },
            ),
            Device::new("D1", DeviceKind::Passive),
            Device::new("Q1", DeviceKind::Quad),
            Device::new("BPM1", DeviceKind::Bpm),
        ]
    }

    fn settings(kick: f64) -> Settings {
        Settings::new()
            .with("DCH1", "ANG", kick)
            .with("DCV1", "ANG", 0.0)
            .with("Q1", "GRAD", 0.0)
    }

    fn build(
        adapter: &mut ThinLensAdapter,
        settings: &Settings,
        beam: Option<&str>,
    ) -> Result<Lattice, BuildError> {
        adapter.build(&BuildContext {
            settings,
            initial_beam: beam,
            data_dir: Path::new("."),
            work_dir: Path::new("."),
            cycle: 1,
        })
    }

    #[test]
    fn kick_moves_downstream_bpm() {
        let mut adapter = ThinLensAdapter::new(layout(), &BTreeSet::new());
        let lattice = build(&mut adapter, &settings(1e-3), None).unwrap();
        let out = ThinLensEngine.propagate(&lattice).unwrap();

        // Passive elements are not modelled.
        assert_eq!(out.len(), 3);
        let x = out.record_for("BPM1").unwrap().get(quantity::X).unwrap();
        assert!((x - 2e-3).abs() < 1e-12);
        assert_eq!(out.record_for("DC1").unwrap().get(quantity::X), Some(0.0));
    }

    #[test]
    fn missing_setting_fails_build() {
        let mut adapter = ThinLensAdapter::new(layout(), &BTreeSet::new());
        let err = build(&mut adapter, &Settings::new(), None).unwrap_err();
        assert!(matches!(err, BuildError::MissingField { .. }));
    }

    #[test]
    fn beam_override_from_json() {
        let mut adapter = ThinLensAdapter::new(layout(), &BTreeSet::new());
        let lattice = build(&mut adapter, &settings(0.0), Some(r#"{"x": 0.001}"#)).unwrap();
        assert_eq!(adapter.charge_to_mass(&lattice), Some(0.138));
        let out = ThinLensEngine.propagate(&lattice).unwrap();
        let x = out.record_for("BPM1").unwrap().get(quantity::X).unwrap();
        assert!((x - 0.001).abs() < 1e-12);

        assert!(matches!(
            build(&mut adapter, &settings(0.0), Some("not json")),
            Err(BuildError::InvalidBeam { .. })
        ));
        assert!(matches!(
            build(&mut adapter, &settings(0.0), Some(r#"{"energy": -1.0}"#)),
            Err(BuildError::InvalidBeam { .. })
        ));
    }

    #[test]
    fn large_kick_loses_beam() {
        let mut adapter = ThinLensAdapter::new(layout(), &BTreeSet::new());
        let lattice = build(&mut adapter, &settings(0.05), None).unwrap();
        let err = ThinLensEngine.propagate(&lattice).unwrap_err();
        assert!(matches!(err, PropagateError::BeamLost { ref element, .. } if element == "Q1"));
    }

    #[test]
    fn drift_mask_removes_devices() {
        let mask: BTreeSet<String> = ["QUAD".to_owned()].into_iter().collect();
        let mut adapter = ThinLensAdapter::new(layout(), &mask);
        let settings = Settings::new()
            .with("DCH1", "ANG", 0.0)
            .with("DCV1", "ANG", 0.0);
        let lattice = build(&mut adapter, &settings, None).unwrap();
        let out = ThinLensEngine.propagate(&lattice).unwrap();
        assert!(out.record_for("Q1").is_none());
    }

    #[test]
    fn cavity_on_crest_adds_full_gain() {
        let mut adapter = ThinLensAdapter::new(
            vec![Device::new("CAV1", DeviceKind::Cavity)],
            &BTreeSet::new(),
        );
        let lattice = build(
            &mut adapter,
            &Settings::new().with("CAV1", "PHASE", 0.0).with("CAV1", "AMPLITUDE", 0.0),
            None,
        )
        .unwrap();
        let out = ThinLensEngine.propagate(&lattice).unwrap();
        let energy = out.record_for("CAV1").unwrap().get(quantity::ENERGY).unwrap();
        assert!((energy - 0.5).abs() < 1e-12);
    }
}
