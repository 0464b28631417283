//! Boundaries to the lattice/model adapter and the simulation engine.
//!
//! Both collaborators are synchronous and may take a long time. The
//! execution loop moves them onto the blocking thread pool for every
//! cycle, which is why both must be `Send + 'static`.

use std::path::Path;

use virtaccel_types::{FieldBinding, PerElementDiagnostics};

use crate::settings::Settings;

/// Errors raised by a [`ModelAdapter`] while building a model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A field binding the lattice needs is absent from the settings.
    #[error("missing setting {binding}")]
    MissingField {
        /// The absent binding.
        binding: FieldBinding,
    },

    /// The initial beam-state override could not be decoded.
    #[error("invalid initial beam state: {reason}")]
    InvalidBeam {
        /// Decoder message.
        reason: String,
    },

    /// Any other adapter failure.
    #[error("model build failed: {reason}")]
    Failed {
        /// Adapter message.
        reason: String,
    },
}

/// Errors raised by a [`SimulationEngine`] while propagating.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropagateError {
    /// The beam became unphysical at an element.
    #[error("beam lost at element {element}: {reason}")]
    BeamLost {
        /// Element where propagation stopped.
        element: String,
        /// Engine message.
        reason: String,
    },

    /// Any other engine failure.
    #[error("propagation failed: {reason}")]
    Failed {
        /// Engine message.
        reason: String,
    },
}

/// Everything an adapter may read while building one cycle's model.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    /// Perturbed settings for this cycle.
    pub settings: &'a Settings,
    /// Serialized initial beam state written to the beam control channel,
    /// if any.
    pub initial_beam: Option<&'a str>,
    /// Simulation data directory.
    pub data_dir: &'a Path,
    /// Runtime working directory, for any scratch files the adapter writes.
    pub work_dir: &'a Path,
    /// Number of the cycle being built, starting at 1.
    pub cycle: u64,
}

/// Turns a settings table into a ready-to-run model.
pub trait ModelAdapter: Send + 'static {
    /// The engine input produced by this adapter.
    type Model: Send + 'static;

    /// Build a model from the cycle's perturbed settings.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when a binding is missing or malformed.
    fn build(&mut self, ctx: &BuildContext<'_>) -> Result<Self::Model, BuildError>;

    /// Charge-to-mass ratio of the reference particle in `model`, if the
    /// adapter knows it.
    fn charge_to_mass(&self, _model: &Self::Model) -> Option<f64> {
        None
    }
}

/// Propagates a beam through a model.
pub trait SimulationEngine: Send + 'static {
    /// The model type consumed by this engine.
    type Model;

    /// Propagate through `model` and return one entry per lattice element.
    ///
    /// # Errors
    ///
    /// Returns [`PropagateError`] if propagation fails.
    fn propagate(&mut self, model: &Self::Model) -> Result<PerElementDiagnostics, PropagateError>;
}
