//! Device-kind factory.
//!
//! Turns a machine description (ordered device layout, channel catalog and
//! initial settings) into a [`VirtualAccelerator`] with every channel
//! registered. Dispatch is over the closed [`DeviceKind`] set: each kind's
//! field table says which channels it exposes and how they are labelled.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use virtaccel_types::{ChannelKind, ChannelMetadata, FieldBinding};

use crate::channel::ChannelIo;
use crate::config::{ConfigError, RuntimeConfig};
use crate::device::{Device, DeviceKind, Direction, FieldSpec, normalize_phase};
use crate::engine::{ModelAdapter, SimulationEngine};
use crate::lifecycle::{RuntimeError, VirtualAccelerator};
use crate::settings::Settings;
use crate::table::DeclareError;

/// One channel in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Full channel name.
    pub channel: String,
    /// Element (or corrector coil) the channel belongs to.
    pub element: String,
    /// Engineering field name.
    pub field: String,
    /// Role of the channel.
    pub handle: ChannelKind,
}

impl CatalogEntry {
    /// Create an entry.
    pub fn new(
        channel: impl Into<String>,
        element: impl Into<String>,
        field: impl Into<String>,
        handle: ChannelKind,
    ) -> Self {
        Self {
            channel: channel.into(),
            element: element.into(),
            field: field.into(),
            handle,
        }
    }
}

/// Ordered list of channels available to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelCatalog {
    entries: Vec<CatalogEntry>,
}

impl ChannelCatalog {
    /// Wrap a list of entries.
    pub const fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First channel matching element, engineering field and handle.
    pub fn find(&self, element: &str, field: &str, handle: ChannelKind) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.element == element && e.field == field && e.handle == handle)
            .map(|e| e.channel.as_str())
    }

    /// Like [`find`](Self::find), but a miss is an error.
    ///
    /// # Errors
    ///
    /// Returns [`DeclareError::ChannelNotFound`] when nothing matches.
    pub fn require(
        &self,
        element: &str,
        field: &str,
        handle: ChannelKind,
    ) -> Result<&str, DeclareError> {
        self.find(element, field, handle)
            .ok_or_else(|| DeclareError::ChannelNotFound {
                element: element.to_owned(),
                field: field.to_owned(),
                handle,
            })
    }

    /// Channel prefix derived from the first entry.
    ///
    /// Names follow `[PREFIX:]SYSTEM:DEVICE:FIELD`; the prefix keeps its
    /// trailing colon so control channels read `PREFIX:SVR:...`. A name with
    /// exactly three components has no prefix.
    ///
    /// # Errors
    ///
    /// Returns [`DeclareError::EmptyCatalog`] for an empty catalog and
    /// [`DeclareError::ChannelPrefix`] when the first name has fewer than
    /// three components.
    pub fn prefix(&self) -> Result<Option<String>, DeclareError> {
        let first = self.entries.first().ok_or(DeclareError::EmptyCatalog)?;
        let parts: Vec<&str> = first.channel.rsplitn(4, ':').collect();
        match parts.as_slice() {
            [_, _, _, prefix] => Ok(Some(format!("{prefix}:"))),
            [_, _, _] => Ok(None),
            _ => Err(DeclareError::ChannelPrefix {
                channel: first.channel.clone(),
            }),
        }
    }
}

/// Everything the factory needs to know about a machine, as loaded from
/// a YAML document:
///
/// ```yaml
/// layout:
///   - name: LS1_CA01:CAV1_D1127
///     kind: CAV
///   - name: LS1_CA01:BPM_D1129
///     kind: BPM
/// channels:
///   - channel: VA:LS1_CA01:CAV1_D1127:PHA_CSET
///     element: LS1_CA01:CAV1_D1127
///     field: PHA
///     handle: setpoint
/// settings:
///   LS1_CA01:CAV1_D1127: { PHASE: 325.0, AMPLITUDE: 0.64 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineDescription {
    /// Devices in beam order.
    #[serde(default)]
    pub layout: Vec<Device>,
    /// Channel catalog.
    #[serde(default)]
    pub channels: ChannelCatalog,
    /// Initial settings.
    #[serde(default)]
    pub settings: Settings,
}

impl MachineDescription {
    /// Load a machine description from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Yaml`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse a machine description from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not a valid
    /// description.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }
}

/// Builds a [`VirtualAccelerator`] from a machine description.
#[derive(Debug, Clone)]
pub struct VirtualAcceleratorFactory {
    machine: MachineDescription,
    config: RuntimeConfig,
}

impl VirtualAcceleratorFactory {
    /// Create a factory.
    pub const fn new(machine: MachineDescription, config: RuntimeConfig) -> Self {
        Self { machine, config }
    }

    /// Register every device's channels on a new runtime.
    ///
    /// Devices whose kind code is in `drift_mask` are treated as drifts.
    /// Cavity phases are wrapped into `[0, 360)` before registration. When
    /// the configuration has no channel prefix it is derived from the
    /// catalog.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Configuration`] if the catalog is empty or
    /// lacks a channel some device needs, or a registration is rejected.
    pub fn build<A, E>(
        self,
        io: Arc<dyn ChannelIo>,
        adapter: A,
        engine: E,
    ) -> Result<VirtualAccelerator<A, E>, RuntimeError>
    where
        A: ModelAdapter,
        E: SimulationEngine<Model = A::Model>,
    {
        let Self {
            machine:
                MachineDescription {
                    layout,
                    channels,
                    mut settings,
                },
            mut config,
        } = self;

        let derived = channels.prefix()?;
        if config.channel_prefix.is_none() {
            config.channel_prefix = derived;
        }

        let active: Vec<&Device> = layout
            .iter()
            .filter(|d| {
                let masked = config.drift_mask.contains(d.kind.code());
                if masked {
                    debug!(element = %d.name, kind = d.kind.code(), "Treating masked device as drift");
                }
                !masked && d.kind != DeviceKind::Passive
            })
            .collect();

        for device in &active {
            if device.kind == DeviceKind::Cavity {
                normalize_cavity_phase(&mut settings, &device.name);
            }
        }

        let mut va = VirtualAccelerator::new(config, settings, io, adapter, engine);
        let mut channel_count: usize = 0;
        for device in &active {
            for spec in device.kind.fields() {
                register_field(&mut va, &channels, device, spec)?;
                channel_count = channel_count.saturating_add(1);
            }
            va.append_elem(&device.name)?;
        }

        info!(
            devices = layout.len(),
            active = active.len(),
            fields = channel_count,
            prefix = va.config().prefix(),
            "Virtual accelerator built"
        );
        Ok(va)
    }
}

fn normalize_cavity_phase(settings: &mut Settings, element: &str) {
    let Some(phase) = settings.get(element, "PHASE") else {
        return;
    };
    let wrapped = normalize_phase(phase);
    if (wrapped - phase).abs() > f64::EPSILON {
        debug!(element, phase, wrapped, "Normalised cavity phase");
    }
    settings.set(element, "PHASE", wrapped);
}

fn register_field<A, E>(
    va: &mut VirtualAccelerator<A, E>,
    catalog: &ChannelCatalog,
    device: &Device,
    spec: &FieldSpec,
) -> Result<(), RuntimeError>
where
    A: ModelAdapter,
    E: SimulationEngine<Model = A::Model>,
{
    let element = device.part_name(spec.part);
    let binding = FieldBinding::new(element, spec.physics);
    let meta = ChannelMetadata::new(spec.description, spec.unit).with_drive(spec.drive);

    match spec.direction {
        Direction::ReadWrite => {
            let setpoint = catalog.require(element, spec.engineering, ChannelKind::Setpoint)?;
            let readset =
                catalog.require(element, spec.engineering, ChannelKind::SetpointReadback)?;
            let readback = catalog.require(element, spec.engineering, ChannelKind::Readback)?;
            va.append_rw(setpoint, readset, readback, binding, &meta)
        }
        Direction::ReadOnly => {
            let readback = catalog.require(element, spec.engineering, ChannelKind::Readback)?;
            va.append_ro(readback, binding, &meta)
        }
    }
}
