//! Settings store.
//!
//! [`Settings`] maps device name -> field name -> value. The
//! [`SettingsStore`] is the single authoritative copy: monitor callbacks
//! write into it, the execution loop snapshots it once per cycle. Every
//! critical section is a single map operation, so no writer can be seen
//! half-way through an update and no lock is held across an `.await`.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use virtaccel_types::FieldBinding;

/// A device/field/value table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    devices: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Settings {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
        }
    }

    /// Look up a field value.
    pub fn get(&self, device: &str, field: &str) -> Option<f64> {
        self.devices.get(device)?.get(field).copied()
    }

    /// Look up the value behind a binding.
    pub fn get_binding(&self, binding: &FieldBinding) -> Option<f64> {
        self.get(&binding.device, &binding.field)
    }

    /// Insert or replace a field value.
    pub fn set(&mut self, device: &str, field: &str, value: f64) {
        self.devices
            .entry(device.to_owned())
            .or_default()
            .insert(field.to_owned(), value);
    }

    /// Insert or replace the value behind a binding.
    pub fn set_binding(&mut self, binding: &FieldBinding, value: f64) {
        self.set(&binding.device, &binding.field, value);
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, device: &str, field: &str, value: f64) -> Self {
        self.set(device, field, value);
        self
    }

    /// Fields of one device.
    pub fn device(&self, device: &str) -> Option<&BTreeMap<String, f64>> {
        self.devices.get(device)
    }

    /// Iterate over devices in name order.
    pub fn devices(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, f64>)> {
        self.devices.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Total number of fields across all devices.
    pub fn field_count(&self) -> usize {
        self.devices.values().map(BTreeMap::len).sum()
    }
}

/// Shared, authoritative settings.
#[derive(Debug, Default)]
pub struct SettingsStore {
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Wrap an initial settings table.
    pub const fn new(initial: Settings) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    /// Current value of a field.
    pub fn get(&self, device: &str, field: &str) -> Option<f64> {
        self.read(|s| s.get(device, field))
    }

    /// Current value behind a binding.
    pub fn get_binding(&self, binding: &FieldBinding) -> Option<f64> {
        self.read(|s| s.get_binding(binding))
    }

    /// Set a field value.
    pub fn set(&self, device: &str, field: &str, value: f64) {
        self.write(|s| s.set(device, field, value));
    }

    /// Set the value behind a binding.
    pub fn set_binding(&self, binding: &FieldBinding, value: f64) {
        self.write(|s| s.set_binding(binding, value));
    }

    /// Insert a value only if the binding has none yet; returns the value
    /// now stored.
    pub fn seed_binding(&self, binding: &FieldBinding, value: f64) -> f64 {
        self.write(|s| match s.get_binding(binding) {
            Some(existing) => existing,
            None => {
                s.set_binding(binding, value);
                value
            }
        })
    }

    /// Deep, independent copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        self.read(Clone::clone)
    }

    fn read<R>(&self, f: impl FnOnce(&Settings) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Settings) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
