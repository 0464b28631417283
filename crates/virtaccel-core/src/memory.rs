//! In-process channel table.
//!
//! [`MemoryChannels`] implements [`ChannelIo`] over a plain map. Every
//! `put` stores the value and synchronously notifies the channel's open
//! monitors, which is what a channel library does when a record
//! processes. The launcher uses it to run without a network bridge;
//! tests use it to inject writes and observe published values.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use virtaccel_types::ChannelValue;

use crate::channel::{ChannelError, ChannelIo, MonitorCallback, Subscription};

type SharedCallback = Arc<dyn Fn(ChannelValue) + Send + Sync>;

struct Monitor {
    channel: String,
    open: Arc<AtomicBool>,
    callback: SharedCallback,
}

/// A channel table held in memory.
#[derive(Default)]
pub struct MemoryChannels {
    values: RwLock<HashMap<String, ChannelValue>>,
    monitors: RwLock<Vec<Monitor>>,
}

impl MemoryChannels {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions that have not been closed.
    pub fn open_subscriptions(&self) -> usize {
        self.monitors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.open.load(Ordering::Acquire))
            .count()
    }

    /// Current value of a channel without going through the trait.
    pub fn value(&self, name: &str) -> Option<ChannelValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Current value of a channel as a number.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(|v| v.as_f64())
    }
}

impl core::fmt::Debug for MemoryChannels {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let channels = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("MemoryChannels")
            .field("channels", &channels)
            .field("open_subscriptions", &self.open_subscriptions())
            .finish()
    }
}

impl ChannelIo for MemoryChannels {
    fn get(&self, name: &str) -> Result<ChannelValue, ChannelError> {
        self.value(name).ok_or_else(|| ChannelError::NotFound {
            name: name.to_owned(),
        })
    }

    fn put(&self, name: &str, value: ChannelValue) -> Result<(), ChannelError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), value.clone());

        // Collect first so callbacks run without holding the lock; a
        // callback may itself read the table.
        let callbacks: Vec<SharedCallback> = self
            .monitors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.channel == name && m.open.load(Ordering::Acquire))
            .map(|m| Arc::clone(&m.callback))
            .collect();

        for callback in callbacks {
            callback(value.clone());
        }
        Ok(())
    }

    fn subscribe(
        &self,
        name: &str,
        callback: MonitorCallback,
    ) -> Result<Subscription, ChannelError> {
        let (subscription, open) = Subscription::new(name);
        let mut monitors = self.monitors.write().unwrap_or_else(PoisonError::into_inner);
        // Drop monitors that were closed earlier.
        monitors.retain(|m| m.open.load(Ordering::Acquire));
        monitors.push(Monitor {
            channel: name.to_owned(),
            open,
            callback: Arc::from(callback),
        });
        Ok(subscription)
    }
}
