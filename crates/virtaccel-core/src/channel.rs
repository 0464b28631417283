//! Channel I/O boundary.
//!
//! The runtime talks to channels through the three operations of a
//! channel library: [`ChannelIo::get`], [`ChannelIo::put`] and
//! [`ChannelIo::subscribe`]. The network protocol behind them belongs to
//! the bridge process and the library; the runtime never sees it.
//!
//! Monitor callbacks run on whatever thread the library delivers updates
//! on. They must be short and must not block.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use virtaccel_types::ChannelValue;

/// Errors reported by a channel library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The named channel is not known to the library or not connected.
    #[error("channel not found: {name}")]
    NotFound {
        /// Channel name.
        name: String,
    },

    /// The library rejected the operation.
    #[error("channel {name}: {message}")]
    Rejected {
        /// Channel name.
        name: String,
        /// Description of the failure.
        message: String,
    },
}

/// Callback invoked with each new value of a monitored channel.
pub type MonitorCallback = Box<dyn Fn(ChannelValue) + Send + Sync>;

/// The channel library surface the runtime depends on.
pub trait ChannelIo: Send + Sync {
    /// Read the current value of a channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the channel is unknown or unreachable.
    fn get(&self, name: &str) -> Result<ChannelValue, ChannelError>;

    /// Write a value to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the write is rejected.
    fn put(&self, name: &str, value: ChannelValue) -> Result<(), ChannelError>;

    /// Register a callback for value changes of a channel.
    ///
    /// The returned [`Subscription`] stops deliveries once closed.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the monitor cannot be established.
    fn subscribe(&self, name: &str, callback: MonitorCallback)
    -> Result<Subscription, ChannelError>;
}

/// Handle to an active monitor.
///
/// Closing is idempotent. Libraries must check [`Subscription::is_closed`]
/// (through the shared flag returned by [`Subscription::new`]) before
/// delivering an update.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    open: Arc<AtomicBool>,
}

impl Subscription {
    /// Create an open subscription for `channel`.
    ///
    /// Returns the handle and the shared flag the library keeps to decide
    /// whether to keep delivering.
    pub fn new(channel: impl Into<String>) -> (Self, Arc<AtomicBool>) {
        let open = Arc::new(AtomicBool::new(true));
        let sub = Self {
            channel: channel.into(),
            open: Arc::clone(&open),
        };
        (sub, open)
    }

    /// The monitored channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Stop further deliveries.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_flips_shared_flag() {
        let (sub, flag) = Subscription::new("Q1:GRAD_CSET");
        assert!(!sub.is_closed());
        assert!(flag.load(Ordering::Acquire));

        sub.close();
        sub.close();
        assert!(sub.is_closed());
        assert!(!flag.load(Ordering::Acquire));
        assert_eq!(sub.channel(), "Q1:GRAD_CSET");
    }
}
