//! Enumeration types shared across the runtime.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Channel kinds
// ---------------------------------------------------------------------------

/// The direction of a channel relative to the simulated machine.
///
/// A read-write device field is exposed as three channels that share one
/// [`FieldBinding`](crate::FieldBinding): the setpoint an operator writes,
/// the echo of the confirmed setpoint, and the readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Write-only setpoint (catalog handle `setpoint`).
    Setpoint,
    /// Echo of the confirmed setpoint (catalog handle `readset`).
    #[serde(rename = "readset")]
    SetpointReadback,
    /// Read-only value (catalog handle `readback`).
    Readback,
}

impl ChannelKind {
    /// The channel-catalog handle string for this kind.
    pub const fn handle(self) -> &'static str {
        match self {
            Self::Setpoint => "setpoint",
            Self::SetpointReadback => "readset",
            Self::Readback => "readback",
        }
    }

    /// Parse a channel-catalog handle string.
    pub fn from_handle(handle: &str) -> Option<Self> {
        match handle {
            "setpoint" => Some(Self::Setpoint),
            "readset" => Some(Self::SetpointReadback),
            "readback" => Some(Self::Readback),
            _ => None,
        }
    }

    /// Whether external clients may write this channel.
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Setpoint)
    }
}

// ---------------------------------------------------------------------------
// Runtime lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a virtual accelerator.
///
/// Transitions only move forward:
/// `NotStarted -> Starting -> Running -> StopRequested -> CleaningUp -> Stopped`.
/// A fatal error skips `StopRequested` and goes straight to `CleaningUp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    /// Channels may still be registered.
    NotStarted,
    /// `start()` is spawning the bridge and subscribing.
    Starting,
    /// The execution loop is cycling.
    Running,
    /// `stop()` was called; the current cycle is finishing.
    StopRequested,
    /// The loop exited and resources are being released.
    CleaningUp,
    /// All resources released. Terminal.
    Stopped,
}

impl RuntimeState {
    /// Encode as a `u8` for atomic storage.
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::StopRequested => 3,
            Self::CleaningUp => 4,
            Self::Stopped => 5,
        }
    }

    /// Decode from the `u8` produced by [`as_u8`](Self::as_u8).
    ///
    /// Unknown values decode as [`Stopped`](Self::Stopped).
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::NotStarted,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::StopRequested,
            4 => Self::CleaningUp,
            _ => Self::Stopped,
        }
    }

    /// Whether the runtime currently owns the loop and the bridge process.
    pub const fn is_started(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Running | Self::StopRequested | Self::CleaningUp
        )
    }
}

impl core::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::StopRequested => "stop_requested",
            Self::CleaningUp => "cleaning_up",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Value published on the status control channel after every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The last cycle completed cleanly.
    #[serde(rename = "OK")]
    Ok,
    /// The last cycle failed or produced degraded output.
    #[serde(rename = "ERR")]
    Err,
}

impl Status {
    /// Display string, matching the binary record's state names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Err => "ERR",
        }
    }

    /// Raw value of the binary record (`ZNAM` = `ERR`, `ONAM` = `OK`).
    pub const fn raw(self) -> i64 {
        match self {
            Self::Ok => 1,
            Self::Err => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_round_trip() {
        for kind in [
            ChannelKind::Setpoint,
            ChannelKind::SetpointReadback,
            ChannelKind::Readback,
        ] {
            assert_eq!(ChannelKind::from_handle(kind.handle()), Some(kind));
        }
        assert_eq!(ChannelKind::from_handle("readwrite"), None);
    }

    #[test]
    fn only_setpoints_are_writable() {
        assert!(ChannelKind::Setpoint.is_writable());
        assert!(!ChannelKind::SetpointReadback.is_writable());
        assert!(!ChannelKind::Readback.is_writable());
    }

    #[test]
    fn runtime_state_encoding_is_stable() {
        for state in [
            RuntimeState::NotStarted,
            RuntimeState::Starting,
            RuntimeState::Running,
            RuntimeState::StopRequested,
            RuntimeState::CleaningUp,
            RuntimeState::Stopped,
        ] {
            assert_eq!(RuntimeState::from_u8(state.as_u8()), state);
        }
        assert_eq!(RuntimeState::from_u8(200), RuntimeState::Stopped);
    }

    #[test]
    fn started_covers_owned_states_only() {
        assert!(!RuntimeState::NotStarted.is_started());
        assert!(RuntimeState::Running.is_started());
        assert!(RuntimeState::CleaningUp.is_started());
        assert!(!RuntimeState::Stopped.is_started());
    }

    #[test]
    fn status_serializes_as_display_names() {
        let json = serde_json::to_string(&Status::Err).unwrap_or_default();
        assert_eq!(json, "\"ERR\"");
        assert_eq!(Status::Ok.as_str(), "OK");
        assert_eq!(Status::Ok.raw(), 1);
    }
}
