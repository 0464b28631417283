//! Shared type definitions for the virtual accelerator runtime.
//!
//! This crate holds the plain-data vocabulary that flows between the
//! runtime, the lattice/model adapter, the simulation engine and the
//! channel library. It has no behaviour beyond small conversions.
//!
//! # Modules
//!
//! - [`binding`] -- [`FieldBinding`], the (device, field) key into the settings store
//! - [`enums`] -- Channel kinds, runtime lifecycle state, status values
//! - [`value`] -- [`ChannelValue`], the payload carried by channel reads and writes
//! - [`channel`] -- Channel metadata and drive-limit policies
//! - [`diagnostics`] -- Per-element results returned by the simulation engine

pub mod binding;
pub mod channel;
pub mod diagnostics;
pub mod enums;
pub mod value;

// Re-export all public types at crate root for convenience.
pub use binding::FieldBinding;
pub use channel::{ChannelMetadata, DriveLimit, DriveRange};
pub use diagnostics::{DiagnosticRecord, ElementOutput, PerElementDiagnostics, quantity};
pub use enums::{ChannelKind, RuntimeState, Status};
pub use value::ChannelValue;
