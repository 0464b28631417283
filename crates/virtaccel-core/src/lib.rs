//! Virtual accelerator runtime.
//!
//! This crate owns a live mapping between channel names and simulated
//! device settings, rebuilds and runs a beam simulation from those
//! settings at a fixed rate, and publishes the simulated diagnostics back
//! onto channels, while a companion bridge process serves the channels on
//! the network.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration into strongly-typed structs.
//! - [`channel`] -- [`ChannelIo`] boundary to the channel library.
//! - [`memory`] -- In-process channel library.
//! - [`settings`] -- Settings table and the shared [`SettingsStore`].
//! - [`table`] -- Channel declarations and the bridge record database.
//! - [`device`] -- Device kinds and their per-kind field tables.
//! - [`factory`] -- Builds a runtime from a machine description.
//! - [`engine`] -- [`ModelAdapter`] and [`SimulationEngine`] traits.
//! - [`noise`] -- Multiplicative settings noise.
//! - [`output`] -- Diagnostics-to-channel mapping.
//! - [`control`] -- Runtime-adjustable cycle parameters and control channels.
//! - [`cycle`] -- One simulation cycle.
//! - [`runner`] -- The paced execution loop and failure escalation.
//! - [`bridge`] -- The bridge child process.
//! - [`work_dir`] -- Temporary or caller-supplied working directory.
//! - [`lifecycle`] -- [`VirtualAccelerator`], start/stop/wait and cleanup.
//!
//! [`ChannelIo`]: channel::ChannelIo
//! [`SettingsStore`]: settings::SettingsStore
//! [`ModelAdapter`]: engine::ModelAdapter
//! [`SimulationEngine`]: engine::SimulationEngine
//! [`VirtualAccelerator`]: lifecycle::VirtualAccelerator

pub mod bridge;
pub mod channel;
pub mod config;
pub mod control;
pub mod cycle;
pub mod device;
pub mod engine;
pub mod factory;
pub mod lifecycle;
pub mod memory;
pub mod noise;
pub mod output;
pub mod runner;
pub mod settings;
pub mod table;
pub mod work_dir;

pub use lifecycle::{ConfigurationError, RuntimeError, RuntimeHandle, VirtualAccelerator};
