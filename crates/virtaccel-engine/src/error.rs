//! Error types for the launcher binary.
//!
//! [`EngineError`] wraps every failure mode between reading the
//! configuration and the runtime shutting down.

use virtaccel_core::RuntimeError;
use virtaccel_core::config::ConfigError;

/// Top-level error for the launcher binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Runtime configuration could not be loaded.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The machine description could not be loaded.
    #[error("machine description {path}: {source}")]
    Machine {
        /// Path of the description file.
        path: String,
        /// The underlying parse error.
        source: ConfigError,
    },

    /// The runtime failed to build, start or run.
    #[error("runtime error: {source}")]
    Runtime {
        /// The underlying runtime error.
        #[from]
        source: RuntimeError,
    },

    /// Waiting for Ctrl-C failed.
    #[error("signal handler error: {source}")]
    Signal {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
