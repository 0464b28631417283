//! Virtual accelerator launcher.
//!
//! Wires a runtime together from two YAML files and runs it until Ctrl-C
//! or a fatal error. The beam is simulated by the thin-lens model in
//! [`optics`].
//!
//! Channels go through [`MemoryChannels`], an in-process stand-in for the
//! external channel library. The bridge process configured in the runtime
//! config is still spawned with the generated record database, but its
//! network clients do not reach this runtime: writes they make to the
//! bridge's records are not seen here, and values published here are not
//! served by the bridge. A deployment against a real control system
//! supplies a [`ChannelIo`] backed by that system's client library.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load runtime configuration from `virtaccel.yaml` (or `VA_CONFIG`)
//! 3. Load the machine description from `machine.yaml` (or `VA_MACHINE`)
//! 4. Build the runtime: one channel set per device
//! 5. Start the runtime and wait for Ctrl-C or a fatal error
//! 6. Stop and wait for cleanup

mod error;
mod optics;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use virtaccel_core::channel::ChannelIo;
use virtaccel_core::config::RuntimeConfig;
use virtaccel_core::factory::{MachineDescription, VirtualAcceleratorFactory};
use virtaccel_core::memory::MemoryChannels;

use crate::error::EngineError;
use crate::optics::{ThinLensAdapter, ThinLensEngine};

/// How long to wait for cleanup after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application entry point for the launcher.
///
/// # Errors
///
/// Returns an error if loading, building or starting the runtime fails,
/// or if the runtime stops with a fatal error.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("virtaccel-engine starting");

    // 2. Load configuration.
    let config = load_config()?;
    info!(
        data_dir = %config.data_dir.display(),
        rate_hz = config.cycle.rate_hz,
        noise = config.cycle.noise,
        error_threshold = config.cycle.error_threshold,
        bridge = %config.bridge.command,
        "Configuration loaded"
    );

    // 3. Load the machine description.
    let machine_path = env_path("VA_MACHINE", "machine.yaml");
    let machine =
        MachineDescription::from_file(&machine_path).map_err(|source| EngineError::Machine {
            path: machine_path.display().to_string(),
            source,
        })?;
    info!(
        devices = machine.layout.len(),
        channels = machine.channels.len(),
        settings = machine.settings.field_count(),
        "Machine description loaded"
    );

    // 4. Build the runtime.
    let adapter = ThinLensAdapter::new(machine.layout.clone(), &config.drift_mask);
    let io: Arc<dyn ChannelIo> = Arc::new(MemoryChannels::new());
    let mut va = VirtualAcceleratorFactory::new(machine, config)
        .build(io, adapter, ThinLensEngine)
        .map_err(EngineError::from)?;

    // 5. Start and run.
    va.start().map_err(EngineError::from)?;
    let handle = va.handle();
    info!(
        bridge_pid = ?handle.bridge_pid(),
        prefix = va.config().prefix(),
        "Virtual accelerator running, press Ctrl-C to stop"
    );

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|source| EngineError::Signal { source })?;
            info!("Interrupt received, stopping");
            if let Err(e) = handle.stop() {
                warn!(error = %e, "Stop request not accepted");
            }
            // 6. Wait for cleanup.
            va.wait(Some(SHUTDOWN_TIMEOUT)).await
        }
        outcome = va.wait(None) => outcome,
    };
    outcome.map_err(EngineError::from)?;

    info!(
        samples = handle.control().samples(),
        "virtaccel-engine shutdown complete"
    );
    Ok(())
}

/// Path from an environment variable, or a default relative to the
/// current working directory.
fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var_os(var).map_or_else(|| PathBuf::from(default), PathBuf::from)
}

/// Load the runtime configuration.
///
/// Falls back to defaults (plus environment overrides) when the file does
/// not exist.
fn load_config() -> Result<RuntimeConfig, EngineError> {
    let config_path = env_path("VA_CONFIG", "virtaccel.yaml");
    if config_path.exists() {
        Ok(RuntimeConfig::from_file(&config_path)?)
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        let mut config = RuntimeConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
