//! Lifecycle controller.
//!
//! [`VirtualAccelerator`] is the runtime object a launcher owns. Channels
//! are registered on it while it is `NotStarted`; [`start`] then creates
//! the working directory, writes the record database, spawns the bridge
//! process, subscribes to every write-capable channel and schedules the
//! execution loop. The loop runs in its own task under a supervisor task
//! that also watches the bridge process and always runs cleanup:
//!
//! 1. close all subscriptions,
//! 2. send the bridge process SIGTERM, kill it after the stop timeout,
//!    and reap it,
//! 3. remove the working directory if the runtime created it,
//! 4. move to `Stopped` and publish the outcome to every [`wait`]er.
//!
//! [`RuntimeHandle`] is a cheap clone that other tasks use to stop the
//! runtime, query its state and wait for it.
//!
//! [`start`]: VirtualAccelerator::start
//! [`wait`]: RuntimeHandle::wait

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use virtaccel_types::{ChannelMetadata, ChannelValue, FieldBinding, RuntimeState, Status};

use crate::bridge::{self, BridgeError, BridgeProcess};
use crate::channel::{ChannelError, ChannelIo, MonitorCallback, Subscription};
use crate::config::{ConfigError, RuntimeConfig};
use crate::control::{ControlChannels, CycleControl};
use crate::cycle::{Cycle, CycleResources, status_value};
use crate::engine::{ModelAdapter, SimulationEngine};
use crate::output::OutputMapper;
use crate::runner::{self, FatalError, LoopEnd, LoopSettings};
use crate::settings::{Settings, SettingsStore};
use crate::table::{ChannelTable, DeclareError, ReadWriteChannels};
use crate::work_dir::{WorkDir, WorkDirError};

/// Problems with the runtime's configuration, reported before it starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// The simulation data directory does not exist.
    #[error("data directory not found: {}", path.display())]
    DataDirMissing {
        /// Configured data directory.
        path: PathBuf,
    },

    /// The working directory could not be set up.
    #[error(transparent)]
    WorkDir(#[from] WorkDirError),

    /// A channel declaration is malformed.
    #[error("channel declaration: {0}")]
    Declaration(#[from] DeclareError),

    /// The configuration document is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `start()` was called outside a Tokio runtime.
    #[error("start() must be called from within a Tokio runtime")]
    NoAsyncRuntime,
}

/// Errors returned by the lifecycle API.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime cannot start with its current configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The operation is only legal before `start()`.
    #[error("virtual accelerator already started (state: {state})")]
    AlreadyStarted {
        /// State at the time of the call.
        state: RuntimeState,
    },

    /// The operation needs a running runtime.
    #[error("virtual accelerator not started (state: {state})")]
    NotStarted {
        /// State at the time of the call.
        state: RuntimeState,
    },

    /// `wait()` gave up before cleanup finished. The runtime keeps going.
    #[error("timed out after {timeout:?} waiting for the virtual accelerator")]
    WaitTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The runtime stopped because of a fatal error.
    #[error("virtual accelerator failed: {0}")]
    Fatal(#[from] FatalError),

    /// The bridge process or its files could not be set up.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// A channel could not be initialised or subscribed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl From<DeclareError> for RuntimeError {
    fn from(e: DeclareError) -> Self {
        Self::Configuration(ConfigurationError::Declaration(e))
    }
}

impl From<WorkDirError> for RuntimeError {
    fn from(e: WorkDirError) -> Self {
        Self::Configuration(ConfigurationError::WorkDir(e))
    }
}

type Outcome = Result<(), FatalError>;

/// State shared between the owner, handles and the supervisor task.
#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    /// Bridge PID, 0 when no bridge is running.
    bridge_pid: AtomicU32,
    control: Arc<CycleControl>,
}

impl Shared {
    fn state(&self) -> RuntimeState {
        RuntimeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RuntimeState) {
        let prev = RuntimeState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel));
        debug!(from = %prev, to = %state, "Runtime state changed");
    }

    fn transition(&self, from: RuntimeState, to: RuntimeState) -> Result<(), RuntimeState> {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| debug!(%from, %to, "Runtime state changed"))
            .map_err(RuntimeState::from_u8)
    }
}

/// Cloneable handle for stopping, querying and waiting on a runtime.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    shared: Arc<Shared>,
    outcome: watch::Receiver<Option<Outcome>>,
}

impl RuntimeHandle {
    /// Request a cooperative stop. Does not block; the cycle in progress
    /// finishes first.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotStarted`] unless the runtime is
    /// `Running`.
    pub fn stop(&self) -> Result<(), RuntimeError> {
        self.shared
            .transition(RuntimeState::Running, RuntimeState::StopRequested)
            .map_err(|state| RuntimeError::NotStarted { state })?;
        info!("Stop requested");
        self.shared.control.request_stop();
        Ok(())
    }

    /// Whether the runtime owns its resources (between a successful
    /// `start()` and the end of cleanup).
    pub fn is_started(&self) -> bool {
        self.shared.state().is_started()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        self.shared.state()
    }

    /// PID of the running bridge process.
    pub fn bridge_pid(&self) -> Option<u32> {
        match self.shared.bridge_pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Runtime-adjustable cycle parameters.
    pub fn control(&self) -> &CycleControl {
        &self.shared.control
    }

    /// Wait until the loop has exited and cleanup has finished.
    ///
    /// A timeout only bounds how long the caller waits; it does not
    /// cancel anything. May be called any number of times.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::NotStarted`] if `start()` never succeeded.
    /// - [`RuntimeError::WaitTimeout`] if `timeout` elapsed first.
    /// - [`RuntimeError::Fatal`] with the error that stopped the runtime.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<(), RuntimeError> {
        let state = self.shared.state();
        if state == RuntimeState::NotStarted {
            return Err(RuntimeError::NotStarted { state });
        }

        let mut rx = self.outcome.clone();
        let finished = async move {
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|outcome| (*outcome).clone())
        };
        let outcome = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, finished).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => return Err(RuntimeError::WaitTimeout { timeout }),
            },
            None => finished.await,
        };

        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(RuntimeError::Fatal(e)),
            None => Err(RuntimeError::Fatal(FatalError::LoopTask {
                message: "supervisor ended without reporting an outcome".to_owned(),
            })),
        }
    }
}

/// A virtual accelerator: channel declarations, settings, and the
/// adapter/engine pair that simulates them.
pub struct VirtualAccelerator<A, E> {
    config: RuntimeConfig,
    table: Arc<ChannelTable>,
    store: Arc<SettingsStore>,
    io: Arc<dyn ChannelIo>,
    channels: ControlChannels,
    parts: Option<(A, E)>,
    handle: RuntimeHandle,
    outcome_tx: Option<watch::Sender<Option<Outcome>>>,
}

impl<A, E> core::fmt::Debug for VirtualAccelerator<A, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VirtualAccelerator")
            .field("state", &self.handle.state())
            .field("records", &self.table.records().len())
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

impl<A, E> VirtualAccelerator<A, E>
where
    A: ModelAdapter,
    E: SimulationEngine<Model = A::Model>,
{
    /// Create a runtime in the `NotStarted` state.
    ///
    /// `settings` is the initial settings table; every read-write channel
    /// registered later must find its binding in it.
    pub fn new(
        config: RuntimeConfig,
        settings: Settings,
        io: Arc<dyn ChannelIo>,
        adapter: A,
        engine: E,
    ) -> Self {
        let control = Arc::new(CycleControl::new(config.cycle.rate_hz, config.cycle.noise));
        let (outcome_tx, outcome) = watch::channel(None);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(RuntimeState::NotStarted.as_u8()),
            bridge_pid: AtomicU32::new(0),
            control,
        });
        Self {
            channels: ControlChannels::new(config.prefix()),
            config,
            table: Arc::new(ChannelTable::new()),
            store: Arc::new(SettingsStore::new(settings)),
            io,
            parts: Some((adapter, engine)),
            handle: RuntimeHandle { shared, outcome },
            outcome_tx: Some(outcome_tx),
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a setpoint / setpoint-readback / readback triple driving
    /// `binding`.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::AlreadyStarted`] after `start()`.
    /// - [`RuntimeError::Configuration`] if `binding` has no initial
    ///   setting or a channel name is empty or taken.
    pub fn append_rw(
        &mut self,
        setpoint: &str,
        readset: &str,
        readback: &str,
        binding: FieldBinding,
        meta: &ChannelMetadata,
    ) -> Result<(), RuntimeError> {
        self.ensure_not_started()?;
        let initial = self
            .store
            .get_binding(&binding)
            .ok_or_else(|| DeclareError::MissingSetting {
                binding: binding.clone(),
            })?;
        Arc::make_mut(&mut self.table).add_read_write(
            setpoint, readset, readback, binding, meta, initial,
        )?;
        Ok(())
    }

    /// Register a read-only diagnostic channel for `binding`
    /// (element, quantity). The store is seeded with the binding's current
    /// value, or 0.0 when it has none.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::AlreadyStarted`] after `start()`.
    /// - [`RuntimeError::Configuration`] if the name is empty or taken.
    pub fn append_ro(
        &mut self,
        readback: &str,
        binding: FieldBinding,
        meta: &ChannelMetadata,
    ) -> Result<(), RuntimeError> {
        self.ensure_not_started()?;
        let initial = self.store.get_binding(&binding).unwrap_or(0.0);
        Arc::make_mut(&mut self.table).add_read_only(readback, binding.clone(), meta, initial)?;
        self.store.seed_binding(&binding, initial);
        Ok(())
    }

    /// Register an element whose outputs are mapped every cycle.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AlreadyStarted`] after `start()`.
    pub fn append_elem(&mut self, element: &str) -> Result<(), RuntimeError> {
        self.ensure_not_started()?;
        Arc::make_mut(&mut self.table).add_element(element);
        Ok(())
    }

    fn ensure_not_started(&self) -> Result<(), RuntimeError> {
        match self.handle.state() {
            RuntimeState::NotStarted => Ok(()),
            state => Err(RuntimeError::AlreadyStarted { state }),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// A handle for other tasks.
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Whether the runtime owns its resources.
    pub fn is_started(&self) -> bool {
        self.handle.is_started()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        self.handle.state()
    }

    /// Channel declarations; includes the control channels once started.
    pub fn table(&self) -> &ChannelTable {
        &self.table
    }

    /// Names of the control channels.
    pub const fn control_channels(&self) -> &ControlChannels {
        &self.channels
    }

    /// Runtime configuration.
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Copy of the current authoritative settings.
    pub fn settings(&self) -> Settings {
        self.store.snapshot()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the runtime.
    ///
    /// Returns once the execution loop has been scheduled; the first cycle
    /// runs asynchronously. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::AlreadyStarted`] unless the state is `NotStarted`.
    /// - [`RuntimeError::Configuration`] if the data directory is missing,
    ///   an explicit working directory already exists, or the control
    ///   channels clash with registered ones.
    /// - [`RuntimeError::Bridge`] / [`RuntimeError::Channel`] if the
    ///   bridge cannot be started or channels cannot be set up.
    ///
    /// On error the runtime stays `NotStarted` and everything created so
    /// far is released.
    pub fn start(&mut self) -> Result<(), RuntimeError> {
        self.ensure_not_started()?;
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            return Err(ConfigurationError::NoAsyncRuntime.into());
        };
        if !self.config.data_dir.is_dir() {
            return Err(ConfigurationError::DataDirMissing {
                path: self.config.data_dir.clone(),
            }
            .into());
        }
        if let Some(path) = &self.config.work_dir {
            if path.exists() {
                return Err(WorkDirError::Exists { path: path.clone() }.into());
            }
        }

        self.handle
            .shared
            .transition(RuntimeState::NotStarted, RuntimeState::Starting)
            .map_err(|state| RuntimeError::AlreadyStarted { state })?;
        info!(
            data_dir = %self.config.data_dir.display(),
            records = self.table.records().len(),
            "Starting virtual accelerator"
        );

        match self.launch(&rt) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "Virtual accelerator failed to start");
                self.handle.shared.set_state(RuntimeState::NotStarted);
                Err(e)
            }
        }
    }

    /// Request a cooperative stop. See [`RuntimeHandle::stop`].
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotStarted`] unless the runtime is
    /// `Running`.
    pub fn stop(&self) -> Result<(), RuntimeError> {
        self.handle.stop()
    }

    /// Wait for the runtime to finish. See [`RuntimeHandle::wait`].
    ///
    /// # Errors
    ///
    /// See [`RuntimeHandle::wait`].
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<(), RuntimeError> {
        self.handle.wait(timeout).await
    }

    fn launch(&mut self, rt: &tokio::runtime::Handle) -> Result<(), RuntimeError> {
        let control = Arc::clone(&self.handle.shared.control);

        let mut table = (*self.table).clone();
        for record in self
            .channels
            .records(control.noise(), control.rate_hz())
        {
            table.add_control(record)?;
        }
        let table = Arc::new(table);

        let work_dir = WorkDir::create(self.config.work_dir.as_deref())?;
        info!(
            path = %work_dir.path().display(),
            temporary = work_dir.is_temporary(),
            "Working directory ready"
        );
        bridge::write_database(&table, &work_dir.path().join(&self.config.bridge.database_file))?;

        // From here on, an early return drops the bridge (killing it) and
        // the work directory (removing it if temporary).
        let bridge = BridgeProcess::spawn(&self.config.bridge, work_dir.path())?;

        self.initialise_control_channels(&control)?;
        let subscriptions = self.subscribe_all(&table, &control)?;

        let (adapter, engine) = self.parts.take().ok_or(RuntimeError::AlreadyStarted {
            state: self.handle.state(),
        })?;
        let outcome_tx = self.outcome_tx.take().ok_or(RuntimeError::AlreadyStarted {
            state: self.handle.state(),
        })?;
        let rng = self
            .config
            .cycle
            .seed
            .map_or_else(SmallRng::from_os_rng, SmallRng::seed_from_u64);

        let resources = CycleResources {
            table: Arc::clone(&table),
            store: Arc::clone(&self.store),
            io: Arc::clone(&self.io),
            control: Arc::clone(&control),
            channels: self.channels.clone(),
            mapper: OutputMapper::new(self.config.output.default_error_value),
            data_dir: self.config.data_dir.clone(),
            work_dir: work_dir.path().to_path_buf(),
        };
        let cycle = Cycle::new(resources, adapter, engine, rng);

        if let Some(pid) = bridge.pid() {
            self.handle.shared.bridge_pid.store(pid, Ordering::Release);
        }
        self.table = table;
        self.handle.shared.set_state(RuntimeState::Running);

        rt.spawn(supervise(
            cycle,
            bridge,
            subscriptions,
            work_dir,
            Arc::clone(&self.handle.shared),
            LoopSettings::from(&self.config.cycle),
            outcome_tx,
        ));
        info!(
            subscriptions = self.table.read_write().len(),
            elements = self.table.elements().len(),
            "Virtual accelerator started"
        );
        Ok(())
    }

    fn initialise_control_channels(&self, control: &CycleControl) -> Result<(), ChannelError> {
        let ch = &self.channels;
        self.io.put(&ch.noise, ChannelValue::Number(control.noise()))?;
        self.io.put(&ch.rate, ChannelValue::Number(control.rate_hz()))?;
        self.io.put(&ch.counter, ChannelValue::Number(0.0))?;
        self.io.put(&ch.status, ChannelValue::from(status_value(Status::Ok)))?;
        Ok(())
    }

    fn subscribe_all(
        &self,
        table: &ChannelTable,
        control: &Arc<CycleControl>,
    ) -> Result<Vec<Subscription>, ChannelError> {
        let mut subs = Vec::with_capacity(table.read_write().len().saturating_add(4));
        let result = self.subscribe_into(&mut subs, table, control);
        if result.is_err() {
            for sub in &subs {
                sub.close();
            }
        }
        result.map(|()| subs)
    }

    fn subscribe_into(
        &self,
        subs: &mut Vec<Subscription>,
        table: &ChannelTable,
        control: &Arc<CycleControl>,
    ) -> Result<(), ChannelError> {
        for rw in table.read_write() {
            subs.push(
                self.io
                    .subscribe(&rw.setpoint, setpoint_monitor(rw, Arc::clone(&self.store)))?,
            );
        }

        let ch = &self.channels;
        let c = Arc::clone(control);
        subs.push(self.io.subscribe(
            &ch.noise,
            Box::new(move |value| match value.as_f64().and_then(|v| c.set_noise(v)) {
                Some(prev) => info!(noise = ?value.as_f64(), prev, "Noise updated"),
                None => warn!(value = %value, "Rejected noise value"),
            }),
        )?);

        let c = Arc::clone(control);
        subs.push(self.io.subscribe(
            &ch.rate,
            Box::new(move |value| match value.as_f64().and_then(|v| c.set_rate_hz(v)) {
                Some(prev) => info!(rate_hz = ?value.as_f64(), prev, "Cycle rate updated"),
                None => warn!(value = %value, "Rejected cycle rate"),
            }),
        )?);

        let c = Arc::clone(control);
        subs.push(self.io.subscribe(
            &ch.counter,
            Box::new(move |value| {
                if let Some(n) = value.as_f64().and_then(counter_from) {
                    if n != c.samples() {
                        debug!(value = n, "Sample counter reset");
                        c.reset_samples(n);
                    }
                }
            }),
        )?);

        let c = Arc::clone(control);
        subs.push(self.io.subscribe(
            &ch.beam,
            Box::new(move |value| {
                let beam = value.as_text().map(str::to_owned);
                debug!(present = beam.is_some(), "Initial beam state updated");
                c.set_initial_beam(beam);
            }),
        )?);

        Ok(())
    }
}

fn setpoint_monitor(rw: &ReadWriteChannels, store: Arc<SettingsStore>) -> MonitorCallback {
    let channel = rw.setpoint.clone();
    let binding = rw.binding.clone();
    let drive = rw.drive;
    Box::new(move |value: ChannelValue| match value.as_f64() {
        Some(v) if v.is_finite() => {
            let applied = drive.map_or(v, |d| d.clamp(v));
            debug!(channel = %channel, value = applied, "Setpoint updated");
            store.set_binding(&binding, applied);
        }
        _ => warn!(channel = %channel, value = %value, "Ignoring non-numeric setpoint"),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn counter_from(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value as u64)
}

/// Run the loop, watch the bridge, and clean up whatever happens.
async fn supervise<A, E>(
    cycle: Cycle<A, E>,
    mut bridge: BridgeProcess,
    subscriptions: Vec<Subscription>,
    work_dir: WorkDir,
    shared: Arc<Shared>,
    settings: LoopSettings,
    outcome_tx: watch::Sender<Option<Outcome>>,
) where
    A: ModelAdapter,
    E: SimulationEngine<Model = A::Model>,
{
    let control = Arc::clone(&shared.control);
    let mut loop_task = tokio::spawn(runner::run_loop(cycle, Arc::clone(&control), settings));

    let (joined, bridge_fatal) = tokio::select! {
        joined = &mut loop_task => (joined, None),
        exit = bridge.exited() => {
            let fatal = match exit {
                Ok(status) => FatalError::BridgeExited { status: status.to_string() },
                Err(e) => FatalError::BridgeLost { message: e.to_string() },
            };
            error!(error = %fatal, "Bridge process lost, stopping");
            control.request_stop();
            (loop_task.await, Some(fatal))
        }
    };

    let loop_outcome = match joined {
        Ok(result) => {
            runner::log_loop_end(&result, &control);
            match result.end {
                LoopEnd::Stopped => Ok(()),
                LoopEnd::Escalated(e) => Err(e),
            }
        }
        Err(e) => {
            error!(error = %e, "Execution loop task failed");
            Err(FatalError::LoopTask {
                message: e.to_string(),
            })
        }
    };
    let outcome = bridge_fatal.map_or(loop_outcome, Err);

    // --- Cleanup ---
    shared.set_state(RuntimeState::CleaningUp);

    for sub in &subscriptions {
        sub.close();
    }
    debug!(count = subscriptions.len(), "Subscriptions closed");

    if let Err(e) = bridge.terminate().await {
        warn!(error = %e, "Bridge process cleanup failed");
    }
    shared.bridge_pid.store(0, Ordering::Release);

    let work_path = work_dir.path().to_path_buf();
    if let Err(e) = work_dir.close() {
        warn!(path = %work_path.display(), error = %e, "Working directory cleanup failed");
    }

    shared.set_state(RuntimeState::Stopped);
    match &outcome {
        Ok(()) => info!("Virtual accelerator stopped"),
        Err(e) => error!(error = %e, "Virtual accelerator stopped with fatal error"),
    }
    outcome_tx.send_replace(Some(outcome));
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use virtaccel_types::PerElementDiagnostics;

    use super::*;
    use crate::engine::{BuildContext, BuildError, PropagateError};
    use crate::memory::MemoryChannels;

    struct NullAdapter;

    impl ModelAdapter for NullAdapter {
        type Model = ();

        fn build(&mut self, _ctx: &BuildContext<'_>) -> Result<(), BuildError> {
            Ok(())
        }
    }

    struct NullEngine;

    impl SimulationEngine for NullEngine {
        type Model = ();

        fn propagate(&mut self, _model: &()) -> Result<PerElementDiagnostics, PropagateError> {
            Ok(PerElementDiagnostics::new())
        }
    }

    fn accelerator(config: RuntimeConfig) -> VirtualAccelerator<NullAdapter, NullEngine> {
        VirtualAccelerator::new(
            config,
            Settings::new().with("Q1", "GRAD", 10.0),
            Arc::new(MemoryChannels::new()),
            NullAdapter,
            NullEngine,
        )
    }

    fn quad_meta() -> ChannelMetadata {
        ChannelMetadata::new("Quadrupole Gradient", "T/m")
    }

    #[test]
    fn read_write_needs_initial_setting() {
        let mut va = accelerator(RuntimeConfig::default());
        let err = va
            .append_rw(
                "Q2:CSET",
                "Q2:RSET",
                "Q2:RD",
                FieldBinding::new("Q2", "GRAD"),
                &quad_meta(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Configuration(ConfigurationError::Declaration(
                DeclareError::MissingSetting { .. }
            ))
        ));
        assert!(va.table().read_write().is_empty());
    }

    #[test]
    fn registration_before_start() {
        let mut va = accelerator(RuntimeConfig::default());
        va.append_rw(
            "Q1:CSET",
            "Q1:RSET",
            "Q1:RD",
            FieldBinding::new("Q1", "GRAD"),
            &quad_meta(),
        )
        .unwrap();
        va.append_ro(
            "BPM1:X_RD",
            FieldBinding::new("BPM1", "x"),
            &ChannelMetadata::default(),
        )
        .unwrap();
        va.append_elem("BPM1").unwrap();

        assert_eq!(va.table().records().len(), 4);
        assert_eq!(va.state(), RuntimeState::NotStarted);
        assert!(!va.is_started());
    }

    #[test]
    fn read_only_registration_seeds_the_store() {
        let mut va = accelerator(RuntimeConfig::default());
        va.append_ro(
            "BPM1:X_RD",
            FieldBinding::new("BPM1", "x"),
            &ChannelMetadata::default(),
        )
        .unwrap();
        va.append_ro(
            "Q1:GRAD_RD",
            FieldBinding::new("Q1", "GRAD"),
            &quad_meta(),
        )
        .unwrap();

        let settings = va.settings();
        assert_eq!(settings.get("BPM1", "x"), Some(0.0));
        assert_eq!(settings.get("Q1", "GRAD"), Some(10.0));
    }

    #[test]
    fn stop_before_start_is_rejected() {
        let va = accelerator(RuntimeConfig::default());
        let err = va.stop().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::NotStarted {
                state: RuntimeState::NotStarted
            }
        ));
    }

    #[tokio::test]
    async fn wait_before_start_is_rejected() {
        let va = accelerator(RuntimeConfig::default());
        assert!(matches!(
            va.wait(Some(Duration::from_millis(10))).await,
            Err(RuntimeError::NotStarted { .. })
        ));
    }

    #[test]
    fn start_outside_async_runtime_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            data_dir: dir.path().to_path_buf(),
            ..RuntimeConfig::default()
        };
        let mut va = accelerator(config);
        let err = va.start().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Configuration(ConfigurationError::NoAsyncRuntime)
        ));
        assert_eq!(va.state(), RuntimeState::NotStarted);
    }

    #[tokio::test]
    async fn missing_data_dir_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            data_dir: dir.path().join("absent"),
            ..RuntimeConfig::default()
        };
        let mut va = accelerator(config);
        let err = va.start().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Configuration(ConfigurationError::DataDirMissing { .. })
        ));
        assert_eq!(va.state(), RuntimeState::NotStarted);
    }

    #[tokio::test]
    async fn existing_work_dir_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            data_dir: dir.path().to_path_buf(),
            work_dir: Some(dir.path().to_path_buf()),
            ..RuntimeConfig::default()
        };
        let mut va = accelerator(config);
        let err = va.start().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Configuration(ConfigurationError::WorkDir(WorkDirError::Exists { .. }))
        ));
    }

    #[tokio::test]
    async fn failed_bridge_spawn_rolls_back_state() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let mut config = RuntimeConfig {
            data_dir: dir.path().to_path_buf(),
            work_dir: Some(work.clone()),
            ..RuntimeConfig::default()
        };
        config.bridge.command = "definitely-not-a-bridge-binary".to_owned();
        let mut va = accelerator(config);

        let err = va.start().unwrap_err();
        assert!(matches!(err, RuntimeError::Bridge(BridgeError::Spawn { .. })));
        assert_eq!(va.state(), RuntimeState::NotStarted);
        // The caller-supplied directory was created and is kept.
        assert!(work.join("va.db").exists());
    }

    #[test]
    fn counter_conversion() {
        assert_eq!(counter_from(0.0), Some(0));
        assert_eq!(counter_from(41.7), Some(41));
        assert_eq!(counter_from(-1.0), None);
        assert_eq!(counter_from(f64::NAN), None);
    }
}
