//! One simulation cycle.
//!
//! Each cycle runs these steps in order:
//!
//! 1. **Drain writes** -- echo every setpoint's confirmed value from the
//!    settings store onto its setpoint-readback channel.
//!
//! 2. **Snapshot + perturb** -- copy the store and apply noise to the
//!    fields behind read-write channels. The copy before noise is kept as
//!    the cycle's confirmed settings.
//!
//! 3. **Build** -- hand the perturbed copy to the [`ModelAdapter`].
//!
//! 4. **Propagate** -- run the [`SimulationEngine`]; its wall-clock
//!    duration decides the pacing branch.
//!
//! 5. **Map outputs** -- write diagnostics to read-only channels through
//!    the [`OutputMapper`].
//!
//! 6. **Publish** -- write the confirmed (unperturbed) setpoints to the
//!    readback channels, then the charge, status and sample counter.
//!
//! Steps 3 and 4 run on the blocking thread pool so monitor callbacks and
//! lifecycle calls are served while the engine works. A write that lands
//! during step 4 is picked up by the next cycle's snapshot.
//!
//! Pacing (the sleep after a cycle) belongs to the runner; [`pace_delay`]
//! computes it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use tracing::{debug, warn};
use virtaccel_types::{ChannelValue, PerElementDiagnostics, Status};

use crate::channel::{ChannelError, ChannelIo};
use crate::control::{ControlChannels, CycleControl};
use crate::engine::{BuildContext, BuildError, ModelAdapter, PropagateError, SimulationEngine};
use crate::noise::NoiseInjector;
use crate::output::OutputMapper;
use crate::settings::SettingsStore;
use crate::table::ChannelTable;

/// Errors that fail a single cycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CycleError {
    /// The adapter could not build a model.
    #[error("build error: {source}")]
    Build {
        /// The underlying adapter error.
        #[from]
        source: BuildError,
    },

    /// The engine failed to propagate.
    #[error("propagate error: {source}")]
    Propagate {
        /// The underlying engine error.
        #[from]
        source: PropagateError,
    },

    /// A channel read or write failed.
    #[error("channel error: {source}")]
    Channel {
        /// The underlying channel error.
        #[from]
        source: ChannelError,
    },

    /// The blocking task running the adapter and engine panicked or was
    /// cancelled. The adapter and engine are lost with it.
    #[error("engine task failed: {message}")]
    EngineTask {
        /// Panic or cancellation message.
        message: String,
    },
}

impl CycleError {
    /// Whether the runtime cannot continue after this error.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::EngineTask { .. })
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    /// Sample counter value published at the end of the cycle.
    pub sample: u64,
    /// Status published at the end of the cycle.
    pub status: Status,
    /// Time spent in the adapter.
    pub build: Duration,
    /// Time spent in the engine.
    pub propagate: Duration,
    /// Time from the start of propagation to the end of publishing.
    pub elapsed: Duration,
    /// Diagnostic channel writes issued.
    pub outputs_written: usize,
    /// Registered elements the engine produced no result for.
    pub missing_elements: Vec<String>,
}

/// Share of the nominal period added to the overrun threshold so that a
/// propagate step landing on the threshold still counts as on time.
pub const OVERRUN_TOLERANCE: f64 = 0.05;

/// Sleep after a cycle.
///
/// `propagate` is the engine's wall-clock time and decides the branch:
/// a step longer than `overrun_fraction` of the nominal `period` (plus
/// [`OVERRUN_TOLERANCE`]) sleeps for `overrun_sleep_fraction` of that
/// time. Otherwise the loop sleeps out the rest of the period, counted
/// from propagate start to the end of publishing (`elapsed`).
pub fn pace_delay(
    propagate: Duration,
    elapsed: Duration,
    period: Duration,
    overrun_fraction: f64,
    overrun_sleep_fraction: f64,
) -> Duration {
    let propagate_s = propagate.as_secs_f64();
    let threshold = period.as_secs_f64() * (overrun_fraction + OVERRUN_TOLERANCE);
    if propagate_s > threshold {
        Duration::try_from_secs_f64(propagate_s * overrun_sleep_fraction)
            .unwrap_or(Duration::ZERO)
    } else {
        period.saturating_sub(elapsed.max(propagate))
    }
}

/// Shared resources a cycle reads and writes.
pub struct CycleResources {
    /// Frozen channel declarations.
    pub table: Arc<ChannelTable>,
    /// Authoritative settings.
    pub store: Arc<SettingsStore>,
    /// Channel library.
    pub io: Arc<dyn ChannelIo>,
    /// Runtime-adjustable parameters.
    pub control: Arc<CycleControl>,
    /// Names of the control channels.
    pub channels: ControlChannels,
    /// Diagnostics-to-channel mapper.
    pub mapper: OutputMapper,
    /// Simulation data directory.
    pub data_dir: PathBuf,
    /// Runtime working directory.
    pub work_dir: PathBuf,
}

impl core::fmt::Debug for CycleResources {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CycleResources")
            .field("channels", &self.channels)
            .field("work_dir", &self.work_dir)
            .finish_non_exhaustive()
    }
}

/// Adapter and engine travelling together to the blocking pool.
struct Simulator<A, E> {
    adapter: A,
    engine: E,
}

struct Simulation {
    diagnostics: PerElementDiagnostics,
    charge_to_mass: Option<f64>,
    build: Duration,
    propagate: Duration,
    propagate_started: Instant,
}

impl<A, E> Simulator<A, E>
where
    A: ModelAdapter,
    E: SimulationEngine<Model = A::Model>,
{
    fn simulate(&mut self, ctx: &BuildContext<'_>) -> Result<Simulation, CycleError> {
        let build_started = Instant::now();
        let model = self.adapter.build(ctx)?;
        let build = build_started.elapsed();

        let propagate_started = Instant::now();
        let diagnostics = self.engine.propagate(&model)?;
        let propagate = propagate_started.elapsed();

        Ok(Simulation {
            diagnostics,
            charge_to_mass: self.adapter.charge_to_mass(&model),
            build,
            propagate,
            propagate_started,
        })
    }
}

/// Cycle state owned by the execution loop.
pub struct Cycle<A, E> {
    res: CycleResources,
    noise: NoiseInjector<SmallRng>,
    simulator: Option<Simulator<A, E>>,
    count: u64,
}

impl<A, E> core::fmt::Debug for Cycle<A, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cycle")
            .field("res", &self.res)
            .field("count", &self.count)
            .field("engine_available", &self.simulator.is_some())
            .finish_non_exhaustive()
    }
}

impl<A, E> Cycle<A, E>
where
    A: ModelAdapter,
    E: SimulationEngine<Model = A::Model>,
{
    /// Create a cycle driver.
    pub const fn new(res: CycleResources, adapter: A, engine: E, rng: SmallRng) -> Self {
        Self {
            res,
            noise: NoiseInjector::new(rng),
            simulator: Some(Simulator { adapter, engine }),
            count: 0,
        }
    }

    /// Number of cycles attempted so far.
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Run one cycle.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] if building, propagating or a channel write
    /// fails. Outputs and readbacks are not published for a failed cycle.
    pub async fn run(&mut self) -> Result<CycleSummary, CycleError> {
        self.count = self.count.saturating_add(1);
        let cycle = self.count;
        let table = Arc::clone(&self.res.table);

        // --- 1. Drain writes ---
        for rw in table.read_write() {
            if let Some(value) = self.res.store.get_binding(&rw.binding) {
                self.res.io.put(&rw.readset, ChannelValue::Number(value))?;
            }
        }

        // --- 2. Snapshot + perturb ---
        let confirmed = self.res.store.snapshot();
        let mut perturbed = confirmed.clone();
        self.noise.perturb(
            &mut perturbed,
            table.read_write().iter().map(|rw| &rw.binding),
            self.res.control.noise(),
        );

        // --- 3 + 4. Build and propagate off the async workers ---
        let mut simulator = self.simulator.take().ok_or_else(|| CycleError::EngineTask {
            message: "adapter and engine were lost in an earlier cycle".to_owned(),
        })?;
        let initial_beam = self.res.control.initial_beam();
        let data_dir = self.res.data_dir.clone();
        let work_dir = self.res.work_dir.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let ctx = BuildContext {
                settings: &perturbed,
                initial_beam: initial_beam.as_deref(),
                data_dir: &data_dir,
                work_dir: &work_dir,
                cycle,
            };
            let result = simulator.simulate(&ctx);
            (simulator, result)
        })
        .await;

        let (simulator, result) = joined.map_err(|e| CycleError::EngineTask {
            message: e.to_string(),
        })?;
        self.simulator = Some(simulator);
        let sim = result?;

        // --- 5. Map outputs ---
        let report = self.res.mapper.map(&table, &sim.diagnostics);
        for write in &report.writes {
            self.res
                .io
                .put(&write.channel, ChannelValue::Number(write.value))?;
        }
        if !report.is_complete() {
            warn!(
                cycle,
                missing = ?report.missing_elements,
                "Engine returned no output for registered elements"
            );
        }

        // --- 6. Publish ---
        for rw in table.read_write() {
            if let Some(value) = confirmed.get_binding(&rw.binding) {
                self.res.io.put(&rw.readback, ChannelValue::Number(value))?;
            }
        }
        if let Some(charge) = sim.charge_to_mass {
            self.res
                .io
                .put(&self.res.channels.charge, ChannelValue::Number(charge))?;
        }
        let status = if report.is_complete() {
            Status::Ok
        } else {
            Status::Err
        };
        self.put_status(status)?;
        let sample = self.res.control.record_sample();
        self.res
            .io
            .put(&self.res.channels.counter, ChannelValue::from(sample_value(sample)))?;

        let summary = CycleSummary {
            cycle,
            sample,
            status,
            build: sim.build,
            propagate: sim.propagate,
            elapsed: sim.propagate_started.elapsed(),
            outputs_written: report.writes.len(),
            missing_elements: report.missing_elements,
        };
        debug!(
            cycle,
            sample,
            build_ms = summary.build.as_millis(),
            propagate_ms = summary.propagate.as_millis(),
            outputs = summary.outputs_written,
            "Cycle complete"
        );
        Ok(summary)
    }

    /// Publish a degraded status after a failed cycle.
    pub fn report_failure(&self) {
        if let Err(e) = self.put_status(Status::Err) {
            warn!(error = %e, "Failed to publish degraded status");
        }
    }

    fn put_status(&self, status: Status) -> Result<(), ChannelError> {
        self.res
            .io
            .put(&self.res.channels.status, ChannelValue::from(status_value(status)))
    }
}

#[allow(clippy::cast_precision_loss)]
const fn sample_value(sample: u64) -> f64 {
    sample as f64
}

#[allow(clippy::cast_precision_loss)]
pub(crate) const fn status_value(status: Status) -> f64 {
    status.raw() as f64
}
