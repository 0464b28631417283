//! Execution loop.
//!
//! [`run_loop`] repeats [`Cycle::run`] until a stop is requested or
//! failures escalate:
//!
//! - **Cooperative stop**: the stop flag is checked at the loop head only,
//!   so the cycle in progress always finishes. A stop request does cut
//!   the pace sleep short.
//! - **Containment**: a failed cycle publishes `ERR` on the status channel
//!   and the loop carries on with the next one.
//! - **Escalation**: `error_threshold` consecutive failures, or the loss of
//!   the adapter/engine task, end the loop with a [`FatalError`].
//! - **Pacing**: after each cycle the loop sleeps for [`pace_delay`] of the
//!   propagate step's duration, re-reading the rate every cycle.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::CycleConfig;
use crate::control::CycleControl;
use crate::cycle::{Cycle, CycleError, CycleSummary, pace_delay};
use crate::engine::{ModelAdapter, SimulationEngine};

/// An error that stops the runtime. Captured by the lifecycle controller
/// and returned from every `wait()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FatalError {
    /// Too many consecutive cycles failed.
    #[error("{consecutive} consecutive cycles failed; last error: {last}")]
    CycleFailures {
        /// Number of consecutive failures.
        consecutive: u32,
        /// The last cycle error.
        last: CycleError,
    },

    /// The bridge process exited while the runtime was running.
    #[error("bridge process exited unexpectedly ({status})")]
    BridgeExited {
        /// Exit status description.
        status: String,
    },

    /// The bridge process could no longer be supervised.
    #[error("bridge process supervision failed: {message}")]
    BridgeLost {
        /// Description of the failure.
        message: String,
    },

    /// The adapter/engine task panicked or was cancelled.
    #[error("engine task failed: {message}")]
    EngineTask {
        /// Panic or cancellation message.
        message: String,
    },

    /// The execution loop task itself failed.
    #[error("execution loop failed: {message}")]
    LoopTask {
        /// Panic or cancellation message.
        message: String,
    },
}

/// Why the loop ended.
#[derive(Debug, Clone)]
pub enum LoopEnd {
    /// A stop was requested.
    Stopped,
    /// A fatal error ended the loop.
    Escalated(FatalError),
}

/// Result of a loop run.
#[derive(Debug, Clone)]
pub struct LoopResult {
    /// Why the loop ended.
    pub end: LoopEnd,
    /// Cycles attempted.
    pub cycles: u64,
    /// Cycles that failed.
    pub failed_cycles: u64,
    /// The last successful cycle, if any.
    pub last_summary: Option<CycleSummary>,
}

/// Loop parameters fixed at start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    /// Consecutive failures before escalating; 0 never escalates.
    pub error_threshold: u32,
    /// See [`pace_delay`].
    pub overrun_fraction: f64,
    /// See [`pace_delay`].
    pub overrun_sleep_fraction: f64,
}

impl From<&CycleConfig> for LoopSettings {
    fn from(config: &CycleConfig) -> Self {
        Self {
            error_threshold: config.error_threshold,
            overrun_fraction: config.overrun_fraction,
            overrun_sleep_fraction: config.overrun_sleep_fraction,
        }
    }
}

/// Run cycles until stopped or escalated.
pub async fn run_loop<A, E>(
    mut cycle: Cycle<A, E>,
    control: Arc<CycleControl>,
    settings: LoopSettings,
) -> LoopResult
where
    A: ModelAdapter,
    E: SimulationEngine<Model = A::Model>,
{
    let mut consecutive_failures: u32 = 0;
    let mut failed_cycles: u64 = 0;
    let mut last_summary: Option<CycleSummary> = None;

    info!(
        rate_hz = control.rate_hz(),
        noise = control.noise(),
        error_threshold = settings.error_threshold,
        "Execution loop starting"
    );

    loop {
        // --- Check stop request (loop head only) ---
        if control.is_stop_requested() {
            info!(cycles = cycle.count(), "Stop requested");
            return LoopResult {
                end: LoopEnd::Stopped,
                cycles: cycle.count(),
                failed_cycles,
                last_summary,
            };
        }

        // --- Execute cycle ---
        let delay = match cycle.run().await {
            Ok(summary) => {
                consecutive_failures = 0;
                let delay = pace_delay(
                    summary.propagate,
                    summary.elapsed,
                    control.period(),
                    settings.overrun_fraction,
                    settings.overrun_sleep_fraction,
                );
                info!(
                    cycle = summary.cycle,
                    propagate_ms = summary.propagate.as_millis(),
                    elapsed_ms = summary.elapsed.as_millis(),
                    sleep_ms = delay.as_millis(),
                    "Simulation cycle finished"
                );
                last_summary = Some(summary);
                delay
            }
            Err(e) => {
                failed_cycles = failed_cycles.saturating_add(1);
                cycle.report_failure();

                if e.is_fatal() {
                    error!(cycle = cycle.count(), error = %e, "Engine task lost");
                    return LoopResult {
                        end: LoopEnd::Escalated(FatalError::EngineTask {
                            message: e.to_string(),
                        }),
                        cycles: cycle.count(),
                        failed_cycles,
                        last_summary,
                    };
                }

                consecutive_failures = consecutive_failures.saturating_add(1);
                warn!(
                    cycle = cycle.count(),
                    consecutive = consecutive_failures,
                    error = %e,
                    "Cycle failed"
                );

                if settings.error_threshold > 0 && consecutive_failures >= settings.error_threshold
                {
                    error!(
                        consecutive = consecutive_failures,
                        threshold = settings.error_threshold,
                        "Cycle failures persisted, stopping"
                    );
                    return LoopResult {
                        end: LoopEnd::Escalated(FatalError::CycleFailures {
                            consecutive: consecutive_failures,
                            last: e,
                        }),
                        cycles: cycle.count(),
                        failed_cycles,
                        last_summary,
                    };
                }
                control.period()
            }
        };

        // --- Pace ---
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = control.stop_requested() => {
                debug!("Pace sleep cut short by stop request");
            }
        }
    }
}

/// Log the end of a loop run.
pub fn log_loop_end(result: &LoopResult, control: &CycleControl) {
    match &result.end {
        LoopEnd::Stopped => info!(
            cycles = result.cycles,
            failed_cycles = result.failed_cycles,
            samples = control.samples(),
            uptime_s = control.elapsed_seconds(),
            "Execution loop ended"
        ),
        LoopEnd::Escalated(e) => error!(
            cycles = result.cycles,
            failed_cycles = result.failed_cycles,
            uptime_s = control.elapsed_seconds(),
            error = %e,
            "Execution loop ended with fatal error"
        ),
    }

    if let Some(ref summary) = result.last_summary {
        info!(
            cycle = summary.cycle,
            sample = summary.sample,
            status = %summary.status.as_str(),
            propagate_ms = summary.propagate.as_millis(),
            "Last completed cycle"
        );
    } else {
        warn!("Execution loop ended with no completed cycle");
    }
}
