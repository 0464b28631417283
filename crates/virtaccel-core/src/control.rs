//! Runtime control state shared between the execution loop, monitor
//! callbacks and lifecycle handles.
//!
//! # Architecture
//!
//! Every field is an atomic (floats are stored as their bit patterns) or
//! a short `std` mutex, because monitor callbacks are synchronous and may
//! run on a channel library's own thread. Nothing here is held across an
//! `.await`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::table::{FieldValue, Record, RecordType};

/// Capacity of the initial beam-state record, in characters.
const BEAM_RECORD_SIZE: i64 = 65_536;

/// Cycle parameters and the stop flag.
#[derive(Debug)]
pub struct CycleControl {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wakes the pace sleep when a stop is requested.
    stop_notify: Notify,

    /// Target cycle rate in Hz, as `f64` bits.
    rate_hz: AtomicU64,

    /// Noise fraction, as `f64` bits.
    noise: AtomicU64,

    /// Completed-cycle counter published on the sample counter channel.
    samples: AtomicU64,

    /// Serialized initial beam state, if one was written.
    initial_beam: Mutex<Option<String>>,

    /// Wall-clock time when the control state was created.
    started_at: DateTime<Utc>,
}

impl CycleControl {
    /// Create control state with the given initial rate and noise.
    pub fn new(rate_hz: f64, noise: f64) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            rate_hz: AtomicU64::new(rate_hz.to_bits()),
            noise: AtomicU64::new(noise.to_bits()),
            samples: AtomicU64::new(0),
            initial_beam: Mutex::new(None),
            started_at: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Request a cooperative stop and wake the pace sleep.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        // notify_one stores a permit if nobody is waiting yet.
        self.stop_notify.notify_one();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested.
    pub async fn stop_requested(&self) {
        while !self.is_stop_requested() {
            self.stop_notify.notified().await;
        }
    }

    // -----------------------------------------------------------------------
    // Rate and noise
    // -----------------------------------------------------------------------

    /// Current target rate in Hz.
    pub fn rate_hz(&self) -> f64 {
        f64::from_bits(self.rate_hz.load(Ordering::Acquire))
    }

    /// Set the target rate. Returns the previous rate, or `None` if the
    /// value was rejected (not finite or not positive).
    pub fn set_rate_hz(&self, rate_hz: f64) -> Option<f64> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return None;
        }
        let prev = self.rate_hz.swap(rate_hz.to_bits(), Ordering::AcqRel);
        Some(f64::from_bits(prev))
    }

    /// Nominal cycle period, `1 / rate`.
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.rate_hz()).unwrap_or(Duration::MAX)
    }

    /// Current noise fraction.
    pub fn noise(&self) -> f64 {
        f64::from_bits(self.noise.load(Ordering::Acquire))
    }

    /// Set the noise fraction. Returns the previous value, or `None` if
    /// the value was rejected (not finite or negative).
    pub fn set_noise(&self, noise: f64) -> Option<f64> {
        if !noise.is_finite() || noise < 0.0 {
            return None;
        }
        let prev = self.noise.swap(noise.to_bits(), Ordering::AcqRel);
        Some(f64::from_bits(prev))
    }

    // -----------------------------------------------------------------------
    // Sample counter
    // -----------------------------------------------------------------------

    /// Completed cycles since start or the last reset.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Acquire)
    }

    /// Count one completed cycle and return the new count.
    pub fn record_sample(&self) -> u64 {
        let prev = self
            .samples
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(1))
            })
            .unwrap_or_else(|n| n);
        prev.saturating_add(1)
    }

    /// Overwrite the counter (external write to the counter channel).
    pub fn reset_samples(&self, value: u64) {
        self.samples.store(value, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Initial beam override
    // -----------------------------------------------------------------------

    /// Current initial beam-state override.
    pub fn initial_beam(&self) -> Option<String> {
        self.initial_beam
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the initial beam-state override. Blank text clears it.
    pub fn set_initial_beam(&self, beam: Option<String>) {
        let beam = beam.filter(|b| !b.trim().is_empty());
        *self
            .initial_beam
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = beam;
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    /// Seconds since the control state was created.
    pub fn elapsed_seconds(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds()
            .max(0)
    }
}

/// Names of the runtime's own control channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlChannels {
    /// Completed-cycle counter (`SVR:CNT`).
    pub counter: String,
    /// Noise fraction (`SVR:NOISE`).
    pub noise: String,
    /// Overall status, `OK`/`ERR` (`SVR:STATUS`).
    pub status: String,
    /// Charge-to-mass ratio reported by the adapter (`SVR:CHARGE`).
    pub charge: String,
    /// Cycle rate in Hz (`SVR:RATE`).
    pub rate: String,
    /// Initial beam-state override (`SVR:BEAM`).
    pub beam: String,
}

impl ControlChannels {
    /// Channel names under `prefix`.
    pub fn new(prefix: &str) -> Self {
        Self {
            counter: format!("{prefix}SVR:CNT"),
            noise: format!("{prefix}SVR:NOISE"),
            status: format!("{prefix}SVR:STATUS"),
            charge: format!("{prefix}SVR:CHARGE"),
            rate: format!("{prefix}SVR:RATE"),
            beam: format!("{prefix}SVR:BEAM"),
        }
    }

    /// Records for the bridge configuration, seeded with the initial
    /// noise and rate.
    pub fn records(&self, noise: f64, rate_hz: f64) -> Vec<Record> {
        let text = |s: &str| Some(FieldValue::Text(s.to_owned()));
        vec![
            Record {
                record_type: RecordType::Ai,
                name: self.counter.clone(),
                fields: vec![
                    ("DESC", text("Sample counter for scan client")),
                    ("VAL", Some(FieldValue::Int(0))),
                ],
            },
            Record {
                record_type: RecordType::Ao,
                name: self.noise.clone(),
                fields: vec![
                    ("DESC", text("Noise level of Virtual Accelerator")),
                    ("VAL", Some(FieldValue::Float(noise))),
                    ("PREC", Some(FieldValue::Int(5))),
                ],
            },
            Record {
                record_type: RecordType::Bi,
                name: self.status.clone(),
                fields: vec![
                    ("DESC", text("Status of Virtual Accelerator")),
                    ("VAL", Some(FieldValue::Int(1))),
                    ("ZNAM", text("ERR")),
                    ("ONAM", text("OK")),
                    ("PINI", text("1")),
                ],
            },
            Record {
                record_type: RecordType::Ai,
                name: self.charge.clone(),
                fields: vec![
                    ("DESC", text("Q/M of Virtual Accelerator")),
                    ("VAL", Some(FieldValue::Float(0.0))),
                    ("PREC", Some(FieldValue::Int(5))),
                ],
            },
            Record {
                record_type: RecordType::Ao,
                name: self.rate.clone(),
                fields: vec![
                    ("DESC", text("Cycle rate of Virtual Accelerator")),
                    ("VAL", Some(FieldValue::Float(rate_hz))),
                    ("PREC", Some(FieldValue::Int(3))),
                    ("EGU", text("Hz")),
                ],
            },
            Record {
                record_type: RecordType::Lso,
                name: self.beam.clone(),
                fields: vec![
                    ("DESC", text("Initial beam state of Virtual Accelerator")),
                    ("SIZV", Some(FieldValue::Int(BEAM_RECORD_SIZE))),
                ],
            },
        ]
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn rate_rejects_bad_values() {
        let control = CycleControl::new(1.0, 0.001);
        assert_eq!(control.set_rate_hz(0.0), None);
        assert_eq!(control.set_rate_hz(-2.0), None);
        assert_eq!(control.set_rate_hz(f64::NAN), None);
        assert_eq!(control.set_rate_hz(4.0), Some(1.0));
        assert_eq!(control.rate_hz(), 4.0);
        assert_eq!(control.period(), Duration::from_millis(250));
    }

    #[test]
    fn noise_rejects_negative() {
        let control = CycleControl::new(1.0, 0.001);
        assert_eq!(control.set_noise(-0.1), None);
        assert_eq!(control.set_noise(0.0), Some(0.001));
        assert_eq!(control.noise(), 0.0);
    }

    #[test]
    fn sample_counter_counts_and_resets() {
        let control = CycleControl::new(1.0, 0.0);
        assert_eq!(control.record_sample(), 1);
        assert_eq!(control.record_sample(), 2);
        control.reset_samples(0);
        assert_eq!(control.samples(), 0);
        assert_eq!(control.record_sample(), 1);
    }

    #[test]
    fn blank_beam_clears_override() {
        let control = CycleControl::new(1.0, 0.0);
        control.set_initial_beam(Some("{\"energy\": 0.5}".to_owned()));
        assert!(control.initial_beam().is_some());
        control.set_initial_beam(Some("  ".to_owned()));
        assert_eq!(control.initial_beam(), None);
    }

    #[test]
    fn control_channel_names_and_records() {
        let channels = ControlChannels::new("VA:");
        assert_eq!(channels.counter, "VA:SVR:CNT");
        assert_eq!(channels.status, "VA:SVR:STATUS");

        let records = channels.records(0.001, 2.0);
        assert_eq!(records.len(), 6);
        let noise = records.iter().find(|r| r.name == "VA:SVR:NOISE");
        assert_eq!(
            noise.and_then(|r| r.field("VAL")),
            Some(&FieldValue::Float(0.001))
        );
        let status = records.iter().find(|r| r.name == "VA:SVR:STATUS");
        assert_eq!(status.map(|r| r.record_type), Some(RecordType::Bi));

        assert_eq!(ControlChannels::new("").noise, "SVR:NOISE");
    }

    #[tokio::test]
    async fn stop_wakes_waiter() {
        let control = Arc::new(CycleControl::new(1.0, 0.0));
        let waiter = Arc::clone(&control);
        let task = tokio::spawn(async move { waiter.stop_requested().await });

        control.request_stop();
        let joined = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(matches!(joined, Ok(Ok(()))));
        assert!(control.is_stop_requested());
    }

    #[tokio::test]
    async fn stop_before_wait_is_not_lost() {
        let control = CycleControl::new(1.0, 0.0);
        control.request_stop();
        let woke = tokio::time::timeout(Duration::from_secs(1), control.stop_requested()).await;
        assert!(woke.is_ok());
    }
}
