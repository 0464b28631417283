//! Noise injection.
//!
//! Each cycle the runtime simulates a perturbed copy of the settings to
//! emulate hardware jitter. For every field backing a write-capable
//! channel, `v` becomes `v + v * n * 2 * (U - 0.5)` with `U` uniform in
//! `[0, 1)`, so the result stays within `[v(1-n), v(1+n)]`. Only the copy
//! is perturbed; the authoritative store is never touched.

use rand::Rng;
use virtaccel_types::FieldBinding;

use crate::settings::Settings;

/// Applies symmetric multiplicative noise to a settings snapshot.
#[derive(Debug)]
pub struct NoiseInjector<R> {
    rng: R,
}

impl<R: Rng> NoiseInjector<R> {
    /// Create an injector drawing from `rng`.
    pub const fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Perturb every binding present in `snapshot` by up to `fraction` of
    /// its value.
    ///
    /// Bindings absent from the snapshot are skipped. A non-positive or
    /// non-finite fraction leaves the snapshot unchanged.
    pub fn perturb<'a>(
        &mut self,
        snapshot: &mut Settings,
        bindings: impl IntoIterator<Item = &'a FieldBinding>,
        fraction: f64,
    ) {
        if !fraction.is_finite() || fraction <= 0.0 {
            return;
        }
        for binding in bindings {
            if let Some(v) = snapshot.get_binding(binding) {
                let u: f64 = self.rng.random();
                snapshot.set_binding(binding, jitter(v, fraction, u));
            }
        }
    }
}

/// `v + v * n * 2 * (u - 0.5)`.
fn jitter(value: f64, fraction: f64, u: f64) -> f64 {
    value + value * fraction * 2.0 * (u - 0.5)
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::settings::SettingsStore;

    fn bindings() -> Vec<FieldBinding> {
        vec![
            FieldBinding::new("Q1", "gradient"),
            FieldBinding::new("Q2", "gradient"),
            FieldBinding::new("CAV1", "phase"),
        ]
    }

    fn within(v: f64, perturbed: f64, n: f64) -> bool {
        let lo = (v * (1.0 - n)).min(v * (1.0 + n));
        let hi = (v * (1.0 - n)).max(v * (1.0 + n));
        perturbed >= lo && perturbed <= hi
    }

    #[test]
    fn jitter_extremes() {
        assert_eq!(jitter(10.0, 0.1, 0.5), 10.0);
        assert!((jitter(10.0, 0.1, 0.0) - 9.0).abs() < 1e-12);
        assert!(jitter(10.0, 0.1, 0.999_999) < 11.0);
    }

    #[test]
    fn perturbed_values_stay_in_band() {
        let mut injector = NoiseInjector::new(SmallRng::seed_from_u64(42));
        let base = Settings::new()
            .with("Q1", "gradient", 10.0)
            .with("Q2", "gradient", -4.5)
            .with("CAV1", "phase", 0.0);
        let bindings = bindings();

        for n in [0.0, 0.001, 0.1, 0.5, 1.0, 3.0] {
            for _ in 0..200 {
                let mut snap = base.clone();
                injector.perturb(&mut snap, &bindings, n);
                for b in &bindings {
                    let v = base.get_binding(b).unwrap_or_default();
                    let p = snap.get_binding(b).unwrap_or_default();
                    assert!(within(v, p, n), "{b}: {p} not within {v} * (1 +- {n})");
                }
            }
        }
    }

    #[test]
    fn store_is_never_perturbed() {
        let store = SettingsStore::new(Settings::new().with("Q1", "gradient", 10.0));
        let mut injector = NoiseInjector::new(SmallRng::seed_from_u64(7));
        let mut snap = store.snapshot();
        injector.perturb(&mut snap, &bindings(), 0.5);

        assert_eq!(store.get("Q1", "gradient"), Some(10.0));
    }

    #[test]
    fn zero_fraction_is_identity() {
        let mut injector = NoiseInjector::new(SmallRng::seed_from_u64(1));
        let base = Settings::new().with("Q1", "gradient", 10.0);
        let mut snap = base.clone();
        injector.perturb(&mut snap, &bindings(), 0.0);
        assert_eq!(snap, base);
    }

    #[test]
    fn draws_are_independent_per_field() {
        let mut injector = NoiseInjector::new(SmallRng::seed_from_u64(3));
        let mut snap = Settings::new()
            .with("Q1", "gradient", 10.0)
            .with("Q2", "gradient", 10.0);
        injector.perturb(&mut snap, &bindings(), 0.1);
        assert_ne!(snap.get("Q1", "gradient"), snap.get("Q2", "gradient"));
    }

    #[test]
    fn unknown_bindings_are_skipped() {
        let mut injector = NoiseInjector::new(SmallRng::seed_from_u64(5));
        let mut snap = Settings::new();
        injector.perturb(&mut snap, &bindings(), 0.1);
        assert_eq!(snap.field_count(), 0);
    }
}
