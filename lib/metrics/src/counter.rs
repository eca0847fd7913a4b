use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metric::{MetricObserver, Observation};

/// A monotonic count, e.g. of failed refreshes. Clones share the same value,
/// so a recorder handed out by a [`crate::Metric`] keeps counting into the
/// series it came from.
#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    #[inline]
    pub fn inc(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl MetricObserver for Counter {
    type Recorder = Self;

    fn recorder(&self) -> Self {
        self.clone()
    }

    fn observe(&self) -> Observation {
        Observation::Counter(self.fetch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;

    #[test]
    fn wraps_around() {
        let counter = Counter::default();
        counter.inc(3);
        counter.inc(u64::MAX);

        assert_eq!(counter.fetch(), 2);
    }

    #[test]
    fn recorders_share_series() {
        let registry = Registry::new();
        let failures = registry.register_counter("failures_total", "");

        let recorder = failures.register(&[("config", "a")]).unwrap();
        recorder.inc(1);
        failures.recorder(&[("config", "a")]).inc(2);

        assert_eq!(recorder.fetch(), 3);
        assert!(matches!(
            failures.observer(&[("config", "a")]).observe(),
            Observation::Counter(3)
        ));

        // a recorder outliving its series does not resurrect it
        failures.unregister(&[("config", "a")]);
        recorder.inc(1);
        assert!(!failures.contains(&[("config", "a")]));
    }
}
