use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::attributes::{Attributes, assert_legal_key};
use crate::metric::{Metric, MetricObserver, Observation};
use crate::{Counter, Histogram};

type Families<T> = Arc<Mutex<BTreeMap<&'static str, Metric<T>>>>;

/// Registry is a handle to a set of metric families.
///
/// There is no process wide registry, every component receives the registry
/// it should report to. Clones share the same families.
#[derive(Clone, Default)]
pub struct Registry {
    counters: Families<Counter>,
    histograms: Families<Histogram>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Returns the counter family with this name, it will be created if it
    /// does not exist yet.
    pub fn register_counter(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Metric<Counter> {
        register(&self.counters, name, description, ())
    }

    pub fn register_histogram(
        &self,
        name: &'static str,
        description: &'static str,
        buckets: impl Iterator<Item = f64>,
    ) -> Metric<Histogram> {
        register(&self.histograms, name, description, buckets.collect())
    }

    pub fn report(&self, reporter: &mut impl Reporter) {
        report_families(reporter, &self.counters);
        report_families(reporter, &self.histograms);
    }
}

fn register<T: MetricObserver>(
    families: &Families<T>,
    name: &'static str,
    description: &'static str,
    options: T::Options,
) -> Metric<T>
where
    T::Options: Clone,
{
    assert_legal_key(name);

    families
        .lock()
        .entry(name)
        .or_insert_with(|| Metric {
            name,
            description,
            shard: Arc::new(Mutex::new(BTreeMap::new())),
            options,
        })
        .clone()
}

fn report_families<T: MetricObserver>(reporter: &mut impl Reporter, families: &Families<T>) {
    families.lock().values().for_each(|metric| {
        reporter.start_metric(metric.name, metric.description);
        metric
            .shard
            .lock()
            .iter()
            .for_each(|(attrs, series)| reporter.report(attrs, series.observe()));
        reporter.finish_metric()
    })
}

/// Visits every series of a [`Registry`], implemented by whatever renders
/// or ships the metrics.
pub trait Reporter {
    fn start_metric(&mut self, name: &'static str, description: &'static str);

    fn report(&mut self, attrs: &Attributes, observation: Observation);

    /// Finish recording a given metric
    fn finish_metric(&mut self);
}
