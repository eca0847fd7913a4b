use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::attributes::Attributes;
use crate::histogram::HistogramObservation;

/// A `Metric` records an `Observation` for each unique set of `Attributes`
#[derive(Debug, Clone)]
pub enum Observation {
    Counter(u64),
    Histogram(HistogramObservation),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("series {attributes:?} of metric \"{name}\" is already registered")]
    AlreadyRegistered {
        name: &'static str,
        attributes: Attributes,
    },
}

/// Types that wish to be used with `Metric` must implement this trait
/// that exposes the necessary reporting API
///
/// `Metric` maintains a distinct `MetricObserver` for each unique set of `Attributes`
pub trait MetricObserver: MakeMetricObserver + std::fmt::Debug + Send + 'static {
    /// The type that is used to modify the value reported by this MetricObserver
    type Recorder;

    /// Return a `Self::Recorder` that can be used to mutate the value reported
    /// by this `MetricObserver`
    fn recorder(&self) -> Self::Recorder;

    /// Return the current value for this
    fn observe(&self) -> Observation;
}

/// All `MetricObserver` must also implement `MakeMetricObserver` which defines
/// how to construct new instances of `Self`
///
/// A blanket impl is provided for types that implement Default
pub trait MakeMetricObserver {
    type Options: Sized + Send + Sync + std::fmt::Debug;

    fn create(options: &Self::Options) -> Self;
}

impl<T: Default> MakeMetricObserver for T {
    type Options = ();

    fn create(_: &Self::Options) -> Self {
        Default::default()
    }
}

/// A named family of series. Cloning is cheap, all clones share the same series.
pub struct Metric<T: MetricObserver> {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) shard: Arc<Mutex<BTreeMap<Attributes, T>>>,

    pub(crate) options: T::Options,
}

// derive would require `T: Clone`, the series are shared through `shard`
impl<T: MetricObserver> Clone for Metric<T>
where
    T::Options: Clone,
{
    fn clone(&self) -> Self {
        Metric {
            name: self.name,
            description: self.description,
            shard: Arc::clone(&self.shard),
            options: self.options.clone(),
        }
    }
}

impl<T: MetricObserver> Metric<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the recorder of the series, the series is created if it does
    /// not exist yet.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T::Recorder {
        self.observer(attributes).recorder()
    }

    pub fn observer(&self, attributes: impl Into<Attributes>) -> MappedMutexGuard<'_, T> {
        MutexGuard::map(self.shard.lock(), |values| {
            values
                .entry(attributes.into())
                .or_insert_with(|| T::create(&self.options))
        })
    }

    /// Create a new series, unlike `recorder` this fails if a series with the
    /// same attributes exists already.
    pub fn register(&self, attributes: impl Into<Attributes>) -> Result<T::Recorder, Error> {
        let attributes = attributes.into();

        match self.shard.lock().entry(attributes) {
            Entry::Occupied(entry) => Err(Error::AlreadyRegistered {
                name: self.name,
                attributes: entry.key().clone(),
            }),
            Entry::Vacant(entry) => Ok(entry.insert(T::create(&self.options)).recorder()),
        }
    }

    /// Remove the series, returns false if it does not exist.
    pub fn unregister(&self, attributes: impl Into<Attributes>) -> bool {
        self.shard.lock().remove(&attributes.into()).is_some()
    }

    /// Returns true if a series with those attributes exists.
    pub fn contains(&self, attributes: impl Into<Attributes>) -> bool {
        self.shard.lock().contains_key(&attributes.into())
    }
}
