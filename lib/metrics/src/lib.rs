#![forbid(unsafe_code)]
#![deny(unused)]
#![deny(dead_code)]

mod attributes;
mod counter;
mod histogram;
mod metric;
mod registry;

pub use attributes::Attributes;
pub use counter::Counter;
pub use histogram::{Histogram, HistogramObservation, ObservationBucket, exponential_buckets};
pub use metric::{Error, Metric, Observation};
pub use registry::{Registry, Reporter};
