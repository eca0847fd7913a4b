#[macro_use]
extern crate tracing;

pub mod config;
pub mod docker;
pub mod labels;
pub mod tls;

#[cfg(test)]
mod testing;

pub use self::config::{Config, Filter};
pub use discovery::{LabelSet, TargetGroup};
pub use self::docker::{DockerDiscovery, MECHANISM};
pub use self::tls::TlsConfig;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type Result<T> = std::result::Result<T, Error>;
