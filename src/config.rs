use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::labels::Options;
use crate::tls::TlsConfig;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("host must not be empty")]
    EmptyHost,
    #[error("refresh_interval must be greater than zero")]
    ZeroRefreshInterval,
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("host_networking_host must not be empty")]
    EmptyHostNetworkingHost,
    #[error("name of filter #{0} must not be empty")]
    EmptyFilterName(usize),
}

/// A filter applied by the daemon when listing containers, e.g.
/// `{name: label, values: ["prometheus.io/scrape=true"]}`
///
/// https://docs.docker.com/reference/api/engine/version/v1.47/#tag/Container/operation/ContainerList
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Filter {
    pub name: String,

    #[serde(default)]
    pub values: Vec<String>,
}

const fn default_port() -> u16 {
    80
}

const fn default_refresh_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_host_networking_host() -> String {
    "localhost".to_string()
}

const fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address of the Docker daemon, e.g. `unix:///var/run/docker.sock`,
    /// `tcp://127.0.0.1:2375` or `https://docker.internal:2376`
    pub host: String,

    /// TLS material used to connect to the daemon.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// The port used for the address of containers which do not expose
    /// any TCP port. `0` means the address has no port at all.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The time after which the containers are refreshed.
    #[serde(default = "default_refresh_interval", with = "humanize::duration::serde")]
    pub refresh_interval: Duration,

    /// Max amount of time to wait for a response from the daemon,
    /// `refresh_interval` is used if not set.
    #[serde(default, with = "humanize::duration::serde_option")]
    pub timeout: Option<Duration>,

    /// Filters to limit the discovery process to a subset of the containers.
    #[serde(default)]
    pub filters: Vec<Filter>,

    /// The host to use if the container is in host networking mode.
    #[serde(default = "default_host_networking_host")]
    pub host_networking_host: String,

    /// Generate targets for a single network of every container, the network
    /// named by the network mode if the container is attached to it or the
    /// first one otherwise. Targets are generated for all networks if false.
    #[serde(default = "default_true")]
    pub match_first_network: bool,

    /// Emit a target without address for containers which are not attached
    /// to any network.
    #[serde(default)]
    pub include_no_network_targets: bool,
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.is_empty() {
            return Err(Error::EmptyHost);
        }

        if self.refresh_interval.is_zero() {
            return Err(Error::ZeroRefreshInterval);
        }

        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::ZeroTimeout);
        }

        if self.host_networking_host.is_empty() {
            return Err(Error::EmptyHostNetworkingHost);
        }

        if let Some(index) = self.filters.iter().position(|f| f.name.is_empty()) {
            return Err(Error::EmptyFilterName(index));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(self.refresh_interval)
    }

    /// Filters keyed by name, values of filters with the same name are merged.
    pub fn filters(&self) -> BTreeMap<String, Vec<String>> {
        let mut filters = BTreeMap::<String, Vec<String>>::new();
        for filter in &self.filters {
            filters
                .entry(filter.name.clone())
                .or_default()
                .extend(filter.values.iter().cloned());
        }

        filters
    }

    pub fn label_options(&self) -> Options {
        Options {
            host_networking_host: self.host_networking_host.clone(),
            match_first_network: self.match_first_network,
            include_no_network_targets: self.include_no_network_targets,
            port: self.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn defaults() {
        let config = serde_yaml::from_str::<Config>("host: unix:///var/run/docker.sock").unwrap();

        assert_eq!(config.host, "unix:///var/run/docker.sock");
        assert_eq!(config.tls, None);
        assert_eq!(config.port, 80);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert!(config.filters.is_empty());
        assert_eq!(config.host_networking_host, "localhost");
        assert!(config.match_first_network);
        assert!(!config.include_no_network_targets);

        config.validate().unwrap();
    }

    #[test]
    fn full() {
        let text = r#"
host: tcp://10.0.0.1:2376
tls:
  ca: /etc/docker/ca.pem
  cert: /etc/docker/cert.pem
  key: /etc/docker/key.pem
  verify_hostname: false
port: 9100
refresh_interval: 30s
timeout: 5s
filters:
  - name: label
    values: ["prometheus.io/scrape=true"]
  - name: status
    values: ["running"]
  - name: label
    values: ["env=prod"]
host_networking_host: 192.168.1.10
match_first_network: false
include_no_network_targets: true
"#;
        let config = serde_yaml::from_str::<Config>(text).unwrap();
        config.validate().unwrap();

        let tls = config.tls.as_ref().unwrap();
        assert_eq!(tls.ca.as_deref(), Some(Path::new("/etc/docker/ca.pem")));
        assert!(tls.verify_certificate);
        assert!(!tls.verify_hostname);

        assert_eq!(config.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.timeout(), Duration::from_secs(5));

        let mut filters = BTreeMap::new();
        filters.insert(
            "label".to_string(),
            vec![
                "prometheus.io/scrape=true".to_string(),
                "env=prod".to_string(),
            ],
        );
        filters.insert("status".to_string(), vec!["running".to_string()]);
        assert_eq!(config.filters(), filters);

        assert_eq!(
            config.label_options(),
            Options {
                host_networking_host: "192.168.1.10".to_string(),
                match_first_network: false,
                include_no_network_targets: true,
                port: 9100,
            }
        );
    }

    #[test]
    fn missing_host() {
        serde_yaml::from_str::<Config>("port: 80").unwrap_err();
    }

    #[test]
    fn unknown_field() {
        serde_yaml::from_str::<Config>("host: unix:///var/run/docker.sock\nrefresh: 1m")
            .unwrap_err();
    }

    #[test]
    fn validate() {
        let base = serde_yaml::from_str::<Config>("host: unix:///var/run/docker.sock").unwrap();

        for (config, err) in [
            (
                Config {
                    host: String::new(),
                    ..base.clone()
                },
                Error::EmptyHost,
            ),
            (
                Config {
                    refresh_interval: Duration::ZERO,
                    ..base.clone()
                },
                Error::ZeroRefreshInterval,
            ),
            (
                Config {
                    timeout: Some(Duration::ZERO),
                    ..base.clone()
                },
                Error::ZeroTimeout,
            ),
            (
                Config {
                    host_networking_host: String::new(),
                    ..base.clone()
                },
                Error::EmptyHostNetworkingHost,
            ),
            (
                Config {
                    filters: vec![
                        Filter {
                            name: "status".to_string(),
                            values: vec!["running".to_string()],
                        },
                        Filter {
                            name: String::new(),
                            values: vec![],
                        },
                    ],
                    ..base.clone()
                },
                Error::EmptyFilterName(1),
            ),
        ] {
            assert_eq!(config.validate(), Err(err));
        }
    }
}
