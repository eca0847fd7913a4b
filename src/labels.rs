//! Derives the label sets of scrape targets from the containers of a Docker
//! daemon.
//!
//! Every container yields zero or more targets:
//!
//! - host networking: a single target, addressed by the configured host
//! - no network: nothing, or a single target without address if configured
//! - otherwise one target per selected network and distinct private TCP port,
//!   or one per network if the container exposes no TCP port

use std::collections::{BTreeMap, HashMap};

use discovery::{ADDRESS_LABEL, LabelSet, sanitize_label_name};
use docker::containers::{Container, Port};
use docker::networks::Network;
use indexmap::IndexMap;

pub const CONTAINER_ID_LABEL: &str = "__meta_docker_container_id";
pub const CONTAINER_NAME_LABEL: &str = "__meta_docker_container_name";
pub const CONTAINER_NETWORK_MODE_LABEL: &str = "__meta_docker_container_network_mode";
pub const CONTAINER_LABEL_PREFIX: &str = "__meta_docker_container_label_";

pub const NETWORK_ID_LABEL: &str = "__meta_docker_network_id";
pub const NETWORK_NAME_LABEL: &str = "__meta_docker_network_name";
pub const NETWORK_SCOPE_LABEL: &str = "__meta_docker_network_scope";
pub const NETWORK_INGRESS_LABEL: &str = "__meta_docker_network_ingress";
pub const NETWORK_INTERNAL_LABEL: &str = "__meta_docker_network_internal";
pub const NETWORK_LABEL_PREFIX: &str = "__meta_docker_network_label_";
pub const NETWORK_IP_LABEL: &str = "__meta_docker_network_ip";

pub const PORT_PRIVATE_LABEL: &str = "__meta_docker_port_private";
pub const PORT_PUBLIC_LABEL: &str = "__meta_docker_port_public";
pub const PORT_PUBLIC_IP_LABEL: &str = "__meta_docker_port_public_ip";

const HOST_NETWORK_MODE: &str = "host";
const SHARED_NETWORK_MODE_PREFIX: &str = "container:";

/// Details of a network, joined into the endpoints of containers by the
/// network id.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkDetail {
    pub id: String,
    pub name: String,
    pub scope: String,
    pub ingress: bool,
    pub internal: bool,
    pub labels: BTreeMap<String, String>,
}

impl From<Network> for NetworkDetail {
    fn from(network: Network) -> Self {
        NetworkDetail {
            id: network.id,
            name: network.name,
            scope: network.scope,
            ingress: network.ingress,
            internal: network.internal,
            labels: network.labels,
        }
    }
}

impl NetworkDetail {
    fn add_labels(&self, labels: &mut LabelSet) {
        labels.insert(NETWORK_ID_LABEL.to_string(), self.id.clone());
        labels.insert(NETWORK_NAME_LABEL.to_string(), self.name.clone());
        labels.insert(NETWORK_SCOPE_LABEL.to_string(), self.scope.clone());
        labels.insert(NETWORK_INGRESS_LABEL.to_string(), self.ingress.to_string());
        labels.insert(NETWORK_INTERNAL_LABEL.to_string(), self.internal.to_string());

        for (key, value) in &self.labels {
            labels.insert(
                format!("{NETWORK_LABEL_PREFIX}{}", sanitize_label_name(key)),
                value.clone(),
            );
        }
    }
}

/// The attachment of a container to a network.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkEndpoint {
    /// Might be empty, e.g. for stopped containers
    pub ip: String,

    /// `None` if the network is not known to the daemon's network list
    pub detail: Option<NetworkDetail>,
}

/// A snapshot of a container, everything the targets are derived from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    /// The name as reported by the daemon, with the leading `/`
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub network_mode: String,
    /// Keyed by network name, in the order the daemon reported them
    pub networks: IndexMap<String, NetworkEndpoint>,
    pub ports: Vec<Port>,
}

impl ContainerSummary {
    /// Returns `None` if the container has no name.
    pub fn new(container: Container, networks: &HashMap<String, NetworkDetail>) -> Option<Self> {
        let name = container.names.into_iter().next()?;

        let networks = container
            .network_settings
            .networks
            .into_iter()
            .map(|(name, endpoint)| {
                let detail = networks.get(&endpoint.network_id).cloned();

                (
                    name,
                    NetworkEndpoint {
                        ip: endpoint.ip_address,
                        detail,
                    },
                )
            })
            .collect();

        Some(ContainerSummary {
            id: container.id,
            name,
            labels: container.labels,
            network_mode: container.host_config.network_mode,
            networks,
            ports: container.ports,
        })
    }

    /// The name without the leading `/`
    pub fn display_name(&self) -> &str {
        self.name.strip_prefix('/').unwrap_or(&self.name)
    }
}

/// Index containers by id and name, so containers sharing the network
/// namespace of another one can be resolved.
pub fn index(containers: &[ContainerSummary]) -> HashMap<&str, &ContainerSummary> {
    let mut index = HashMap::with_capacity(containers.len() * 2);
    for container in containers {
        index.insert(container.display_name(), container);
    }
    // ids win over names
    for container in containers {
        index.insert(container.id.as_str(), container);
    }

    index
}

#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    /// The address of targets in host networking mode
    pub host_networking_host: String,
    pub match_first_network: bool,
    pub include_no_network_targets: bool,
    /// The port of targets which expose no TCP port, `0` means no port
    pub port: u16,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            host_networking_host: "localhost".to_string(),
            match_first_network: true,
            include_no_network_targets: false,
            port: 80,
        }
    }
}

/// Derive the targets of `container`, `containers` is consulted when it
/// shares the network namespace of another container.
///
/// Targets are ordered by network, then by ascending private port.
pub fn build_targets(
    container: &ContainerSummary,
    containers: &HashMap<&str, &ContainerSummary>,
    options: &Options,
) -> Vec<LabelSet> {
    let mut base = LabelSet::new();
    base.insert(CONTAINER_ID_LABEL.to_string(), container.id.clone());
    base.insert(CONTAINER_NAME_LABEL.to_string(), container.name.clone());
    base.insert(
        CONTAINER_NETWORK_MODE_LABEL.to_string(),
        container.network_mode.clone(),
    );
    for (key, value) in &container.labels {
        base.insert(
            format!("{CONTAINER_LABEL_PREFIX}{}", sanitize_label_name(key)),
            value.clone(),
        );
    }

    let (network_mode, networks) = resolve_networks(container, containers);

    if network_mode == HOST_NETWORK_MODE {
        base.insert(
            ADDRESS_LABEL.to_string(),
            options.host_networking_host.clone(),
        );
        return vec![base];
    }

    if networks.is_empty() {
        return if options.include_no_network_targets {
            vec![base]
        } else {
            vec![]
        };
    }

    let endpoints = if options.match_first_network {
        networks
            .get(network_mode)
            .or_else(|| networks.values().next())
            .into_iter()
            .collect::<Vec<_>>()
    } else {
        let mut sorted = networks.iter().collect::<Vec<_>>();
        sorted.sort_by(|(a, _), (b, _)| a.cmp(b));
        sorted.into_iter().map(|(_name, endpoint)| endpoint).collect()
    };

    let mut ports = container
        .ports
        .iter()
        .filter(|port| port.typ == "tcp")
        .collect::<Vec<_>>();
    // the daemon reports a port twice if it is published on IPv4 and IPv6
    ports.sort_by_key(|port| port.private_port);
    ports.dedup_by_key(|port| port.private_port);

    let mut targets = Vec::with_capacity(endpoints.len() * ports.len().max(1));
    for endpoint in endpoints {
        let mut labels = base.clone();
        labels.insert(NETWORK_IP_LABEL.to_string(), endpoint.ip.clone());
        if let Some(detail) = &endpoint.detail {
            detail.add_labels(&mut labels);
        }

        // no address until the daemon assigned an IP
        let has_ip = !endpoint.ip.is_empty();

        if ports.is_empty() {
            if has_ip {
                let address = if options.port == 0 {
                    bracket_ipv6(&endpoint.ip)
                } else {
                    join_host_port(&endpoint.ip, options.port)
                };
                labels.insert(ADDRESS_LABEL.to_string(), address);
            }
            targets.push(labels);
            continue;
        }

        for port in &ports {
            let mut labels = labels.clone();
            labels.insert(
                PORT_PRIVATE_LABEL.to_string(),
                port.private_port.to_string(),
            );
            if let Some(public_port) = port.public_port.filter(|port| *port > 0) {
                labels.insert(PORT_PUBLIC_LABEL.to_string(), public_port.to_string());
                labels.insert(
                    PORT_PUBLIC_IP_LABEL.to_string(),
                    port.ip.clone().unwrap_or_default(),
                );
            }
            if has_ip {
                labels.insert(
                    ADDRESS_LABEL.to_string(),
                    join_host_port(&endpoint.ip, port.private_port),
                );
            }

            targets.push(labels);
        }
    }

    targets
}

/// A container in `container:<id>` network mode has no networks on its own,
/// follow the chain until a container with networks shows up.
fn resolve_networks<'a>(
    container: &'a ContainerSummary,
    containers: &HashMap<&str, &'a ContainerSummary>,
) -> (&'a str, &'a IndexMap<String, NetworkEndpoint>) {
    let mut network_mode = container.network_mode.as_str();
    let mut networks = &container.networks;

    // bounded, so a cycle cannot loop forever
    for _ in 0..containers.len() {
        if !networks.is_empty() {
            break;
        }

        let Some(shared) = network_mode
            .strip_prefix(SHARED_NETWORK_MODE_PREFIX)
            .and_then(|id| containers.get(id).copied())
        else {
            break;
        };

        network_mode = shared.network_mode.as_str();
        networks = &shared.networks;
    }

    (network_mode, networks)
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    format!("{}:{port}", bracket_ipv6(host))
}
