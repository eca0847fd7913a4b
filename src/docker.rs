use std::collections::HashMap;
use std::time::Duration;

use discovery::TargetGroup;
use discovery::refresh::{self, Refresh, RefreshMetrics};
use docker::containers::ListContainersOptions;
use tokio::sync::mpsc;
use tripwire::Tripwire;

use crate::config::Config;
use crate::labels::{self, ContainerSummary, NetworkDetail, Options, build_targets};

/// The `mechanism` attribute of the refresh metrics
pub const MECHANISM: &str = "docker";

/// Discovers scrape targets from the containers of a Docker daemon.
pub struct DockerDiscovery {
    refresher: Refresher,
    refresh_interval: Duration,
    metrics: RefreshMetrics,
}

impl DockerDiscovery {
    /// Validate `config` and build the client, nothing is sent to the daemon
    /// yet.
    pub fn new(config: &Config, metrics: RefreshMetrics) -> crate::Result<Self> {
        config.validate()?;

        let tls = config
            .tls
            .as_ref()
            .map(|tls| tls.client_config())
            .transpose()?;
        let client = docker::Client::new(&config.host, tls, config.timeout())?;

        Ok(DockerDiscovery {
            refresher: Refresher {
                client,
                source: config.host.clone(),
                list_options: ListContainersOptions {
                    filters: config.filters(),
                    ..Default::default()
                },
                label_options: config.label_options(),
            },
            refresh_interval: config.refresh_interval,
            metrics,
        })
    }

    /// List containers and networks once, and derive the targets of all
    /// containers.
    pub async fn refresh(&self) -> Result<TargetGroup, docker::Error> {
        self.refresher.targets().await
    }

    /// Refresh targets every `refresh_interval` and send them to `output`,
    /// until `shutdown` fires or `output` is closed.
    ///
    /// The refresh metrics are registered for as long as this runs, an error
    /// is returned if that fails.
    pub async fn run(
        self,
        shutdown: Tripwire,
        output: mpsc::Sender<Vec<TargetGroup>>,
    ) -> crate::Result<()> {
        let DockerDiscovery {
            refresher,
            refresh_interval,
            mut metrics,
        } = self;

        metrics.register()?;

        info!(
            message = "start docker service discovery",
            host = %refresher.source,
            interval = ?refresh_interval,
        );

        refresh::run(refresher, refresh_interval, &metrics, shutdown, output).await;

        metrics.unregister();

        debug!(message = "docker service discovery stopped");

        Ok(())
    }
}

struct Refresher {
    client: docker::Client,
    source: String,
    list_options: ListContainersOptions,
    label_options: Options,
}

impl Refresher {
    async fn targets(&self) -> Result<TargetGroup, docker::Error> {
        let networks = self
            .client
            .list_networks()
            .await?
            .into_iter()
            .map(|network| (network.id.clone(), NetworkDetail::from(network)))
            .collect::<HashMap<_, _>>();

        let containers = self
            .client
            .list_containers(&self.list_options)
            .await?
            .into_iter()
            .filter_map(|container| {
                let id = container.id.clone();
                let summary = ContainerSummary::new(container, &networks);
                if summary.is_none() {
                    warn!(message = "skip container without name", %id);
                }

                summary
            })
            .collect::<Vec<_>>();

        let index = labels::index(&containers);
        let mut group = TargetGroup::new(self.source.as_str());
        for container in &containers {
            let targets = build_targets(container, &index, &self.label_options);

            trace!(
                message = "derived targets of container",
                container = container.display_name(),
                targets = targets.len(),
            );

            group.targets.extend(targets);
        }

        debug!(
            message = "refreshed docker targets",
            containers = containers.len(),
            targets = group.targets.len(),
        );

        Ok(group)
    }
}

impl Refresh for Refresher {
    type Error = docker::Error;

    async fn refresh(&mut self) -> Result<Vec<TargetGroup>, docker::Error> {
        self.targets().await.map(|group| vec![group])
    }
}
