use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Deserialize;

use super::{Client, Error, encode_filters, null_to_default};

/// The summary of a container, as returned by `GET /containers/json`
///
/// https://docs.docker.com/reference/api/engine/version/v1.47/#tag/Container/operation/ContainerList
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    pub id: String,

    /// Names of the container, each with a leading `/`
    #[serde(default, deserialize_with = "null_to_default")]
    pub names: Vec<String>,

    #[serde(default, deserialize_with = "null_to_default")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, deserialize_with = "null_to_default")]
    pub ports: Vec<Port>,

    #[serde(default, deserialize_with = "null_to_default")]
    pub host_config: HostConfig,

    #[serde(default, deserialize_with = "null_to_default")]
    pub network_settings: NetworkSettings,
}

/// A port the container listens on, and optionally where it is published on
/// the host.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Port {
    /// Host IP address that the container's port is mapped to
    #[serde(rename = "IP", default)]
    pub ip: Option<String>,

    /// Port on the container
    pub private_port: u16,

    /// Port exposed on the host
    #[serde(default)]
    pub public_port: Option<u16>,

    /// `tcp`, `udp` or `sctp`
    #[serde(rename = "Type", default = "default_port_type")]
    pub typ: String,
}

fn default_port_type() -> String {
    "tcp".to_string()
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    /// `host`, `none`, `bridge`, `container:<id>` or the name of a user
    /// defined network
    #[serde(default, deserialize_with = "null_to_default")]
    pub network_mode: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    /// Keyed by network name, in the order the daemon returned them.
    #[serde(default, deserialize_with = "null_to_default")]
    pub networks: IndexMap<String, EndpointSettings>,
}

/// The configuration of a container's endpoint in a network
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointSettings {
    #[serde(rename = "NetworkID", default, deserialize_with = "null_to_default")]
    pub network_id: String,

    #[serde(rename = "IPAddress", default, deserialize_with = "null_to_default")]
    pub ip_address: String,
}

#[derive(Debug, Default)]
pub struct ListContainersOptions {
    /// Return all containers, by default only running containers are shown
    pub all: bool,
    pub limit: Option<usize>,
    /// Filters to process on the container list, e.g.
    /// `{"label": ["com.docker.compose.project=foo"]}`
    pub filters: BTreeMap<String, Vec<String>>,
}

impl ListContainersOptions {
    fn query(&self) -> Result<String, Error> {
        let mut params = Vec::new();
        if self.all {
            params.push("all=true".to_string());
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={limit}"));
        }
        if !self.filters.is_empty() {
            params.push(format!("filters={}", encode_filters(&self.filters)?));
        }

        if params.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!("?{}", params.join("&")))
        }
    }
}

impl Client {
    /// List containers, containers which cannot be decoded are skipped.
    pub async fn list_containers(
        &self,
        opts: &ListContainersOptions,
    ) -> Result<Vec<Container>, Error> {
        let path = format!("/containers/json{}", opts.query()?);

        self.fetch_list(&path).await
    }
}
