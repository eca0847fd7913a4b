use std::collections::BTreeMap;

use serde::Deserialize;

use super::{Client, Error, null_to_default};

/// A network, as returned by `GET /networks`
///
/// https://docs.docker.com/reference/api/engine/version/v1.47/#tag/Network/operation/NetworkList
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Network {
    pub id: String,

    pub name: String,

    /// `local`, `swarm` or `global`
    #[serde(default, deserialize_with = "null_to_default")]
    pub scope: String,

    /// Whether the network is created for ingress routing (swarm mode only)
    #[serde(default)]
    pub ingress: bool,

    /// Whether the network is isolated from external access
    #[serde(default)]
    pub internal: bool,

    #[serde(default, deserialize_with = "null_to_default")]
    pub labels: BTreeMap<String, String>,
}

impl Client {
    /// List networks, networks which cannot be decoded are skipped.
    pub async fn list_networks(&self) -> Result<Vec<Network>, Error> {
        self.fetch_list("/networks").await
    }
}
