//! A minimal Docker Engine API client, just enough to discover containers
//! and the networks they are attached to.

pub mod containers;
pub mod networks;
mod transport;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use http::uri::Authority;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use percent_encoding::{NON_ALPHANUMERIC, percent_encode};
use rustls::ClientConfig;
use serde::de::DeserializeOwned;

use transport::Transport;

#[macro_use]
extern crate tracing;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid docker host \"{host}\", {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("build request failed, {0}")]
    Http(#[from] http::Error),

    #[error("send request failed, {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("read response failed, {0}")]
    Hyper(#[from] hyper::Error),

    #[error("unexpected status code {code}, body: {body}")]
    UnexpectedStatusCode { code: StatusCode, body: String },

    #[error("encode filters failed, {0}")]
    Encode(serde_json::Error),

    #[error("deserialize response failed, {0}")]
    Deserialize(serde_json::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Returns true if the error happened while talking to the daemon, e.g.
    /// the daemon is unreachable, rejected the request or answered garbage.
    /// Such errors are expected to go away on their own.
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, Error::InvalidHost { .. } | Error::Encode(_))
    }
}

fn encode_filters(filters: &BTreeMap<String, Vec<String>>) -> Result<String, Error> {
    let json = serde_json::to_string(filters).map_err(Error::Encode)?;

    Ok(percent_encode(json.as_bytes(), NON_ALPHANUMERIC).to_string())
}

#[derive(Clone)]
pub struct Client {
    transport: Transport,
    /// scheme and authority, requests are made against `{base}{path}`
    base: String,
    timeout: Duration,
}

impl Client {
    /// Create a client for `host`, which might be
    ///
    /// - `unix:///var/run/docker.sock` or an absolute socket path
    /// - `tcp://127.0.0.1:2375`, TLS is used when `tls` is provided
    /// - `http://127.0.0.1:2375`
    /// - `https://127.0.0.1:2376`, native roots are used when `tls` is not provided
    ///
    /// Every request made by this client fails with [`Error::Timeout`] once
    /// `timeout` elapsed.
    pub fn new(host: &str, tls: Option<ClientConfig>, timeout: Duration) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidHost {
            host: host.to_string(),
            reason: reason.to_string(),
        };

        let (transport, base) = if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid("socket path is empty"));
            }

            (
                Transport::unix(PathBuf::from(path)),
                "http://localhost".to_string(),
            )
        } else if host.starts_with('/') {
            (
                Transport::unix(PathBuf::from(host)),
                "http://localhost".to_string(),
            )
        } else {
            let (scheme, rest) = host
                .split_once("://")
                .ok_or_else(|| invalid("scheme is missing"))?;

            let authority = rest.trim_end_matches('/');
            Authority::from_str(authority).map_err(|err| invalid(&err.to_string()))?;

            match (scheme, tls) {
                ("tcp", None) | ("http", _) => (Transport::http(), format!("http://{authority}")),
                ("tcp", Some(config)) | ("https", Some(config)) => {
                    (Transport::https(config), format!("https://{authority}"))
                }
                ("https", None) => {
                    let config = native_client_config().map_err(|err| invalid(&err))?;
                    (Transport::https(config), format!("https://{authority}"))
                }
                (other, _) => return Err(invalid(&format!("unsupported scheme \"{other}\""))),
            }
        };

        Ok(Client {
            transport,
            base,
            timeout,
        })
    }

    async fn fetch(&self, path_and_query: &str) -> Result<Bytes, Error> {
        let uri = format!("{}{}", self.base, path_and_query);

        let req = Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .body(Full::<Bytes>::default())?;

        let fut = async {
            let resp = self.transport.request(req).await?;
            let (parts, incoming) = resp.into_parts();
            let data = incoming.collect().await?.to_bytes();

            if !parts.status.is_success() {
                return Err(Error::UnexpectedStatusCode {
                    code: parts.status,
                    body: String::from_utf8_lossy(&data).into_owned(),
                });
            }

            Ok::<_, Error>(data)
        };

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Error::Timeout(self.timeout)),
        }
    }

    /// Fetch a JSON array, elements which cannot be decoded as `T` are skipped
    /// instead of failing the whole response.
    async fn fetch_list<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<Vec<T>, Error> {
        let data = self.fetch(path_and_query).await?;
        let elements =
            serde_json::from_slice::<Vec<serde_json::Value>>(&data).map_err(Error::Deserialize)?;

        let mut list = Vec::with_capacity(elements.len());
        for element in elements {
            match serde_json::from_value::<T>(element) {
                Ok(item) => list.push(item),
                Err(err) => {
                    warn!(
                        message = "skip malformed element of docker response",
                        path = path_and_query,
                        %err,
                    );
                }
            }
        }

        Ok(list)
    }
}

fn native_client_config() -> Result<ClientConfig, String> {
    let result = rustls_native_certs::load_native_certs();
    if result.certs.is_empty() {
        return Err(format!("no native root certificates, {:?}", result.errors));
    }

    let mut roots = rustls::RootCertStore::empty();
    let (_added, _ignored) = roots.add_parsable_certificates(result.certs);

    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Deserialize `null` as the default value, Docker likes to send `null`
/// instead of empty maps and lists.
pub(crate) fn null_to_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + serde::Deserialize<'de>,
{
    use serde::Deserialize;

    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
