// # Overlay Controller Network Source
//
// This crate provides the directory-service client for ztdns: it asks the
// local overlay controller API which networks the host has joined and what
// DNS settings each of them advertises.
//
// ## Endpoint
//
// `GET <url>/network` with the `X-ZT1-Auth` header. The response is a JSON
// array with one object per joined network.
//
// ## Failure Semantics
//
// A non-2xx status or an unparseable body fails the whole fetch. No partial
// lists are ever returned.

use ztdns_core::config::DirectoryConfig;
use ztdns_core::traits::{NetworkDescriptor, NetworkRoute, NetworkSource};
use ztdns_core::{Error, Result};

use serde::Deserialize;
use std::time::Duration;

/// Authentication header expected by the local API
pub const AUTH_HEADER: &str = "X-ZT1-Auth";

/// Status string of a network that is up
const STATUS_OK: &str = "OK";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiNetwork {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    port_device_name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    dns: Option<ApiDns>,
    #[serde(default)]
    assigned_addresses: Vec<String>,
    #[serde(default)]
    routes: Vec<ApiRoute>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiDns {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    servers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ApiRoute {
    target: String,
    #[serde(default)]
    via: Option<String>,
}

impl From<ApiNetwork> for NetworkDescriptor {
    fn from(network: ApiNetwork) -> Self {
        let dns = network.dns.unwrap_or_default();
        let domain = dns.domain.trim().to_string();

        let mut descriptor =
            NetworkDescriptor::new(network.id, network.name, network.port_device_name)
                .with_online(network.status == STATUS_OK)
                .with_dns_servers(dns.servers.unwrap_or_default())
                .with_assigned_addresses(network.assigned_addresses)
                .with_routes(
                    network
                        .routes
                        .into_iter()
                        .map(|r| NetworkRoute::new(r.target, r.via))
                        .collect(),
                );
        if !domain.is_empty() {
            descriptor = descriptor.with_domain(domain);
        }
        descriptor
    }
}

/// Parse a `/network` response body
pub fn parse_networks(body: &str) -> Result<Vec<NetworkDescriptor>> {
    let networks: Vec<ApiNetwork> = serde_json::from_str(body)
        .map_err(|e| Error::directory(format!("Invalid network list: {}", e)))?;
    Ok(networks.into_iter().map(NetworkDescriptor::from).collect())
}

/// Network source backed by the overlay controller local API
pub struct ZeroTierSource {
    /// Base URL (e.g. "http://127.0.0.1:9993")
    base_url: String,

    /// API token
    token: String,

    /// HTTP client
    client: reqwest::Client,
}

impl ZeroTierSource {
    /// Create a new source
    ///
    /// # Parameters
    ///
    /// - `base_url`: Base URL of the local API
    /// - `token`: Authentication token
    /// - `timeout`: Per-request timeout
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    /// Create a source from the directory configuration
    pub fn from_config(config: &DirectoryConfig) -> Result<Self> {
        Self::new(
            config.url.clone(),
            config.auth_token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// URL of the network list endpoint
    pub fn networks_url(&self) -> String {
        format!("{}/network", self.base_url)
    }
}

#[async_trait::async_trait]
impl NetworkSource for ZeroTierSource {
    async fn list_networks(&self) -> Result<Vec<NetworkDescriptor>> {
        let url = self.networks_url();
        let response = self
            .client
            .get(&url)
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| Error::directory(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::directory(format!("{} returned {}", url, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::directory(format!("Failed to read response: {}", e)))?;

        let networks = parse_networks(&body)?;
        tracing::debug!("Fetched {} network(s) from {}", networks.len(), url);
        Ok(networks)
    }

    fn source_name(&self) -> &'static str {
        "zerotier"
    }
}
