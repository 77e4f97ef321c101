//! Port scanning over the debugging HTTP endpoint.

use super::types::{DiscoveredPort, PageDescriptor};
use crate::config::DiscoveryConfig;
use crate::{AutopilotError, Result};
use futures::future::join_all;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Finds controllable pages on local debugging ports.
///
/// Every failure mode of a single port (refused, timed out, non-2xx, bad
/// JSON) is a silent exclusion. An empty result means "not available".
#[derive(Debug, Clone)]
pub struct TargetDiscovery {
    client: Client,
    host: String,
    port_start: u16,
    port_end: u16,
    probe_timeout: Duration,
}

impl TargetDiscovery {
    /// Create a scanner over the default port range.
    pub fn new() -> Result<Self> {
        Self::with_range(
            DiscoveryConfig::DEFAULT_PORT_START,
            DiscoveryConfig::DEFAULT_PORT_END,
        )
    }

    /// Create a scanner over an inclusive port range.
    pub fn with_range(port_start: u16, port_end: u16) -> Result<Self> {
        if port_start > port_end {
            return Err(AutopilotError::Validation {
                field: "port_range".to_string(),
                message: format!("start {port_start} is after end {port_end}"),
            });
        }

        let client = Client::builder()
            .timeout(DiscoveryConfig::PROBE_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| AutopilotError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            host: DiscoveryConfig::HOST.to_string(),
            port_start,
            port_end,
            probe_timeout: DiscoveryConfig::PROBE_TIMEOUT,
        })
    }

    /// Override the per-probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn port_range(&self) -> (u16, u16) {
        (self.port_start, self.port_end)
    }

    /// Scan the configured range.
    pub async fn scan(&self) -> Vec<DiscoveredPort> {
        self.scan_for_targets(self.port_start, self.port_end).await
    }

    /// Scan every port in `start..=end` concurrently.
    pub async fn scan_for_targets(&self, start: u16, end: u16) -> Vec<DiscoveredPort> {
        let ports: Vec<u16> = (start..=end).collect();
        self.scan_ports(&ports).await
    }

    /// Scan an explicit list of ports concurrently.
    pub async fn scan_ports(&self, ports: &[u16]) -> Vec<DiscoveredPort> {
        let probes = ports.iter().map(|&port| self.probe(port));
        let found: Vec<DiscoveredPort> = join_all(probes).await.into_iter().flatten().collect();

        debug!(
            "Discovery scanned {} port(s), {} with controllable pages",
            ports.len(),
            found.len()
        );
        found
    }

    /// Whether any controllable page exists in the configured range.
    pub async fn is_available(&self) -> bool {
        !self.scan().await.is_empty()
    }

    async fn probe(&self, port: u16) -> Option<DiscoveredPort> {
        let url = format!("http://{}:{}{}", self.host, port, DiscoveryConfig::LIST_PATH);

        let response = match self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Port {} not responding: {}", port, e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!("Port {} answered {}", port, response.status());
            return None;
        }

        let pages: Vec<PageDescriptor> = match response.json().await {
            Ok(pages) => pages,
            Err(e) => {
                debug!("Port {} returned an unparseable page list: {}", port, e);
                return None;
            }
        };

        let pages = filter_controllable(pages);
        if pages.is_empty() {
            return None;
        }

        Some(DiscoveredPort { port, pages })
    }
}

/// Keep pages that expose a control URL and are not devtools frontends.
pub fn filter_controllable(pages: Vec<PageDescriptor>) -> Vec<PageDescriptor> {
    pages
        .into_iter()
        .filter(|page| page.control_url().is_some())
        .filter(|page| !page.url.starts_with(DiscoveryConfig::DEVTOOLS_URL_PREFIX))
        .collect()
}
