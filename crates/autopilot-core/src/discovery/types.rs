//! Discovery result types.

use serde::{Deserialize, Serialize};

/// One entry of a target's `/json/list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDescriptor {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_socket_debugger_url: Option<String>,
}

impl PageDescriptor {
    /// The control URL, if the page can be driven at all.
    pub fn control_url(&self) -> Option<&str> {
        self.web_socket_debugger_url
            .as_deref()
            .filter(|url| !url.is_empty())
    }
}

/// A port that answered with at least one controllable page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPort {
    pub port: u16,
    pub pages: Vec<PageDescriptor>,
}
