// Target discovery
//
// Lists inspectable targets from the HTTP endpoint a process exposes when
// started with --remote-debugging-port, and picks one to attach to.

use crate::protocol::{CdpError, CdpResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9222;

/// The HTTP side of a remote debugging port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for DebugEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

/// One entry of `/json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type", default)]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }

    pub fn is_attachable(&self) -> bool {
        self.web_socket_debugger_url.is_some()
    }
}

/// How to choose among listed targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    /// First page target, else the first target at all
    FirstPage,
    TitleContains(String),
    UrlContains(String),
}

impl TargetSelector {
    pub fn select<'a>(&self, targets: &'a [TargetInfo]) -> Option<&'a TargetInfo> {
        let mut attachable = targets.iter().filter(|t| t.is_attachable());

        match self {
            TargetSelector::FirstPage => targets
                .iter()
                .find(|t| t.is_attachable() && t.is_page())
                .or_else(|| attachable.next()),
            TargetSelector::TitleContains(pattern) => {
                attachable.find(|t| t.title.contains(pattern.as_str()))
            }
            TargetSelector::UrlContains(pattern) => {
                attachable.find(|t| t.url.contains(pattern.as_str()))
            }
        }
    }
}

impl DebugEndpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    pub fn list_url(&self) -> String {
        format!("http://{}:{}/json", self.host, self.port)
    }

    /// Get all inspectable targets
    pub async fn list_targets(&self) -> CdpResult<Vec<TargetInfo>> {
        let url = self.list_url();

        let response = reqwest::get(&url)
            .await
            .map_err(|e| CdpError::Discovery(format!("Failed to reach {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(CdpError::Discovery(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }

        let targets: Vec<TargetInfo> = response
            .json()
            .await
            .map_err(|e| CdpError::Discovery(format!("Failed to parse targets: {}", e)))?;

        debug!("Found {} targets at {}", targets.len(), url);
        Ok(targets)
    }

    /// List targets and pick one
    pub async fn find_target(&self, selector: &TargetSelector) -> CdpResult<TargetInfo> {
        let targets = self.list_targets().await?;

        selector.select(&targets).cloned().ok_or_else(|| {
            CdpError::Discovery(format!(
                "No target matching {:?} among {} listed",
                selector,
                targets.len()
            ))
        })
    }
}
