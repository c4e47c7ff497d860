use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Liveness of a host as reported by the scan engine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Up,
    Down,
    #[default]
    Unknown,
}

impl HostState {
    pub fn from_engine(s: &str) -> Self {
        match s {
            "up" => HostState::Up,
            "down" => HostState::Down,
            _ => HostState::Unknown,
        }
    }
}

/// Port state, including the combined states nmap reports when it cannot tell.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "filtered")]
    Filtered,
    #[serde(rename = "unfiltered")]
    Unfiltered,
    #[serde(rename = "open|filtered")]
    OpenFiltered,
    #[serde(rename = "closed|filtered")]
    ClosedFiltered,
    #[serde(rename = "unknown")]
    Unknown,
}

impl PortState {
    pub fn from_engine(s: &str) -> Self {
        match s {
            "open" => PortState::Open,
            "closed" => PortState::Closed,
            "filtered" => PortState::Filtered,
            "unfiltered" => PortState::Unfiltered,
            "open|filtered" => PortState::OpenFiltered,
            "closed|filtered" => PortState::ClosedFiltered,
            _ => PortState::Unknown,
        }
    }
}

/// One scanned TCP port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub state: PortState,
    pub service: String,
    pub product: String,
    pub version: String,
    pub extrainfo: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpe: Vec<String>,
    /// Set to `ssl` when the service was detected behind a TLS tunnel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<String>,
    /// Script id to raw script output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<BTreeMap<String, String>>,
}

impl PortInfo {
    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

/// Outcome of the optional gobuster run against one URL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirScanResult {
    pub status: DirScanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub found_directories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirScanStatus {
    Success,
    Failed,
    Error,
}

/// Heuristic findings for one probed URL.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct WebResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Response headers keyed by lower-cased name.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub missing_security_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_disclosure: Option<String>,
    #[serde(default)]
    pub form_issues: Vec<String>,
    #[serde(default)]
    pub detected_cms: Vec<String>,
    #[serde(default)]
    pub js_libraries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_scan: Option<DirScanResult>,
}

impl WebResult {
    pub fn failed(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Everything collected for one host. Built by a single worker and returned by value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct HostResult {
    pub status: HostState,
    pub ports: BTreeMap<u16, PortInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_scan: Option<BTreeMap<String, WebResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostResult {
    pub fn down() -> Self {
        Self {
            status: HostState::Down,
            ..Self::default()
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn open_ports(&self) -> impl Iterator<Item = (u16, &PortInfo)> {
        self.ports
            .iter()
            .filter(|(_, info)| info.is_open())
            .map(|(port, info)| (*port, info))
    }
}
