//! Partial nmap XML schema (`-oX -`).
//!
//! Only the elements the adapter reads are modelled; everything else in the
//! document is skipped by the deserializer.

use quick_xml::de::from_str;
use serde::Deserialize;
use std::net::IpAddr;

use crate::error::ScanEngineError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NmapRun {
    #[serde(rename = "host", default)]
    pub hosts: Vec<Host>,
}

impl NmapRun {
    /// The host entry whose address matches `ip`, if the engine reported it at all.
    pub fn find_host(&self, ip: IpAddr) -> Option<&Host> {
        let wanted = ip.to_string();
        self.hosts
            .iter()
            .find(|h| h.addresses.iter().any(|a| a.addr == wanted))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Host {
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,

    #[serde(default)]
    pub status: Status,

    #[serde(default)]
    pub ports: Option<Ports>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype", default)]
    pub addr_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Status {
    #[serde(rename = "@state", default)]
    pub state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<Port>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Port {
    #[serde(rename = "@portid")]
    pub portid: u16,
    #[serde(rename = "@protocol", default)]
    pub protocol: String,
    #[serde(default)]
    pub state: PortState,
    #[serde(default)]
    pub service: Option<Service>,
    #[serde(rename = "script", default)]
    pub scripts: Vec<Script>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortState {
    #[serde(rename = "@state", default)]
    pub state: String,
    #[serde(rename = "@reason", default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Service {
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "@product", default)]
    pub product: Option<String>,
    #[serde(rename = "@version", default)]
    pub version: Option<String>,
    #[serde(rename = "@extrainfo", default)]
    pub extrainfo: Option<String>,
    #[serde(rename = "@tunnel", default)]
    pub tunnel: Option<String>,
    #[serde(rename = "cpe", default)]
    pub cpe: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Script {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@output", default)]
    pub output: String,
}

pub fn parse_nmap_xml(xml: &str) -> Result<NmapRun, ScanEngineError> {
    from_str(xml).map_err(|e| ScanEngineError::Parse(e.to_string()))
}
