use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use ::time::{format_description::well_known, macros::format_description, OffsetDateTime};

use crate::error::PersistenceError;
use crate::scanner::RangeScan;
use crate::target::ResolvedTarget;
use crate::types::HostResult;

/// Prefix of the default report filename.
pub const TOOL_NAME: &str = "breachkit";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Full,
    Custom,
    Network,
}

/// Run metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanInfo {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub scan_type: ScanType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_hosts: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_hosts: Option<usize>,
    #[serde(default)]
    pub interrupted: bool,
}

/// The one artifact written per run.
///
/// A single-host run fills `port_scan`; a range run fills `hosts` and
/// `live_hosts`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub scan_info: ScanInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_scan: Option<HostResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<BTreeMap<String, HostResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_hosts: Option<usize>,
}

impl ScanReport {
    pub fn single(
        resolved: &ResolvedTarget,
        full_scan: bool,
        start_time: String,
        host: HostResult,
        interrupted: bool,
    ) -> Self {
        Self {
            scan_info: ScanInfo {
                target: resolved.target.to_string(),
                original_target: resolved.hostname.as_ref().map(|_| resolved.original.clone()),
                hostname: resolved.hostname.clone(),
                start_time,
                end_time: now_rfc3339(),
                scan_type: if full_scan { ScanType::Full } else { ScanType::Custom },
                total_hosts: None,
                live_hosts: None,
                interrupted,
            },
            port_scan: Some(host),
            hosts: None,
            live_hosts: None,
        }
    }

    pub fn range(resolved: &ResolvedTarget, start_time: String, scan: RangeScan) -> Self {
        Self {
            scan_info: ScanInfo {
                target: resolved.target.to_string(),
                original_target: None,
                hostname: None,
                start_time,
                end_time: now_rfc3339(),
                scan_type: ScanType::Network,
                total_hosts: Some(scan.total_hosts),
                live_hosts: Some(scan.live_hosts),
                interrupted: scan.interrupted,
            },
            port_scan: None,
            hosts: Some(scan.hosts),
            live_hosts: Some(scan.live_hosts),
        }
    }

    /// Host results in the report, keyed by IP.
    pub fn host_results(&self) -> Vec<(String, &HostResult)> {
        let mut out: Vec<(String, &HostResult)> = Vec::new();
        if let Some(host) = &self.port_scan {
            out.push((self.scan_info.target.clone(), host));
        }
        for (ip, host) in self.hosts.iter().flatten() {
            out.push((ip.clone(), host));
        }
        out
    }
}

/// Write the report as pretty JSON.
pub fn write_report(path: &Path, report: &ScanReport) -> Result<(), PersistenceError> {
    let io_err = |source| PersistenceError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush().map_err(io_err)?;
    Ok(())
}

/// `breachkit_scan_<YYYYMMDD_HHMMSS>.json`, UTC.
pub fn default_output_path() -> PathBuf {
    default_output_path_at(OffsetDateTime::now_utc())
}

pub fn default_output_path_at(at: OffsetDateTime) -> PathBuf {
    let stamp = at
        .format(format_description!("[year][month][day]_[hour][minute][second]"))
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    PathBuf::from(format!("{TOOL_NAME}_scan_{stamp}.json"))
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
