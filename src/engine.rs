use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ScanOptions;
use crate::error::ScanEngineError;
use crate::nmap_xml::{self, NmapRun};
use crate::ports::PortSpec;
use crate::types::{HostResult, HostState, PortInfo, PortState};

/// Scripts run against every port scan.
pub const SCAN_SCRIPTS: &str = "banner,version,vuln";

/// The external port-scanning engine: one invocation against one IP.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn scan(&self, ip: IpAddr, arguments: &[String]) -> Result<NmapRun, ScanEngineError>;
}

/// Runs the nmap binary and reads its XML report from stdout.
///
/// There is no timeout on the child process and it is not killed when the
/// future is dropped: an interrupted run lets in-flight scans finish on their own.
#[derive(Debug, Clone)]
pub struct NmapEngine {
    program: String,
}

impl NmapEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ScanEngine for NmapEngine {
    async fn scan(&self, ip: IpAddr, arguments: &[String]) -> Result<NmapRun, ScanEngineError> {
        debug!(program = %self.program, ?arguments, %ip, "invoking scan engine");
        let output = Command::new(&self.program)
            .args(arguments)
            .arg("-oX")
            .arg("-")
            .arg(ip.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ScanEngineError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ScanEngineError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        nmap_xml::parse_nmap_xml(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Engine arguments for a port scan. Deterministic for identical input.
pub fn build_scan_args(ports: &PortSpec, speed: u8, no_ping: bool) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        ports.as_str().to_string(),
        "-sV".to_string(),
        "-sS".to_string(),
        format!("--script={SCAN_SCRIPTS}"),
        format!("-T{}", speed.clamp(1, 5)),
    ];
    if no_ping {
        args.push("-Pn".to_string());
    }
    args
}

/// Engine arguments for a liveness probe.
pub fn build_ping_args() -> Vec<String> {
    vec!["-sn".to_string()]
}

/// Port-scan one IP and normalize the engine's answer.
///
/// Never fails: an engine error is recorded on the returned result, and a host
/// missing from the engine's report comes back `down` with no ports.
pub async fn scan_host(engine: &dyn ScanEngine, ip: IpAddr, options: &ScanOptions) -> HostResult {
    info!(%ip, ports = %options.ports, "scanning ports");
    let args = build_scan_args(&options.ports, options.speed, options.no_ping);
    match engine.scan(ip, &args).await {
        Ok(run) => normalize_host(&run, ip),
        Err(e) => {
            warn!(%ip, error = %e, "port scan failed");
            HostResult::failed(e)
        }
    }
}

/// Ask the engine whether `ip` is up. Any engine error counts as not live.
pub async fn ping_host(engine: &dyn ScanEngine, ip: IpAddr) -> bool {
    match engine.scan(ip, &build_ping_args()).await {
        Ok(run) => run
            .find_host(ip)
            .map(|h| HostState::from_engine(&h.status.state) == HostState::Up)
            .unwrap_or(false),
        Err(e) => {
            debug!(%ip, error = %e, "liveness probe failed");
            false
        }
    }
}

/// Convert the engine's report for `ip` into a `HostResult`.
pub fn normalize_host(run: &NmapRun, ip: IpAddr) -> HostResult {
    let Some(host) = run.find_host(ip) else {
        warn!(%ip, "host seems to be down or not responding to scans");
        return HostResult::down();
    };

    let mut result = HostResult {
        status: HostState::from_engine(&host.status.state),
        ..HostResult::default()
    };

    let Some(ports) = &host.ports else {
        return result;
    };

    for port in ports.ports.iter().filter(|p| p.protocol == "tcp") {
        let service = port.service.clone().unwrap_or_default();
        let vulnerabilities = if port.scripts.is_empty() {
            None
        } else {
            Some(
                port.scripts
                    .iter()
                    .map(|s| (s.id.clone(), s.output.clone()))
                    .collect::<BTreeMap<_, _>>(),
            )
        };

        let info = PortInfo {
            state: PortState::from_engine(&port.state.state),
            service: service.name,
            product: service.product.unwrap_or_default(),
            version: service.version.unwrap_or_default(),
            extrainfo: service.extrainfo.unwrap_or_default(),
            reason: port.state.reason.clone(),
            cpe: service.cpe,
            tunnel: service.tunnel,
            vulnerabilities,
        };

        if info.is_open() {
            info!(
                %ip,
                port = port.portid,
                service = %describe_service(&info),
                "open port"
            );
            for (script, output) in info.vulnerabilities.iter().flatten() {
                if output.contains("VULNERABLE") {
                    warn!(%ip, port = port.portid, %script, %output, "vulnerability found");
                }
            }
        }

        result.ports.insert(port.portid, info);
    }

    result
}

fn describe_service(info: &PortInfo) -> String {
    let mut s = info.service.clone();
    if !info.product.is_empty() {
        s.push_str(" - ");
        s.push_str(&info.product);
    }
    if !info.version.is_empty() {
        s.push(' ');
        s.push_str(&info.version);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmap_xml::parse_nmap_xml;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn scan_args_are_deterministic() {
        let ports = PortSpec::parse("1-1000").unwrap();
        let args = build_scan_args(&ports, 3, false);
        assert_eq!(
            args,
            vec!["-p", "1-1000", "-sV", "-sS", "--script=banner,version,vuln", "-T3"]
        );
        assert_eq!(args, build_scan_args(&ports, 3, false));
    }

    #[test]
    fn no_ping_appends_pn() {
        let ports = PortSpec::parse("80").unwrap();
        let args = build_scan_args(&ports, 5, true);
        assert_eq!(args.last().map(String::as_str), Some("-Pn"));
        assert!(args.contains(&"-T5".to_string()));
    }

    #[test]
    fn missing_host_is_down_with_no_ports() {
        let run = parse_nmap_xml("<nmaprun></nmaprun>").unwrap();
        let res = normalize_host(&run, ip("10.0.0.9"));
        assert_eq!(res.status, HostState::Down);
        assert!(res.ports.is_empty());
        assert!(res.error.is_none());
    }

    #[test]
    fn normalizes_tcp_ports_and_scripts() {
        let xml = r#"<nmaprun>
          <host>
            <status state="up"/>
            <address addr="10.0.0.5" addrtype="ipv4"/>
            <ports>
              <port protocol="tcp" portid="443">
                <state state="open" reason="syn-ack"/>
                <service name="http" product="nginx" version="1.18.0" tunnel="ssl"/>
                <script id="ssl-heartbleed" output="VULNERABLE: heartbleed"/>
              </port>
              <port protocol="tcp" portid="25">
                <state state="filtered" reason="no-response"/>
              </port>
              <port protocol="udp" portid="53">
                <state state="open" reason="udp-response"/>
                <service name="domain"/>
              </port>
            </ports>
          </host>
        </nmaprun>"#;
        let run = parse_nmap_xml(xml).unwrap();
        let res = normalize_host(&run, ip("10.0.0.5"));

        assert_eq!(res.status, HostState::Up);
        assert_eq!(res.ports.keys().copied().collect::<Vec<_>>(), vec![25, 443]);

        let https = &res.ports[&443];
        assert_eq!(https.state, PortState::Open);
        assert_eq!(https.service, "http");
        assert_eq!(https.product, "nginx");
        assert_eq!(https.version, "1.18.0");
        assert_eq!(https.tunnel.as_deref(), Some("ssl"));
        let vulns = https.vulnerabilities.as_ref().expect("scripts");
        assert!(vulns["ssl-heartbleed"].contains("VULNERABLE"));

        let smtp = &res.ports[&25];
        assert_eq!(smtp.state, PortState::Filtered);
        assert_eq!(smtp.service, "");
        assert!(smtp.vulnerabilities.is_none());
    }
}
