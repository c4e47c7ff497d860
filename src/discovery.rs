use ipnet::{IpAddrRange, IpNet};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScanOptions;
use crate::engine::{self, ScanEngine};

/// Hosts of a range that go on to the port scan.
#[derive(Debug, Clone)]
pub enum LiveHosts {
    /// Every host address of the range, produced lazily.
    Assumed(IpAddrRange),
    /// Addresses that answered a probe, in completion order.
    Probed(Vec<IpAddr>),
}

impl LiveHosts {
    /// Number of probed live hosts; `None` when all hosts are assumed live.
    pub fn probed_count(&self) -> Option<usize> {
        match self {
            LiveHosts::Assumed(_) => None,
            LiveHosts::Probed(v) => Some(v.len()),
        }
    }
}

impl IntoIterator for LiveHosts {
    type Item = IpAddr;
    type IntoIter = LiveHostsIter;

    fn into_iter(self) -> LiveHostsIter {
        match self {
            LiveHosts::Assumed(range) => LiveHostsIter::Assumed(range),
            LiveHosts::Probed(v) => LiveHostsIter::Probed(v.into_iter()),
        }
    }
}

pub enum LiveHostsIter {
    Assumed(IpAddrRange),
    Probed(std::vec::IntoIter<IpAddr>),
}

impl Iterator for LiveHostsIter {
    type Item = IpAddr;

    fn next(&mut self) -> Option<IpAddr> {
        match self {
            LiveHostsIter::Assumed(range) => range.next(),
            LiveHostsIter::Probed(it) => it.next(),
        }
    }
}

/// Outcome of host discovery over a range.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub live: LiveHosts,
    pub probed: usize,
    pub interrupted: bool,
}

/// Number of addresses covered by `network`, saturating for huge IPv6 prefixes.
pub fn num_addresses(network: &IpNet) -> u128 {
    let host_bits = u32::from(network.max_prefix_len() - network.prefix_len());
    1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
}

/// Expand a range into the addresses worth scanning.
///
/// For IPv4 ranges wider than /31 the network and broadcast addresses are skipped.
pub fn expand_hosts(network: &IpNet) -> IpAddrRange {
    network.hosts()
}

/// Determine which addresses of `network` are live.
///
/// With `no_ping` every host address is taken as live without probing; the
/// addresses are handed out lazily so huge ranges cost nothing up front.
/// Otherwise each address gets exactly one `-sn` probe, at most `threads`
/// at a time; a failed probe means the host is left out.
pub async fn discover_live_hosts(
    engine: Arc<dyn ScanEngine>,
    network: IpNet,
    options: &ScanOptions,
    cancel: &CancellationToken,
) -> Discovery {
    if options.no_ping {
        info!(
            %network,
            hosts = num_addresses(&network),
            "skipping liveness probes, assuming all hosts are up"
        );
        return Discovery {
            live: LiveHosts::Assumed(expand_hosts(&network)),
            probed: 0,
            interrupted: false,
        };
    }

    let sem = Arc::new(Semaphore::new(options.workers()));
    let mut set = JoinSet::new();
    let mut interrupted = false;
    let mut probed = 0usize;

    for ip in expand_hosts(&network) {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                interrupted = true;
                break;
            }
            permit = sem.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };
        let engine = engine.clone();
        probed += 1;
        set.spawn(async move {
            let _permit = permit;
            let up = engine::ping_host(engine.as_ref(), ip).await;
            (ip, up)
        });
    }

    let mut live = Vec::new();
    while let Some(res) = set.join_next().await {
        match res {
            Ok((ip, true)) => {
                info!(%ip, "host is up");
                live.push(ip);
            }
            Ok((ip, false)) => debug!(%ip, "host did not answer"),
            Err(e) => warn!(error = %e, "liveness probe task failed"),
        }
    }

    info!(%network, live = live.len(), probed, "host discovery finished");
    Discovery {
        live: LiveHosts::Probed(live),
        probed,
        interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanEngineError;
    use crate::nmap_xml::{parse_nmap_xml, NmapRun};
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    /// Answers `-sn` for `up`, fails it for `erroring`, records every call.
    #[derive(Default)]
    struct PingEngine {
        up: Vec<IpAddr>,
        erroring: Vec<IpAddr>,
        calls: Mutex<Vec<IpAddr>>,
    }

    #[async_trait]
    impl ScanEngine for PingEngine {
        async fn scan(
            &self,
            ip: IpAddr,
            _arguments: &[String],
        ) -> Result<NmapRun, ScanEngineError> {
            self.calls.lock().unwrap().push(ip);
            if self.erroring.contains(&ip) {
                return Err(ScanEngineError::Failed {
                    status: Some(1),
                    stderr: "Failed to resolve".to_string(),
                });
            }
            if self.up.contains(&ip) {
                return parse_nmap_xml(&format!(
                    r#"<nmaprun><host><status state="up"/><address addr="{ip}"/></host></nmaprun>"#
                ));
            }
            Ok(NmapRun::default())
        }
    }

    fn v4(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[tokio::test]
    async fn ping_error_means_not_live_and_no_retry() {
        let engine = Arc::new(PingEngine {
            up: vec![v4(1), v4(2)],
            erroring: vec![v4(2)],
            ..PingEngine::default()
        });
        let found = discover_live_hosts(
            engine.clone(),
            "192.168.1.0/29".parse().unwrap(),
            &ScanOptions::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(!found.interrupted);
        assert_eq!(found.probed, 6);
        let live: Vec<IpAddr> = found.live.into_iter().collect();
        assert_eq!(live, vec![v4(1)]);

        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.len(), 6);
        assert_eq!(calls.iter().filter(|ip| **ip == v4(2)).count(), 1);
    }

    #[tokio::test]
    async fn no_ping_on_huge_ipv6_range_is_lazy() {
        let engine = Arc::new(PingEngine::default());
        let options = ScanOptions {
            no_ping: true,
            ..ScanOptions::default()
        };
        let found = discover_live_hosts(
            engine.clone(),
            "2001:db8::/64".parse().unwrap(),
            &options,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(found.probed, 0);
        assert_eq!(found.live.probed_count(), None);
        let first: Vec<IpAddr> = found.live.into_iter().take(3).collect();
        assert_eq!(first.len(), 3);
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn counts_addresses() {
        assert_eq!(num_addresses(&"10.0.0.0/24".parse().unwrap()), 256);
        assert_eq!(num_addresses(&"10.0.0.0/23".parse().unwrap()), 512);
        assert_eq!(num_addresses(&"10.0.0.7/32".parse().unwrap()), 1);
        assert_eq!(num_addresses(&"::/0".parse().unwrap()), u128::MAX);
    }

    #[test]
    fn expand_small_cidr_excludes_network_and_broadcast() {
        let net: IpNet = "192.168.1.0/30".parse().unwrap();
        let hosts: Vec<IpAddr> = expand_hosts(&net).collect();
        assert_eq!(
            hosts,
            vec![
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
            ]
        );
    }

    #[test]
    fn single_address_range_keeps_the_address() {
        let net: IpNet = "10.0.0.5/32".parse().unwrap();
        let hosts: Vec<IpAddr> = expand_hosts(&net).collect();
        assert_eq!(hosts, vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))]);
    }
}
