use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ScanOptions;
use crate::discovery::{self, num_addresses};
use crate::engine::{self, ScanEngine};
use crate::types::HostResult;
use crate::web::WebProbe;

/// Results of scanning a set of hosts.
#[derive(Debug, Clone, Default)]
pub struct HostScan {
    pub hosts: BTreeMap<String, HostResult>,
    pub interrupted: bool,
}

/// Results of a whole range: discovery then per-host pipelines.
#[derive(Debug, Clone, Default)]
pub struct RangeScan {
    pub total_hosts: u128,
    pub live_hosts: usize,
    pub hosts: BTreeMap<String, HostResult>,
    pub interrupted: bool,
}

/// Drives discovery and per-host pipelines over a bounded pool of tasks.
///
/// Each task owns one host end to end (port scan, then the optional web probe)
/// and hands its `HostResult` back by value, so a result only becomes visible
/// once it is complete.
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<dyn ScanEngine>,
    probe: Option<Arc<WebProbe>>,
    options: Arc<ScanOptions>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ScanEngine>, probe: Option<WebProbe>, options: ScanOptions) -> Self {
        Self {
            engine,
            probe: probe.map(Arc::new),
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Port scan one host, then probe its web ports if enabled.
    pub async fn scan_single(&self, ip: IpAddr) -> HostResult {
        scan_pipeline(
            self.engine.as_ref(),
            self.probe.as_deref(),
            &self.options,
            ip,
        )
        .await
    }

    /// Run the per-host pipeline for each address, at most `threads` at once.
    ///
    /// Addresses are pulled from `targets` only as workers free up. On
    /// cancellation no further hosts are started; hosts already running are
    /// left to finish and their results are kept.
    pub async fn scan_hosts<I>(&self, targets: I, cancel: &CancellationToken) -> HostScan
    where
        I: IntoIterator<Item = IpAddr>,
    {
        let sem = Arc::new(Semaphore::new(self.options.workers()));
        let mut set = JoinSet::new();
        let mut hosts = BTreeMap::new();
        let mut interrupted = false;

        for ip in targets {
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
            let this = self.clone();
            set.spawn(async move {
                let _permit = permit; // held until this host is done
                let result = this.scan_single(ip).await;
                (ip, result)
            });
            while let Some(res) = set.try_join_next() {
                collect_host(&mut hosts, res);
            }
        }

        if interrupted {
            warn!(running = set.len(), "scan interrupted, waiting for running hosts");
        }

        while let Some(res) = set.join_next().await {
            collect_host(&mut hosts, res);
        }

        HostScan {
            hosts,
            interrupted: interrupted || cancel.is_cancelled(),
        }
    }

    /// Discover live hosts in `network`, then scan each of them.
    pub async fn scan_range(&self, network: IpNet, cancel: &CancellationToken) -> RangeScan {
        let total_hosts = num_addresses(&network);
        info!(%network, total_hosts, "scanning network");

        let found =
            discovery::discover_live_hosts(self.engine.clone(), network, &self.options, cancel)
                .await;
        let probed_live = found.live.probed_count();
        if let Some(live) = probed_live {
            info!(live, "found live hosts");
        }

        if found.interrupted || cancel.is_cancelled() {
            return RangeScan {
                total_hosts,
                live_hosts: probed_live.unwrap_or(0),
                hosts: BTreeMap::new(),
                interrupted: true,
            };
        }

        let scanned = self.scan_hosts(found.live, cancel).await;
        RangeScan {
            total_hosts,
            // Without probing, every host that was scanned counts as live.
            live_hosts: probed_live.unwrap_or(scanned.hosts.len()),
            hosts: scanned.hosts,
            interrupted: scanned.interrupted,
        }
    }
}

fn collect_host(
    hosts: &mut BTreeMap<String, HostResult>,
    res: Result<(IpAddr, HostResult), tokio::task::JoinError>,
) {
    match res {
        Ok((ip, result)) => {
            hosts.insert(ip.to_string(), result);
        }
        Err(e) => warn!(error = %e, "host scan task failed"),
    }
}

async fn scan_pipeline(
    engine: &dyn ScanEngine,
    probe: Option<&WebProbe>,
    options: &ScanOptions,
    ip: IpAddr,
) -> HostResult {
    let mut result = engine::scan_host(engine, ip, options).await;
    if let Some(probe) = probe {
        result.web_scan = Some(probe.probe_host(ip, &result).await);
    }
    result
}

/// Cancel `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted by user");
            token.cancel();
        }
    });
}
