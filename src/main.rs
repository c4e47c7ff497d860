use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use breachkit::config::{ScanOptions, WebConfig, DEFAULT_NMAP_PATH, DEFAULT_USER_AGENT};
use breachkit::dirscan::Gobuster;
use breachkit::engine::{NmapEngine, ScanEngine};
use breachkit::logging;
use breachkit::ports::PortSpec;
use breachkit::report::{self, ScanReport};
use breachkit::scanner::{self, Orchestrator};
use breachkit::target::{self, StdinConfirm, SystemLookup, Target};
use breachkit::types::PortInfo;
use breachkit::web::{ReqwestFetcher, WebProbe};

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit status after a user interrupt.
const EXIT_INTERRUPTED: u8 = 130;

/// Network recon: nmap port and service scans plus light web checks, one JSON report.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "breachkit",
    version,
    about = "Network reconnaissance: nmap port and service scans plus light web checks.",
    after_help = "Example: breachkit -t 192.168.1.1 -p 1-1000 -v -o results.json",
    long_about = None
)]
struct Cli {
    /// Target IP address, URL, hostname or CIDR range.
    #[arg(short, long)]
    target: String,

    /// Ports to scan, e.g. 1-1000 or 22,80,8000-8010.
    #[arg(short, long, default_value = "1-1000")]
    ports: PortSpec,

    /// Scan speed, 1 (slowest) to 5 (fastest).
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=5))]
    speed: u8,

    /// Debug-level logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Write the JSON report here instead of breachkit_scan_<timestamp>.json.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Probe detected web ports.
    #[arg(long = "web-scan", default_value_t = false)]
    web_scan: bool,

    /// Everything: web probe and directory scan.
    #[arg(long = "full-scan", default_value_t = false)]
    full_scan: bool,

    /// Skip liveness probes and assume all hosts are up.
    #[arg(long = "no-ping", default_value_t = false)]
    no_ping: bool,

    /// Number of hosts scanned in parallel.
    #[arg(long, default_value_t = 5)]
    threads: usize,

    /// HTTP request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Run gobuster against each probed web URL.
    #[arg(long = "dir-scan", default_value_t = false)]
    dir_scan: bool,

    /// Wordlist for the directory scan (default: built-in common paths).
    #[arg(long)]
    wordlist: Option<PathBuf>,

    /// Path to the nmap binary.
    #[arg(long = "nmap-path", default_value = DEFAULT_NMAP_PATH)]
    nmap_path: String,

    /// Proxy URL for web probes.
    #[arg(long)]
    proxy: Option<String>,

    /// User-Agent sent by web probes.
    #[arg(long = "user-agent", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
}

impl Cli {
    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            ports: self.ports.clone(),
            speed: self.speed,
            no_ping: self.no_ping,
            threads: self.threads,
            web_scan: self.web_scan || self.full_scan,
            dir_scan: self.dir_scan || self.full_scan,
            wordlist: self.wordlist.clone(),
            nmap_path: self.nmap_path.clone(),
        }
    }

    fn web_config(&self) -> WebConfig {
        WebConfig {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout),
            proxy: self.proxy.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "error during scan");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let options = cli.scan_options();
    let web_config = cli.web_config();
    print_config(&cli, &options);

    let resolved = match target::resolve_target(
        &cli.target,
        options.no_ping,
        &SystemLookup,
        &mut StdinConfirm,
    )
    .await
    {
        Ok(Some(r)) => r,
        Ok(None) => {
            info!("scan aborted by user");
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => {
            error!(error = %e, "cannot scan target");
            return Ok(ExitCode::FAILURE);
        }
    };

    if options.dir_scan && !options.web_scan {
        warn!("--dir-scan only runs together with --web-scan");
    }

    let engine: Arc<dyn ScanEngine> = Arc::new(NmapEngine::new(options.nmap_path.clone()));
    let probe = if options.web_scan {
        let fetcher = ReqwestFetcher::new(&web_config)?;
        let mut probe = WebProbe::new(Arc::new(fetcher), web_config);
        if options.dir_scan {
            probe = probe.with_dir_scanner(Arc::new(Gobuster::new(
                options.wordlist.clone(),
                options.threads,
            )));
        }
        Some(probe)
    } else {
        None
    };
    let orchestrator = Orchestrator::new(engine, probe, options);

    let cancel = CancellationToken::new();
    scanner::cancel_on_ctrl_c(cancel.clone());

    let start_time = report::now_rfc3339();
    let report = match resolved.target {
        Target::SingleHost(ip) => {
            // The host is one unit of work: an interrupt lets it finish.
            let host = orchestrator.scan_single(ip).await;
            let interrupted = cancel.is_cancelled();
            ScanReport::single(&resolved, cli.full_scan, start_time, host, interrupted)
        }
        Target::Range(network) => {
            let scan = orchestrator.scan_range(network, &cancel).await;
            ScanReport::range(&resolved, start_time, scan)
        }
    };

    print_results_table(&report);

    let path = cli.output.clone().unwrap_or_else(report::default_output_path);
    let saved = match report::write_report(&path, &report) {
        Ok(()) => {
            info!(path = %path.display(), "results saved");
            true
        }
        Err(e) => {
            error!(error = %e, "error saving results");
            false
        }
    };

    if report.scan_info.interrupted {
        warn!("scan interrupted by user");
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    if !saved {
        return Ok(ExitCode::FAILURE);
    }
    println!("\nScan completed successfully!");
    Ok(ExitCode::SUCCESS)
}

fn print_config(cli: &Cli, options: &ScanOptions) {
    println!("breachkit configuration:");
    println!("  target       : {}", cli.target);
    println!("  ports        : {} ({} ports)", options.ports, options.ports.len());
    println!("  speed        : T{}", options.speed);
    println!("  threads      : {}", options.workers());
    println!("  no_ping      : {}", options.no_ping);
    println!("  web_scan     : {}", options.web_scan);
    println!("  dir_scan     : {}", options.dir_scan);
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<timestamped>".to_string())
    );
}

fn print_results_table(report: &ScanReport) {
    let hosts = report.host_results();
    let mut ip_w = "ip".len();
    let mut svc_w = "service".len();
    for (ip, host) in &hosts {
        ip_w = ip_w.max(ip.len());
        for (_, info) in host.open_ports() {
            svc_w = svc_w.max(service_label(info).chars().count().min(50));
        }
    }
    let port_w = "port".len().max(5);

    let open: usize = hosts.iter().map(|(_, h)| h.open_ports().count()).sum();
    println!("\nOpen ports: {} (hosts: {})", open, hosts.len());
    println!(
        "{:<ip_w$}  {:>port_w$}  {:<svc_w$}",
        "ip",
        "port",
        "service",
        ip_w = ip_w,
        port_w = port_w,
        svc_w = svc_w
    );
    println!(
        "{:-<ip_w$}  {:-<port_w$}  {:-<svc_w$}",
        "",
        "",
        "",
        ip_w = ip_w,
        port_w = port_w,
        svc_w = svc_w
    );
    for (ip, host) in &hosts {
        if let Some(err) = &host.error {
            println!(
                "{:<ip_w$}  {:>port_w$}  error: {}",
                ip,
                "-",
                err,
                ip_w = ip_w,
                port_w = port_w
            );
            continue;
        }
        for (port, info) in host.open_ports() {
            let label: String = service_label(info).chars().take(50).collect();
            println!(
                "{:<ip_w$}  {:>port_w$}  {:<svc_w$}",
                ip,
                port,
                label,
                ip_w = ip_w,
                port_w = port_w,
                svc_w = svc_w
            );
        }
    }
}

fn service_label(info: &PortInfo) -> String {
    [info.service.as_str(), info.product.as_str(), info.version.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}
