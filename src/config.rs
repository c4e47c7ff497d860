use std::path::PathBuf;
use std::time::Duration;

use crate::ports::PortSpec;

pub const DEFAULT_THREADS: usize = 5;
pub const DEFAULT_SPEED: u8 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_NMAP_PATH: &str = "nmap";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Options shared by discovery, the engine adapter and the orchestrator.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub ports: PortSpec,
    /// Timing level 1..=5, mapped to the engine's `-T` template.
    pub speed: u8,
    /// Treat every host as live and pass `-Pn` to the engine.
    pub no_ping: bool,
    /// Worker pool size.
    pub threads: usize,
    pub web_scan: bool,
    pub dir_scan: bool,
    pub wordlist: Option<PathBuf>,
    pub nmap_path: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            ports: PortSpec::default(),
            speed: DEFAULT_SPEED,
            no_ping: false,
            threads: DEFAULT_THREADS,
            web_scan: false,
            dir_scan: false,
            wordlist: None,
            nmap_path: DEFAULT_NMAP_PATH.to_string(),
        }
    }
}

impl ScanOptions {
    /// Worker count clamped to at least one.
    pub fn workers(&self) -> usize {
        self.threads.max(1)
    }
}

/// HTTP settings for the web probe.
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub proxy: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            proxy: None,
        }
    }
}
