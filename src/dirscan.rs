use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};
use url::Url;

use crate::types::{DirScanResult, DirScanStatus};

/// Status codes gobuster reports as hits.
pub const STATUS_CODES: &str = "200,204,301,302,307,401,403";

/// Paths tried when no wordlist is given.
pub const COMMON_PATHS: &[&str] = &[
    "admin", "login", "wp-admin", "administrator", "phpmyadmin", "dashboard",
    "wp-content", "upload", "uploads", "files", "images", "img", "css", "js",
    "backup", "backups", "bak", "old", "new", "test", "dev", "development",
    "staging", "stage", "prod", "production", "api", "v1", "v2", "beta",
    "config", "configuration", "setup", "install", "wp-includes", "include",
    "includes", "cgi-bin", "bin", "app", "applications", "tools", "temp",
    "tmp", "private", "public", "src", "source", "log", "logs", "admin.php",
    "index.php", "login.php", "wp-login.php", "robots.txt", "sitemap.xml",
    "server-status", ".git", ".svn", ".htaccess", ".htpasswd", "console",
    "webmail", "mail", "email", "cpanel", "ftp", "ssh", "webdav", "backup-db",
    "database", "db", "sql", "mysql", "oracle", "shop", "store", "cart",
    "checkout", "payment", "pay", "billing", "bill", "account", "profile",
    "settings", "setting", "config.php", "configuration.php", "wp-config.php",
    "forum", "forums", "blog", "blogs", "portal", "site", "sites", "host",
    "hosting", "cloud", "about", "contact", "feedback", "support", "help",
    "faq", "career", "careers", "job", "jobs", "newsletter", "press", "media",
    "download", "downloads", "content", "assets", "static", "data", "docs",
    "documentation", "wiki", "status", "stats", "statistics", "analytics",
    "report", "reports", "login.aspx", "admin.aspx", "index.aspx", "default.aspx",
    "login.jsp", "admin.jsp", "index.jsp", "home", "index", "default", "search",
];

/// Directory brute-forcing against one URL.
#[async_trait]
pub trait DirScanner: Send + Sync {
    async fn scan(&self, url: &str) -> DirScanResult;
}

/// Shells out to the `gobuster` binary.
#[derive(Debug, Clone)]
pub struct Gobuster {
    program: String,
    wordlist: Option<PathBuf>,
    threads: usize,
}

impl Gobuster {
    pub fn new(wordlist: Option<PathBuf>, threads: usize) -> Self {
        Self {
            program: "gobuster".to_string(),
            wordlist,
            threads: threads.max(1),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, url: &str, wordlist: &Path, output_file: &str) -> Vec<String> {
        vec![
            "dir".to_string(),
            "-u".to_string(),
            url.to_string(),
            "-w".to_string(),
            wordlist.display().to_string(),
            "-q".to_string(),
            "-t".to_string(),
            self.threads.to_string(),
            "-o".to_string(),
            output_file.to_string(),
            "-s".to_string(),
            STATUS_CODES.to_string(),
        ]
    }

    async fn run(&self, url: &str, wordlist: &Path) -> DirScanResult {
        let output_file = output_file_name(url);
        let args = self.args(url, wordlist, &output_file);
        let command = format!("{} {}", self.program, args.join(" "));
        info!(%command, "starting directory scan");

        let output = match Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(o) => o,
            Err(e) => {
                warn!(
                    program = %self.program,
                    error = %e,
                    "could not run directory scanner; is gobuster installed?"
                );
                return DirScanResult {
                    status: DirScanStatus::Error,
                    command: Some(command),
                    found_directories: Vec::new(),
                    output_file: None,
                    error: Some(e.to_string()),
                };
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(%url, error = %stderr, "directory scan failed");
            return DirScanResult {
                status: DirScanStatus::Failed,
                command: Some(command),
                found_directories: Vec::new(),
                output_file: None,
                error: Some(stderr),
            };
        }

        let found: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        info!(%url, found = found.len(), output = %output_file, "directory scan completed");
        DirScanResult {
            status: DirScanStatus::Success,
            command: Some(command),
            found_directories: found,
            output_file: Some(output_file),
            error: None,
        }
    }
}

#[async_trait]
impl DirScanner for Gobuster {
    async fn scan(&self, url: &str) -> DirScanResult {
        if let Some(path) = &self.wordlist {
            return self.run(url, path).await;
        }

        // Dropping the handle deletes the temporary wordlist.
        let tmp = match write_default_wordlist() {
            Ok(t) => t,
            Err(e) => {
                return DirScanResult {
                    status: DirScanStatus::Error,
                    command: None,
                    found_directories: Vec::new(),
                    output_file: None,
                    error: Some(format!("failed to create wordlist: {e}")),
                };
            }
        };
        info!(entries = COMMON_PATHS.len(), "created temporary wordlist");
        self.run(url, tmp.path()).await
    }
}

fn write_default_wordlist() -> std::io::Result<tempfile::NamedTempFile> {
    let mut tmp = tempfile::Builder::new().suffix(".txt").tempfile()?;
    for path in COMMON_PATHS {
        writeln!(tmp, "{path}")?;
    }
    tmp.flush()?;
    Ok(tmp)
}

/// `gobuster_<host>_<port>.txt` for the URL's authority.
pub fn output_file_name(url: &str) -> String {
    let authority = match Url::parse(url) {
        Ok(u) => match (u.host_str(), u.port_or_known_default()) {
            (Some(h), Some(p)) => format!("{h}_{p}"),
            (Some(h), None) => h.to_string(),
            _ => url.to_string(),
        },
        Err(_) => url.to_string(),
    };
    let safe: String = authority
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("gobuster_{safe}.txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_file_uses_host_and_port() {
        assert_eq!(output_file_name("http://10.0.0.5:8080"), "gobuster_10.0.0.5_8080.txt");
        assert_eq!(output_file_name("https://10.0.0.5"), "gobuster_10.0.0.5_443.txt");
    }

    #[test]
    fn args_carry_wordlist_threads_and_codes() {
        let g = Gobuster::new(None, 0);
        let args = g.args("http://h:80", Path::new("/tmp/w.txt"), "out.txt");
        assert_eq!(
            args,
            vec![
                "dir", "-u", "http://h:80", "-w", "/tmp/w.txt", "-q", "-t", "1", "-o", "out.txt",
                "-s", STATUS_CODES,
            ]
        );
    }

    #[test]
    fn default_wordlist_has_every_entry() {
        let tmp = write_default_wordlist().unwrap();
        let content = std::fs::read_to_string(tmp.path()).unwrap();
        assert_eq!(content.lines().count(), COMMON_PATHS.len());
        assert!(content.lines().any(|l| l == "robots.txt"));
    }

    #[tokio::test]
    async fn missing_binary_is_reported_not_raised() {
        let g = Gobuster::new(Some(PathBuf::from("/nonexistent/words.txt")), 2)
            .with_program("/nonexistent/gobuster-binary");
        let res = g.scan("http://127.0.0.1:80").await;
        assert_eq!(res.status, DirScanStatus::Error);
        assert!(res.error.is_some());
    }
}
