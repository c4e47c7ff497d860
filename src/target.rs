use async_trait::async_trait;
use ipnet::IpNet;
use std::io::{self, BufRead, Write};
use std::net::IpAddr;
use tracing::{debug, info, warn};
use url::Url;

use crate::discovery::num_addresses;
use crate::error::TargetError;

/// Ranges wider than this need confirmation unless liveness probing is skipped.
pub const CONFIRM_THRESHOLD: u128 = 256;

/// What to scan, once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    SingleHost(IpAddr),
    Range(IpNet),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::SingleHost(ip) => write!(f, "{ip}"),
            Target::Range(net) => write!(f, "{net}"),
        }
    }
}

/// A resolved target plus how it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: Target,
    pub original: String,
    /// Set when the target was given as a URL or hostname.
    pub hostname: Option<String>,
}

/// Hostname resolution.
#[async_trait]
pub trait HostLookup: Send + Sync {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// System resolver via `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl HostLookup for SystemLookup {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Asks the user before an expensive range scan.
#[async_trait]
pub trait Confirm: Send {
    async fn confirm(&mut self, prompt: &str) -> bool;
}

/// Reads a `y`/`n` answer from stdin on the blocking pool.
#[derive(Debug, Default)]
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&mut self, prompt: &str) -> bool {
        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            print!("{prompt} (y/n): ");
            let _ = io::stdout().flush();
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line).is_err() {
                return false;
            }
            line.trim().eq_ignore_ascii_case("y")
        })
        .await;
        answer.unwrap_or(false)
    }
}

/// Turn a raw target string into an address or range.
///
/// Returns `Ok(None)` when the user declines to scan a large range.
pub async fn resolve_target(
    raw: &str,
    skip_confirmation: bool,
    lookup: &dyn HostLookup,
    confirm: &mut dyn Confirm,
) -> Result<Option<ResolvedTarget>, TargetError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TargetError::Invalid(raw.to_string()));
    }

    if has_url_form(raw) {
        let host = url_host(raw)?;
        let ip = resolve_host(lookup, &host)
            .await
            .ok_or_else(|| TargetError::Unresolvable(host.clone()))?;
        info!(%host, %ip, "resolved target");
        return Ok(Some(ResolvedTarget {
            target: Target::SingleHost(ip),
            original: raw.to_string(),
            hostname: Some(host),
        }));
    }

    if raw.contains('/') {
        let network: IpNet = raw
            .parse()
            .map_err(|_| TargetError::Invalid(raw.to_string()))?;
        let network = network.trunc();
        let count = num_addresses(&network);
        if count > CONFIRM_THRESHOLD && !skip_confirmation {
            warn!(%network, hosts = count, "scanning a large network, this may take a long time");
            if !confirm
                .confirm(&format!("Scan {network} ({count} addresses)?"))
                .await
            {
                return Ok(None);
            }
        }
        return Ok(Some(ResolvedTarget {
            target: Target::Range(network),
            original: raw.to_string(),
            hostname: None,
        }));
    }

    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Ok(Some(ResolvedTarget {
            target: Target::SingleHost(ip),
            original: raw.to_string(),
            hostname: None,
        }));
    }

    debug!(target = raw, "not an address, trying as a hostname");
    let ip = resolve_host(lookup, raw)
        .await
        .ok_or_else(|| TargetError::Invalid(raw.to_string()))?;
    info!(host = raw, %ip, "resolved target");
    Ok(Some(ResolvedTarget {
        target: Target::SingleHost(ip),
        original: raw.to_string(),
        hostname: Some(raw.to_string()),
    }))
}

fn has_url_form(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
}

/// Host component of a URL-ish target; `www.` inputs are read as `http://`.
fn url_host(raw: &str) -> Result<String, TargetError> {
    let parsed = if raw.to_ascii_lowercase().starts_with("www.") {
        Url::parse(&format!("http://{raw}"))
    } else {
        Url::parse(raw)
    }
    .map_err(|_| TargetError::Invalid(raw.to_string()))?;

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TargetError::Invalid(raw.to_string()))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

/// First address for `host`, preferring IPv4.
async fn resolve_host(lookup: &dyn HostLookup, host: &str) -> Option<IpAddr> {
    let addrs = match lookup.lookup(host).await {
        Ok(a) => a,
        Err(e) => {
            debug!(%host, error = %e, "lookup failed");
            return None;
        }
    };
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeLookup(HashMap<&'static str, Vec<IpAddr>>);

    #[async_trait]
    impl HostLookup for FakeLookup {
        async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.0
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))
        }
    }

    struct Answer {
        reply: bool,
        asked: usize,
    }

    #[async_trait]
    impl Confirm for Answer {
        async fn confirm(&mut self, _prompt: &str) -> bool {
            self.asked += 1;
            self.reply
        }
    }

    fn lookup() -> FakeLookup {
        let mut m = HashMap::new();
        m.insert(
            "example.com",
            vec!["2606:2800::1".parse().unwrap(), "93.184.216.34".parse().unwrap()],
        );
        m.insert("www.example.com", vec!["93.184.216.34".parse().unwrap()]);
        m.insert("db.internal", vec!["10.1.2.3".parse().unwrap()]);
        FakeLookup(m)
    }

    #[tokio::test]
    async fn url_host_is_resolved_preferring_ipv4() {
        let mut confirm = Answer { reply: true, asked: 0 };
        let r = resolve_target("https://example.com:8443/login", false, &lookup(), &mut confirm)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.target, Target::SingleHost("93.184.216.34".parse().unwrap()));
        assert_eq!(r.hostname.as_deref(), Some("example.com"));
        assert_eq!(r.original, "https://example.com:8443/login");
    }

    #[tokio::test]
    async fn www_prefix_is_treated_as_url() {
        let mut confirm = Answer { reply: true, asked: 0 };
        let r = resolve_target("www.example.com", false, &lookup(), &mut confirm)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.hostname.as_deref(), Some("www.example.com"));
    }

    #[tokio::test]
    async fn unresolvable_url_fails_fast() {
        let mut confirm = Answer { reply: true, asked: 0 };
        let err = resolve_target("http://nowhere.invalid", false, &lookup(), &mut confirm)
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::Unresolvable(h) if h == "nowhere.invalid"));
    }

    #[tokio::test]
    async fn bare_hostname_falls_back_to_dns() {
        let mut confirm = Answer { reply: true, asked: 0 };
        let r = resolve_target("db.internal", false, &lookup(), &mut confirm)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.target, Target::SingleHost("10.1.2.3".parse().unwrap()));
    }

    #[tokio::test]
    async fn unknown_bare_name_is_invalid() {
        let mut confirm = Answer { reply: true, asked: 0 };
        let err = resolve_target("not a host", false, &lookup(), &mut confirm)
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::Invalid(_)));
    }

    #[tokio::test]
    async fn cidr_host_bits_are_truncated() {
        let mut confirm = Answer { reply: true, asked: 0 };
        let r = resolve_target("192.168.1.77/24", false, &lookup(), &mut confirm)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.target, Target::Range("192.168.1.0/24".parse().unwrap()));
        assert_eq!(confirm.asked, 0);
    }

    #[tokio::test]
    async fn bad_cidr_is_invalid() {
        let mut confirm = Answer { reply: true, asked: 0 };
        for raw in ["10.0.0.0/33", "10.0.0/8", "foo/24"] {
            let err = resolve_target(raw, false, &lookup(), &mut confirm)
                .await
                .unwrap_err();
            assert!(matches!(err, TargetError::Invalid(_)), "{raw}");
        }
    }

    /// Answers only after yielding, like a prompt waiting on the terminal.
    struct SlowAnswer {
        prompts: Vec<String>,
    }

    #[async_trait]
    impl Confirm for SlowAnswer {
        async fn confirm(&mut self, prompt: &str) -> bool {
            tokio::task::yield_now().await;
            self.prompts.push(prompt.to_string());
            true
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn confirmation_is_awaited_on_a_single_threaded_runtime() {
        let mut confirm = SlowAnswer { prompts: Vec::new() };
        let r = resolve_target("10.0.0.0/16", false, &lookup(), &mut confirm)
            .await
            .unwrap();
        assert!(r.is_some());
        assert_eq!(confirm.prompts, vec!["Scan 10.0.0.0/16 (65536 addresses)?"]);
    }
}
