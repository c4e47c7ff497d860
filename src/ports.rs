use anyhow::{bail, Context, Result};
use std::fmt;
use std::str::FromStr;

/// Default port range handed to the engine when none is given.
pub const DEFAULT_PORT_SPEC: &str = "1-1000";

/// A validated port specification in engine syntax, e.g. `22,80,8000-8010`.
///
/// The original text is kept (whitespace removed) so the engine receives exactly
/// what the user asked for; parsing only checks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    spec: String,
    count: usize,
}

impl PortSpec {
    pub fn parse(s: &str) -> Result<Self> {
        let spec: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let ports = parse_ports_str(&spec)?;
        if ports.is_empty() {
            bail!("empty port specification");
        }
        Ok(Self {
            spec,
            count: ports.len(),
        })
    }

    /// The port list as passed to `-p`.
    pub fn as_str(&self) -> &str {
        &self.spec
    }

    /// Number of distinct ports covered.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for PortSpec {
    fn default() -> Self {
        Self {
            spec: DEFAULT_PORT_SPEC.to_string(),
            count: 1000,
        }
    }
}

impl FromStr for PortSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

/// Parse a comma-separated port list into a deduplicated list of TCP ports (1..=65535).
///
/// Supported items:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
///
/// Empty items (`80,,443`) are skipped.
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (idx, raw_item) in s.split(',').enumerate() {
        let item_no = idx + 1;
        let item = raw_item.trim();
        if item.is_empty() {
            continue;
        }

        if let Some((a, b)) = item.split_once('-') {
            let start = parse_port_str(a.trim())
                .with_context(|| format!("item {item_no}: invalid start in range: {a}"))?;
            let end = parse_port_str(b.trim())
                .with_context(|| format!("item {item_no}: invalid end in range: {b}"))?;
            if start > end {
                bail!("item {item_no}: invalid range {start}-{end} (start > end)");
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            continue;
        }

        let p = parse_port_str(item)
            .with_context(|| format!("item {item_no}: invalid port value: {item}"))?;
        if seen.insert(p) {
            out.push(p);
        }
    }

    Ok(out)
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_ports() {
        let ports = parse_ports_str("80,22, 443 ").unwrap();
        assert_eq!(ports, vec![80, 22, 443]);
    }

    #[test]
    fn parse_ranges_and_dedup() {
        let ports = parse_ports_str("8000-8002,80,8001").unwrap();
        assert_eq!(ports, vec![8000, 8001, 8002, 80]);
    }

    #[test]
    fn invalid_values_error() {
        assert!(parse_ports_str("70000").is_err());
        assert!(parse_ports_str("http").is_err());
        assert!(parse_ports_str("90-80").is_err());
    }

    #[test]
    fn spec_keeps_engine_text() {
        let spec = PortSpec::parse(" 22, 80-82 ").unwrap();
        assert_eq!(spec.as_str(), "22,80-82");
        assert_eq!(spec.len(), 4);
    }

    #[test]
    fn default_spec_is_first_thousand() {
        let spec = PortSpec::default();
        assert_eq!(spec.as_str(), "1-1000");
        assert_eq!(spec, PortSpec::parse("1-1000").unwrap());
    }

    #[test]
    fn empty_spec_rejected() {
        assert!(PortSpec::parse(" , ").is_err());
    }
}
