use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::WebConfig;
use crate::dirscan::DirScanner;
use crate::error::WebProbeError;
use crate::types::{HostResult, WebResult};

/// Ports probed even when the engine did not name the service.
pub const WELL_KNOWN_WEB_PORTS: [u16; 4] = [80, 443, 8080, 8443];

/// Header checklist, in report order. Any one of the names satisfies an entry.
pub const SECURITY_HEADERS: &[(&[&str], &str)] = &[
    (&["strict-transport-security"], "Missing HSTS header"),
    (&["content-security-policy"], "Missing Content-Security-Policy header"),
    (&["x-content-type-options"], "Missing X-Content-Type-Options header"),
    (&["x-frame-options"], "Missing X-Frame-Options header"),
    (&["x-xss-protection"], "Missing X-XSS-Protection header"),
    (&["referrer-policy"], "Missing Referrer-Policy header"),
    (
        &["feature-policy", "permissions-policy"],
        "Missing Feature-Policy/Permissions-Policy header",
    ),
];

/// CMS and framework signatures, matched against the lower-cased body.
pub const CMS_SIGNATURES: &[(&str, &[&str])] = &[
    ("WordPress", &["wp-content", "wp-includes", "wp-admin"]),
    ("Joomla", &["com_content", "com_users", "Joomla!"]),
    ("Drupal", &["Drupal.settings", "drupal.js", "/sites/default/files"]),
    ("Magento", &["Mage.", "magento", "Magento_"]),
    ("Django", &["csrfmiddlewaretoken", "__admin", "django"]),
    ("Laravel", &["laravel", "csrf-token", "XSRF-TOKEN"]),
    ("ASP.NET", &["__VIEWSTATE", "__EVENTVALIDATION", "ASP.NET"]),
    ("PHP", &["PHPSESSID"]),
];

pub const JS_LIBRARIES: &[&str] = &["jquery", "bootstrap", "angular", "react", "vue"];

/// Input names accepted as a CSRF token.
pub const CSRF_FIELD_NAMES: &[&str] = &["csrf", "csrf_token", "_token", "token"];

pub const FORM_WITHOUT_CSRF: &str = "Form without CSRF protection detected";
pub const FORM_USES_GET: &str = "Form using GET method instead of POST";

/// A fetched HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// Minimal HTTP client seam used by the probe.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<HttpResponse, WebProbeError>;
}

/// `reqwest` client with certificate verification disabled; scan targets are
/// usually self-signed.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(config: &WebConfig) -> Result<Self, WebProbeError> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(config.timeout);
        if let Some(proxy) = &config.proxy {
            let proxy =
                reqwest::Proxy::all(proxy).map_err(|e| WebProbeError::Client(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| WebProbeError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<HttpResponse, WebProbeError> {
        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| WebProbeError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| WebProbeError::Body(e.to_string()))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Issues one GET per web port of a host and runs the heuristic checks.
pub struct WebProbe {
    fetcher: Arc<dyn HttpFetcher>,
    config: WebConfig,
    dir_scanner: Option<Arc<dyn DirScanner>>,
}

impl WebProbe {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: WebConfig) -> Self {
        Self {
            fetcher,
            config,
            dir_scanner: None,
        }
    }

    /// Run a directory scan against every URL that answered.
    pub fn with_dir_scanner(mut self, scanner: Arc<dyn DirScanner>) -> Self {
        self.dir_scanner = Some(scanner);
        self
    }

    /// Probe every web port of `host`. Failures are recorded per URL.
    pub async fn probe_host(&self, ip: IpAddr, host: &HostResult) -> BTreeMap<String, WebResult> {
        let mut results = BTreeMap::new();
        let urls = web_urls(ip, host);
        if urls.is_empty() {
            info!(%ip, "no web services detected");
            return results;
        }

        info!(%ip, urls = urls.len(), "scanning web services");
        for url in urls {
            let result = self.probe_url(&url).await;
            results.insert(url, result);
        }
        results
    }

    pub async fn probe_url(&self, url: &str) -> WebResult {
        debug!(%url, "checking");
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(&self.config.user_agent) {
            Ok(v) => {
                headers.insert(USER_AGENT, v);
            }
            Err(e) => warn!(error = %e, "ignoring invalid user-agent"),
        }

        let response = match self.fetcher.get(url, &headers, self.config.timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!(%url, error = %e, "web probe failed");
                return WebResult::failed(e);
            }
        };

        let mut result = analyze_response(&response);
        for missing in &result.missing_security_headers {
            warn!(%url, "{missing}");
        }
        if let Some(server) = &result.server_disclosure {
            warn!(%url, %server, "server header reveals software");
        }
        for issue in &result.form_issues {
            warn!(%url, "{issue}");
        }
        for cms in &result.detected_cms {
            info!(%url, %cms, "detected framework");
        }
        for lib in &result.js_libraries {
            info!(%url, src = %lib, "detected JS library");
        }

        if let Some(scanner) = &self.dir_scanner {
            result.dir_scan = Some(scanner.scan(url).await);
        }

        info!(%url, status = response.status, "completed web checks");
        result
    }
}

/// URLs to probe for a host: open ports named http/https by the engine, plus
/// open well-known web ports the engine left unnamed or misnamed.
pub fn web_urls(ip: IpAddr, host: &HostResult) -> Vec<String> {
    let host_part = match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    };
    host.open_ports()
        .filter_map(|(port, info)| {
            let scheme = match info.service.as_str() {
                "https" => "https",
                "http" if info.tunnel.as_deref() == Some("ssl") => "https",
                "http" => "http",
                _ if WELL_KNOWN_WEB_PORTS.contains(&port) => {
                    if port == 443 || port == 8443 {
                        "https"
                    } else {
                        "http"
                    }
                }
                _ => return None,
            };
            Some(format!("{scheme}://{host_part}:{port}"))
        })
        .collect()
}

/// Run every heuristic check on a fetched response.
pub fn analyze_response(response: &HttpResponse) -> WebResult {
    let document = Html::parse_document(&response.body);
    WebResult {
        status_code: Some(response.status),
        headers: header_map_to_btree(&response.headers),
        title: page_title(&document),
        missing_security_headers: missing_security_headers(&response.headers),
        server_disclosure: server_disclosure(&response.headers),
        form_issues: form_issues(&document),
        detected_cms: detect_cms(&response.body),
        js_libraries: detect_js_libraries(&document),
        ..WebResult::default()
    }
}

/// Checklist messages for absent headers, in checklist order.
pub fn missing_security_headers(headers: &HeaderMap) -> Vec<String> {
    SECURITY_HEADERS
        .iter()
        .filter(|(names, _)| !names.iter().any(|n| headers.contains_key(*n)))
        .map(|(_, message)| message.to_string())
        .collect()
}

pub fn server_disclosure(headers: &HeaderMap) -> Option<String> {
    headers
        .get("server")
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

/// Per-form issues: missing CSRF token input, and any method other than POST.
pub fn form_issues(document: &Html) -> Vec<String> {
    let mut issues = Vec::new();
    let (Ok(form_sel), Ok(input_sel)) = (Selector::parse("form"), Selector::parse("input[name]"))
    else {
        return issues;
    };

    for form in document.select(&form_sel) {
        let has_token = form
            .select(&input_sel)
            .filter_map(|input| input.value().attr("name"))
            .any(|name| CSRF_FIELD_NAMES.contains(&name));
        if !has_token {
            issues.push(FORM_WITHOUT_CSRF.to_string());
        }

        let method = form.value().attr("method").unwrap_or("").to_lowercase();
        if method != "post" {
            issues.push(FORM_USES_GET.to_string());
        }
    }
    issues
}

/// CMS names whose signatures appear in the body, in table order.
pub fn detect_cms(body: &str) -> Vec<String> {
    let page = body.to_lowercase();
    CMS_SIGNATURES
        .iter()
        .filter(|(_, signatures)| signatures.iter().any(|s| page.contains(&s.to_lowercase())))
        .map(|(cms, _)| cms.to_string())
        .collect()
}

/// `script[src]` values that reference a known library.
pub fn detect_js_libraries(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("script[src]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("src"))
        .filter(|src| {
            let lower = src.to_lowercase();
            JS_LIBRARIES.iter().any(|lib| lower.contains(lib))
        })
        .map(str::to_string)
        .collect()
}

pub fn page_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn header_map_to_btree(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}
