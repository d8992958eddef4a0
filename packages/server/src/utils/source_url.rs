use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use reqwest::Url;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SourceUrlError {
    #[error("not a valid absolute URL: {0}")]
    Malformed(String),
    #[error("scheme '{0}' is not allowed")]
    Scheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("URLs with embedded credentials are not allowed")]
    Credentials,
    #[error("host '{0}' is not allowed")]
    DeniedHost(String),
}

/// Which source URLs ingest may fetch from.
///
/// Hosts are checked as written in the URL. Names are never resolved, so a
/// public name pointing at a private address passes.
#[derive(Debug, Clone)]
pub struct SourcePolicy {
    allowed_schemes: Vec<String>,
    denied_hosts: Vec<String>,
}

impl SourcePolicy {
    pub fn new(allowed_schemes: &[String], denied_hosts: &[String]) -> Self {
        Self {
            allowed_schemes: allowed_schemes.iter().map(|s| s.to_ascii_lowercase()).collect(),
            denied_hosts: denied_hosts
                .iter()
                .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Parse `raw` and check it against the policy.
    pub fn parse(&self, raw: &str) -> Result<Url, SourceUrlError> {
        let url = Url::parse(raw.trim()).map_err(|e| SourceUrlError::Malformed(e.to_string()))?;
        self.check(&url)?;
        Ok(url)
    }

    /// Check an already parsed URL, e.g. a redirect target.
    pub fn check(&self, url: &Url) -> Result<(), SourceUrlError> {
        if !self.allowed_schemes.iter().any(|s| s == url.scheme()) {
            return Err(SourceUrlError::Scheme(url.scheme().to_string()));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(SourceUrlError::Credentials);
        }
        let host = url.host_str().ok_or(SourceUrlError::MissingHost)?;
        if self.is_denied(host) {
            return Err(SourceUrlError::DeniedHost(host.to_string()));
        }
        Ok(())
    }

    fn is_denied(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();

        let literal = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&host);
        if let Ok(ip) = literal.parse::<IpAddr>() {
            return is_private_ip(ip);
        }

        if host == "localhost"
            || host.ends_with(".localhost")
            || host.ends_with(".local")
            || host.ends_with(".internal")
        {
            return true;
        }

        self.denied_hosts
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
