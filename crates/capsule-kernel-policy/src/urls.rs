//! URL parsing and the SSRF guard for publisher-controlled links.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::error::{PolicyError, Result};

/// Maximum accepted URL length.
pub const MAX_URL_LEN: usize = 2048;

/// Parse an absolute `http`/`https` URL with a host.
pub fn parse_http_url(raw: &str) -> Result<Url> {
    if raw.len() > MAX_URL_LEN {
        return Err(PolicyError::InvalidUrl("too long".into()));
    }
    let url = Url::parse(raw).map_err(|e| PolicyError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(PolicyError::InvalidUrl(format!("scheme {other}"))),
    }
    if url.host().is_none() {
        return Err(PolicyError::InvalidUrl("missing host".into()));
    }
    Ok(url)
}

/// Parse an `http`/`https` URL and reject hosts that are loopback, private,
/// link-local, unspecified or unique-local literals, or `localhost`.
///
/// Only literals are checked; DNS names are not resolved.
pub fn validate_public_url(raw: &str) -> Result<Url> {
    let url = parse_http_url(raw)?;
    let non_public = match url.host() {
        Some(Host::Ipv4(ip)) => !is_public_ip(ip.into()),
        Some(Host::Ipv6(ip)) => !is_public_ip(ip.into()),
        Some(Host::Domain(domain)) => {
            let d = domain.trim_end_matches('.').to_ascii_lowercase();
            d == "localhost" || d.ends_with(".localhost")
        }
        None => true,
    };
    if non_public {
        return Err(PolicyError::NonPublicAddress(raw.chars().take(128).collect()));
    }
    Ok(url)
}

/// Whether an address literal is routable on the public internet.
fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64))
}

/// The IPv4 address carried by a v4-mapped, v4-compatible or NAT64
/// (`64:ff9b::/96`) literal.
fn embedded_v4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }
    let [.., a, b, c, d] = ip.octets();
    match ip.segments() {
        [0, 0, 0, 0, 0, 0, _, _] if !ip.is_loopback() && !ip.is_unspecified() => {
            Some(Ipv4Addr::new(a, b, c, d))
        }
        [0x64, 0xff9b, 0, 0, 0, 0, _, _] => Some(Ipv4Addr::new(a, b, c, d)),
        _ => None,
    }
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = embedded_v4(ip) {
        return is_public_v4(v4);
    }
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_public_urls() {
        assert!(validate_public_url("https://example.com/a?b=c").is_ok());
        assert!(validate_public_url("http://93.184.216.34/").is_ok());
        assert!(validate_public_url("https://[2606:4700::1111]/").is_ok());
        assert!(validate_public_url("http://[64:ff9b::8.8.8.8]/").is_ok());
        assert!(validate_public_url("http://[::ffff:8.8.4.4]/").is_ok());
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        assert!(matches!(
            parse_http_url("ftp://example.com/"),
            Err(PolicyError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_http_url("javascript:alert(1)"),
            Err(PolicyError::InvalidUrl(_))
        ));
        assert!(parse_http_url("not a url").is_err());
    }

    #[test]
    fn test_rejects_private_literals() {
        for raw in [
            "http://127.0.0.1/",
            "http://10.1.2.3/",
            "http://192.168.0.1/",
            "http://172.16.5.4/",
            "http://169.254.169.254/latest/meta-data",
            "http://0.0.0.0/",
            "http://100.64.0.1/",
            "http://[::1]/",
            "http://[fe80::1]/",
            "http://[fd00::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://[::127.0.0.1]/",
            "http://[::10.0.0.1]/",
            "http://[64:ff9b::10.0.0.1]/",
            "http://[64:ff9b::a9fe:a9fe]/",
            "http://localhost:8080/",
            "http://api.localhost/",
        ] {
            assert!(
                matches!(validate_public_url(raw), Err(PolicyError::NonPublicAddress(_))),
                "{raw} should be rejected"
            );
        }
    }
}
