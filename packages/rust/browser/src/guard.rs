//! SSRF protection for page navigation.

use std::net::IpAddr;

use url::Url;

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    } else {
        return true;
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_non_http_schemes() {
        assert!(is_ssrf_target(&Url::parse("file:///etc/passwd").unwrap()));
        assert!(is_ssrf_target(&Url::parse("ftp://files.example.com/a").unwrap()));
    }

    #[test]
    fn blocks_private_and_loopback_addresses() {
        for raw in [
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://100.64.0.5/",
            "http://[::1]/",
            "http://localhost:3000/api",
            "http://printer.local/",
        ] {
            assert!(is_ssrf_target(&Url::parse(raw).unwrap()), "{raw} should be blocked");
        }
    }

    #[test]
    fn allows_public_hosts() {
        assert!(!is_ssrf_target(&Url::parse("https://www.doximity.com/pub/jane-doe").unwrap()));
        assert!(!is_ssrf_target(&Url::parse("http://93.184.216.34/").unwrap()));
    }
}
