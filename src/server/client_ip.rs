//! Client identity extraction
//!
//! Precedence when proxy headers are trusted:
//! `CF-Connecting-IP`, first `X-Forwarded-For` hop, `X-Real-IP`, then the
//! socket peer address. Header values that do not parse as an IP address are
//! ignored.

use std::net::{IpAddr, SocketAddr};

use hyper::HeaderMap;

const PROXY_HEADERS: [&str; 3] = ["cf-connecting-ip", "x-forwarded-for", "x-real-ip"];

/// Resolve the identity used to key rate limits and abuse records
pub fn client_identity(headers: &HeaderMap, peer: SocketAddr, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) = PROXY_HEADERS
            .iter()
            .find_map(|name| header_ip(headers, name))
        {
            return ip.to_string();
        }
    }
    peer.ip().to_string()
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    let value = headers.get(name)?.to_str().ok()?;
    // X-Forwarded-For is "client, proxy1, proxy2"
    let first = value.split(',').next()?.trim();
    first.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn peer() -> SocketAddr {
        "10.0.0.1:40000".parse().unwrap()
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_falls_back_to_peer() {
        assert_eq!(client_identity(&HeaderMap::new(), peer(), true), "10.0.0.1");
    }

    #[test]
    fn test_precedence() {
        let h = headers(&[
            ("x-real-ip", "3.3.3.3"),
            ("x-forwarded-for", "2.2.2.2, 10.0.0.2"),
            ("cf-connecting-ip", "1.1.1.1"),
        ]);
        assert_eq!(client_identity(&h, peer(), true), "1.1.1.1");

        let h = headers(&[
            ("x-real-ip", "3.3.3.3"),
            ("x-forwarded-for", " 2.2.2.2 , 10.0.0.2"),
        ]);
        assert_eq!(client_identity(&h, peer(), true), "2.2.2.2");

        let h = headers(&[("x-real-ip", "2001:db8::1")]);
        assert_eq!(client_identity(&h, peer(), true), "2001:db8::1");
    }

    #[test]
    fn test_garbage_headers_ignored() {
        let h = headers(&[("x-forwarded-for", "not-an-ip"), ("x-real-ip", "3.3.3.3")]);
        assert_eq!(client_identity(&h, peer(), true), "3.3.3.3");
    }

    #[test]
    fn test_untrusted_proxy_uses_peer() {
        let h = headers(&[("x-forwarded-for", "2.2.2.2")]);
        assert_eq!(client_identity(&h, peer(), false), "10.0.0.1");
    }
}
