//! Address-range helpers.

use std::net::IpAddr;

/// Whether an address falls in a private range.
///
/// IPv4 covers RFC1918 plus link-local 169.254/16. IPv6 covers unique-local
/// fc00::/7 and link-local fe80::/10; an IPv4-mapped address
/// (`::ffff:a.b.c.d`) is classified by its embedded IPv4. Other addresses in
/// the `::/96` compatibility space are not treated as private.
pub fn is_private_ip(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return mapped.is_private() || mapped.is_link_local();
            }
            let seg = v6.segments();
            // fc00::/7 unique local
            if seg[0] & 0xfe00 == 0xfc00 {
                return true;
            }
            // fe80::/10 link local
            seg[0] & 0xffc0 == 0xfe80
        }
    }
}

/// Parse-and-classify convenience for textual addresses.
pub fn is_private_ip_str(s: &str) -> bool {
    s.parse::<IpAddr>().map(|a| is_private_ip(&a)).unwrap_or(false)
}
