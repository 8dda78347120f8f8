//! Agent identifier validation and allowed-IP matching.
//!
//! `AgentID` is validated against `[A-Za-z0-9_-]+` per the data model; an
//! id failing that check is rejected "without touching disk" (§8 Boundary),
//! so validation happens before any filesystem lookup keyed by the id.

use std::net::IpAddr;

use ipnet::IpNet;

/// Returns true iff `id` is non-empty and consists only of ASCII
/// letters, digits, `_`, and `-`.
pub fn is_valid_agent_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Returns true iff `addr` is contained in at least one of `allowed`.
/// Both IPv4 and IPv6 ranges are supported via `ipnet`.
pub fn ip_allowed(addr: IpAddr, allowed: &[IpNet]) -> bool {
    allowed.iter().any(|net| net.contains(&addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric_underscore_dash() {
        assert!(is_valid_agent_id("a1"));
        assert!(is_valid_agent_id("web-01_east"));
    }

    #[test]
    fn rejects_empty_and_special_chars() {
        assert!(!is_valid_agent_id(""));
        assert!(!is_valid_agent_id("a.b"));
        assert!(!is_valid_agent_id("a/b"));
        assert!(!is_valid_agent_id("a b"));
    }

    #[test]
    fn ip_allowed_matches_v4_and_v6_ranges() {
        let nets: Vec<IpNet> = vec!["10.0.0.0/8".parse().unwrap(), "::1/128".parse().unwrap()];
        assert!(ip_allowed("10.1.2.3".parse().unwrap(), &nets));
        assert!(!ip_allowed("127.0.0.1".parse().unwrap(), &nets));
        assert!(ip_allowed("::1".parse().unwrap(), &nets));
    }
}
