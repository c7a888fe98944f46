use std::net::IpAddr;

use futures::future::join_all;
use tracing::debug;

use super::dns::DnsLookup;
use crate::models::BlacklistInfo;

/// Zones queried with the domain name itself.
pub const DOMAIN_BLACKLISTS: [&str; 2] = ["zen.spamhaus.org", "bl.spamcop.net"];

/// Zones queried with the reversed octets of each mail-host IPv4 address.
pub const IP_BLACKLISTS: [&str; 2] = ["sbl.spamhaus.org", "xbl.spamhaus.org"];

/// Reputation at or above this is not considered severe.
pub const SEVERE_REPUTATION: u8 = 50;

const REPUTATION_PENALTIES: [(&str, u8); 2] = [("spamhaus", 40), ("spamcop", 30)];

/// Reputation left after the given listings; starts at 100.
pub fn reputation_score(listings: &[String]) -> u8 {
    let penalty: u32 = listings
        .iter()
        .filter_map(|listing| {
            let lower = listing.to_lowercase();
            REPUTATION_PENALTIES
                .iter()
                .find(|(zone, _)| lower.contains(zone))
                .map(|(_, penalty)| u32::from(*penalty))
        })
        .sum();
    100u32.saturating_sub(penalty) as u8
}

pub fn is_severe(info: &BlacklistInfo) -> bool {
    info.is_blacklisted && info.reputation_score < SEVERE_REPUTATION
}

fn reversed_ipv4(ip: &IpAddr) -> Option<String> {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            Some(format!("{d}.{c}.{b}.{a}"))
        }
        IpAddr::V6(_) => None,
    }
}

/// Checks `domain` and its mail-host addresses against the DNSBL zones, all
/// queries concurrently. A zone that cannot be reached counts as not listing.
pub async fn check_blacklists(dns: &dyn DnsLookup, domain: &str, host_ips: &[IpAddr]) -> BlacklistInfo {
    let mut queries: Vec<(String, String)> = DOMAIN_BLACKLISTS
        .iter()
        .map(|zone| (format!("{domain}.{zone}"), zone.to_string()))
        .collect();

    for ip in host_ips {
        if let Some(reversed) = reversed_ipv4(ip) {
            for zone in IP_BLACKLISTS {
                queries.push((format!("{reversed}.{zone}"), format!("{zone} (IP: {ip})")));
            }
        }
    }

    let checks = queries.into_iter().map(|(query, label)| async move {
        match dns.is_listed(&query).await {
            Ok(listed) => listed.then_some(label),
            Err(err) => {
                debug!(query, error = %err, "blacklist query failed");
                None
            }
        }
    });

    let blacklists_found: Vec<String> = join_all(checks).await.into_iter().flatten().collect();

    BlacklistInfo {
        is_blacklisted: !blacklists_found.is_empty(),
        reputation_score: reputation_score(&blacklists_found),
        blacklists_found,
    }
}
