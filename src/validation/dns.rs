use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("dns lookup timed out")]
    Timeout,
    #[error("no records found")]
    NoRecords,
    #[error("dns lookup failed: {0}")]
    Other(String),
}

impl From<ResolveError> for DnsError {
    fn from(err: ResolveError) -> Self {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => Self::NoRecords,
            ResolveErrorKind::Timeout => Self::Timeout,
            _ => Self::Other(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    /// Exchange host without the trailing root dot.
    pub host: String,
    pub preference: u16,
}

/// Where mail for a domain would be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailHosts {
    /// MX hosts by preference, or the domain itself when `implicit`.
    pub hosts: Vec<String>,
    /// No MX records; mail would go to the domain's A/AAAA record.
    pub implicit: bool,
}

impl MailHosts {
    pub fn none() -> Self {
        Self {
            hosts: Vec::new(),
            implicit: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn primary(&self) -> Option<&str> {
        self.hosts.first().map(String::as_str)
    }

    /// Whether real MX records exist (as opposed to an A-record fallback).
    pub fn has_mx(&self) -> bool {
        !self.implicit && !self.hosts.is_empty()
    }
}

/// DNS queries the pipeline needs. `NoRecords` is reported as an error so
/// callers can tell "empty" apart from "could not ask".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// MX records ordered by preference, most preferred first.
    async fn mx_records(&self, domain: &str) -> Result<Vec<MxRecord>, DnsError>;

    /// A and AAAA addresses of `host`.
    async fn ip_addrs(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;

    async fn txt_records(&self, domain: &str) -> Result<Vec<String>, DnsError>;

    /// Whether a DNSBL query name (`<reversed>.<zone>`) resolves, i.e. is listed.
    async fn is_listed(&self, query: &str) -> Result<bool, DnsError>;
}

/// Resolves the mail hosts of `domain`: its MX records, or the domain itself
/// when only an address record exists (RFC 5321 implicit MX). A domain with
/// neither yields an empty [`MailHosts`]; only lookup failures are errors.
pub async fn resolve_mail_hosts(dns: &dyn DnsLookup, domain: &str) -> Result<MailHosts, DnsError> {
    match dns.mx_records(domain).await {
        Ok(records) => {
            return Ok(MailHosts {
                hosts: records.into_iter().map(|mx| mx.host).collect(),
                implicit: false,
            });
        }
        Err(DnsError::NoRecords) => {}
        Err(err) => return Err(err),
    }

    match dns.ip_addrs(domain).await {
        Ok(_) => Ok(MailHosts {
            hosts: vec![domain.to_string()],
            implicit: true,
        }),
        Err(DnsError::NoRecords) => Ok(MailHosts::none()),
        Err(err) => Err(err),
    }
}

/// [`DnsLookup`] backed by the system-independent trust-dns stub resolver.
pub struct TrustDnsLookup {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl TrustDnsLookup {
    /// Each query (including its retries) is abandoned after `lookup_timeout`.
    pub fn new(lookup_timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = lookup_timeout;
        opts.attempts = 2;

        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
            timeout: lookup_timeout,
        }
    }

    async fn bounded<T, F>(&self, lookup: F) -> Result<T, DnsError>
    where
        F: Future<Output = Result<T, ResolveError>>,
    {
        match timeout(self.timeout, lookup).await {
            Ok(result) => result.map_err(DnsError::from),
            Err(_) => Err(DnsError::Timeout),
        }
    }
}

#[async_trait]
impl DnsLookup for TrustDnsLookup {
    async fn mx_records(&self, domain: &str) -> Result<Vec<MxRecord>, DnsError> {
        let lookup = self.bounded(self.resolver.mx_lookup(domain)).await?;
        let mut records: Vec<MxRecord> = lookup
            .iter()
            .map(|mx| MxRecord {
                host: mx.exchange().to_utf8().trim_end_matches('.').to_lowercase(),
                preference: mx.preference(),
            })
            .filter(|mx| !mx.host.is_empty())
            .collect();
        if records.is_empty() {
            return Err(DnsError::NoRecords);
        }
        records.sort_by_key(|mx| mx.preference);
        Ok(records)
    }

    async fn ip_addrs(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        let lookup = self.bounded(self.resolver.lookup_ip(host)).await?;
        let addrs: Vec<IpAddr> = lookup.iter().collect();
        if addrs.is_empty() {
            return Err(DnsError::NoRecords);
        }
        Ok(addrs)
    }

    async fn txt_records(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        let lookup = self.bounded(self.resolver.txt_lookup(domain)).await?;
        Ok(lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>()
            })
            .collect())
    }

    async fn is_listed(&self, query: &str) -> Result<bool, DnsError> {
        match self.bounded(self.resolver.ipv4_lookup(query)).await {
            Ok(lookup) => Ok(lookup.iter().next().is_some()),
            Err(DnsError::NoRecords) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
