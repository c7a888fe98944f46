//! DNS-only validation, used while SMTP is suppressed by the circuit breaker.
//!
//! Confidence is a weighted sum of four DNS signals: MX present (0.4),
//! domain address record (0.2), SPF record (0.2) and a group of additional
//! MX checks (0.2, split evenly). Scores from this path never exceed
//! [`DNS_ONLY_SCORE_CAP`].

use std::sync::Arc;

use tracing::debug;

use crate::models::{
    EmailValidationResult, RiskyReason, UndeliverableReason, UnknownReason,
    ValidationMethod, Verdict,
};
use crate::validation::classify::{
    identify_smtp_provider, is_example_domain, is_likely_catch_all, uses_major_provider,
};
use crate::validation::dns::{DnsError, DnsLookup, MailHosts};
use crate::validation::scoring::{DNS_ONLY_SCORE_CAP, dns_only_score, risk_level};
use crate::validation::syntax::is_valid_host_name;

const MX_WEIGHT: f64 = 0.4;
const A_WEIGHT: f64 = 0.2;
const SPF_WEIGHT: f64 = 0.2;
const ADDITIONAL_WEIGHT: f64 = 0.2;
const ADDITIONAL_CHECKS: f64 = 4.0;

const DELIVERABLE_CONFIDENCE: f64 = 0.8;
const RISKY_CONFIDENCE: f64 = 0.5;

const EXAMPLE_DOMAIN_SCORE: u8 = 40;
const CATCH_ALL_SCORE_CAP: u8 = 50;

/// What DNS alone says about a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsAssessment {
    pub verdict: Verdict,
    pub reason: String,
    /// Base score before address penalties, already capped.
    pub score: u8,
    pub confidence: f64,
    pub smtp_provider: Option<String>,
    pub likely_catch_all: bool,
}

impl DnsAssessment {
    fn verdict_only(verdict: Verdict, reason: &str, score: u8) -> Self {
        Self {
            verdict,
            reason: reason.to_string(),
            score,
            confidence: 0.0,
            smtp_provider: None,
            likely_catch_all: false,
        }
    }

    /// Writes the assessment into `result`: verdict, mail server details,
    /// the catch-all attribute, score and risk. Attributes and blacklist
    /// info already on `result` feed the score.
    pub fn apply(&self, result: &mut EmailValidationResult, hosts: &MailHosts) {
        result.set_verdict(self.verdict, self.reason.clone());
        result.details.general.validation_method = ValidationMethod::DnsOnly;
        result.details.mail_server.smtp_provider = self.smtp_provider.clone();
        if hosts.implicit {
            result.details.mail_server.implicit_mx = hosts.primary().map(str::to_string);
        } else {
            result.details.mail_server.mx_record = hosts.primary().map(str::to_string);
        }
        result.details.attributes.catch_all |= self.likely_catch_all;

        let score = dns_only_score(
            self.score,
            &result.verdict,
            &result.details.attributes,
            &result.details.blacklist,
        );
        result.deliverability_score = score;
        result.risk_level = risk_level(score, &result.verdict);
    }
}

pub struct DnsOnlyValidator {
    dns: Arc<dyn DnsLookup>,
}

impl DnsOnlyValidator {
    pub fn new(dns: Arc<dyn DnsLookup>) -> Self {
        Self { dns }
    }

    async fn has_address(&self, host: &str) -> bool {
        matches!(self.address_lookup(host).await, Ok(true))
    }

    /// `Ok(false)` only when the host really has no address record.
    async fn address_lookup(&self, host: &str) -> Result<bool, DnsError> {
        match self.dns.ip_addrs(host).await {
            Ok(addrs) => Ok(!addrs.is_empty()),
            Err(DnsError::NoRecords) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn has_spf(&self, domain: &str) -> bool {
        match self.dns.txt_records(domain).await {
            Ok(records) => records
                .iter()
                .any(|txt| txt.trim_start().to_lowercase().starts_with("v=spf1")),
            Err(_) => false,
        }
    }

    /// Scores `domain` from its already-resolved mail hosts plus the A, SPF
    /// and MX-host lookups done here.
    pub async fn assess(&self, domain: &str, hosts: &MailHosts) -> DnsAssessment {
        if is_example_domain(domain) {
            return DnsAssessment::verdict_only(
                Verdict::Risky(RiskyReason::LowDeliverability),
                "Example or test domain",
                EXAMPLE_DOMAIN_SCORE,
            );
        }

        let has_mx = hosts.has_mx();
        let primary = hosts.primary().filter(|_| has_mx);

        let (domain_address, has_spf, primary_has_a) = tokio::join!(
            self.address_lookup(domain),
            self.has_spf(domain),
            async {
                match primary {
                    Some(host) => self.has_address(host).await,
                    None => false,
                }
            }
        );

        // Without MX the address lookup decides the verdict, so a failed
        // lookup must not read as a missing record.
        let has_a = match domain_address {
            Ok(has_a) => has_a,
            Err(DnsError::Timeout) if !has_mx => {
                return DnsAssessment::verdict_only(
                    Verdict::Unknown(UnknownReason::Timeout),
                    "DNS lookup timed out",
                    0,
                );
            }
            Err(err) if !has_mx => {
                return DnsAssessment::verdict_only(
                    Verdict::Unknown(UnknownReason::UnexpectedError),
                    &format!("DNS lookup failed: {err}"),
                    0,
                );
            }
            Err(_) => false,
        };

        if !has_mx && !has_a {
            return DnsAssessment::verdict_only(
                Verdict::Undeliverable(UndeliverableReason::InvalidDomain),
                "No MX or A records found",
                0,
            );
        }

        let additional = if has_mx {
            [
                hosts.hosts.iter().all(|host| is_valid_host_name(host)),
                primary_has_a,
                hosts.hosts.len() > 1,
                primary.is_some_and(uses_major_provider),
            ]
            .into_iter()
            .filter(|passed| *passed)
            .count()
        } else {
            0
        };

        let mut confidence = 0.0;
        if has_mx {
            confidence += MX_WEIGHT;
        }
        if has_a {
            confidence += A_WEIGHT;
        }
        if has_spf {
            confidence += SPF_WEIGHT;
        }
        confidence += ADDITIONAL_WEIGHT * additional as f64 / ADDITIONAL_CHECKS;
        let confidence = (confidence * 100.0).round() / 100.0;

        let (mut verdict, mut reason) = if confidence >= DELIVERABLE_CONFIDENCE {
            (Verdict::Deliverable, "High confidence in domain validity")
        } else if confidence >= RISKY_CONFIDENCE {
            (
                Verdict::Risky(RiskyReason::LowDeliverability),
                "Moderate confidence in domain validity",
            )
        } else {
            (
                Verdict::Undeliverable(UndeliverableReason::InvalidDomain),
                "Low confidence in domain validity",
            )
        };

        let mut score = ((confidence * 100.0).round() as u8).min(DNS_ONLY_SCORE_CAP);

        let smtp_provider = primary.and_then(identify_smtp_provider);
        let likely_catch_all = primary.is_some_and(|host| is_likely_catch_all(host, smtp_provider));
        if likely_catch_all {
            score = score.min(CATCH_ALL_SCORE_CAP);
            verdict = Verdict::Risky(RiskyReason::LowDeliverability);
            reason = "Catch-all domain detected via DNS";
        }

        debug!(domain, confidence, score, %verdict, "dns-only assessment");

        DnsAssessment {
            verdict,
            reason: reason.to_string(),
            score,
            confidence,
            smtp_provider: smtp_provider.map(str::to_string),
            likely_catch_all,
        }
    }
}
