//! Per-address validation: syntax, mail hosts, attributes, blacklist, SMTP
//! (or DNS-only while the breaker is open), catch-all and scoring. Each step
//! may end the pipeline with a terminal verdict.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::cache::{CacheKind, DomainCache};
use crate::circuit_breaker::CircuitBreaker;
use crate::models::{
    BlacklistInfo, EmailValidationResult, RiskyReason, UndeliverableReason, UnknownReason,
    ValidationFlags, ValidationMethod, Verdict,
};
use crate::validation::blacklist::{check_blacklists, is_severe};
use crate::validation::classify::{address_attributes, identify_smtp_provider, is_disposable_domain};
use crate::validation::dns::{DnsError, DnsLookup, MailHosts, resolve_mail_hosts};
use crate::validation::dns_only::DnsOnlyValidator;
use crate::validation::scoring::{risk_level, smtp_score};
use crate::validation::smtp::{MailboxProber, ProbeOutcome, ProbeReport};
use crate::validation::syntax::parse_address;

/// Reply texts that mean "your probe is blocked", not "no such mailbox".
const BLOCKLIST_MARKERS: [&str; 2] = ["spamhaus", "blocked"];

/// Maps an SMTP probe outcome to a verdict and a human-readable reason.
pub fn probe_verdict(outcome: &ProbeOutcome) -> (Verdict, String) {
    match outcome {
        ProbeOutcome::Accepted {
            mailbox_full: false,
            ..
        } => (Verdict::Deliverable, "Mailbox accepted by mail server".into()),
        ProbeOutcome::Accepted {
            mailbox_full: true,
            code,
        } => (
            Verdict::Risky(RiskyReason::LowDeliverability),
            format!("Mailbox full ({code})"),
        ),
        ProbeOutcome::Rejected { code, message } => {
            let lower = message.to_lowercase();
            let blocked = BLOCKLIST_MARKERS.iter().any(|marker| lower.contains(marker));
            let reason = if matches!(code, 550 | 551 | 553) && !blocked {
                UndeliverableReason::RejectedEmail
            } else {
                UndeliverableReason::InvalidSmtp
            };
            (Verdict::Undeliverable(reason), format!("{code} {message}"))
        }
        ProbeOutcome::Refused { code, message } => (
            Verdict::Undeliverable(UndeliverableReason::InvalidSmtp),
            format!("{code} {message}"),
        ),
        ProbeOutcome::Deferred { code, message } => (
            Verdict::Unknown(UnknownReason::UnavailableSmtp),
            format!("{code} {message}"),
        ),
        ProbeOutcome::Timeout => (
            Verdict::Unknown(UnknownReason::Timeout),
            "SMTP server timed out".into(),
        ),
        ProbeOutcome::NoConnect => (
            Verdict::Unknown(UnknownReason::NoConnect),
            "Could not connect to any mail server".into(),
        ),
    }
}

/// The full validation pipeline. Cheap to share; every field is a handle.
pub struct EmailValidator {
    dns: Arc<dyn DnsLookup>,
    prober: Arc<dyn MailboxProber>,
    breaker: CircuitBreaker,
    cache: Arc<DomainCache>,
    dns_only: DnsOnlyValidator,
}

impl EmailValidator {
    pub fn new(
        dns: Arc<dyn DnsLookup>,
        prober: Arc<dyn MailboxProber>,
        breaker: CircuitBreaker,
        cache: Arc<DomainCache>,
    ) -> Self {
        Self {
            dns_only: DnsOnlyValidator::new(dns.clone()),
            dns,
            prober,
            breaker,
            cache,
        }
    }

    /// Validates `emails` concurrently, results in input order.
    pub async fn validate_many(
        &self,
        emails: &[String],
        flags: &ValidationFlags,
    ) -> Vec<EmailValidationResult> {
        join_all(emails.iter().map(|email| self.validate(email, flags))).await
    }

    pub async fn validate(&self, email: &str, flags: &ValidationFlags) -> EmailValidationResult {
        let Some(parsed) = parse_address(email) else {
            debug!(email, "rejected by syntax check");
            return EmailValidationResult::new(
                email,
                "",
                Verdict::Undeliverable(UndeliverableReason::InvalidEmail),
                "Invalid email syntax",
                ValidationMethod::Syntax,
            );
        };
        let domain = parsed.domain.as_str();

        let mut result = EmailValidationResult::new(
            email,
            domain,
            Verdict::Unknown(UnknownReason::UnexpectedError),
            "",
            ValidationMethod::Dns,
        );
        result.details.attributes = address_attributes(parsed.local, domain);

        let hosts = match self.mail_hosts(domain).await {
            Ok(hosts) if !hosts.is_empty() => hosts,
            Ok(_) if flags.check_mx => {
                result.set_verdict(
                    Verdict::Undeliverable(UndeliverableReason::InvalidDomain),
                    "Domain has no MX or A records",
                );
                return result;
            }
            // A failed lookup proves nothing about the domain, whichever
            // checks were requested.
            Err(DnsError::Timeout) => {
                result.set_verdict(Verdict::Unknown(UnknownReason::Timeout), "DNS lookup timed out");
                return Self::scored(result);
            }
            Err(err) => {
                result.set_verdict(
                    Verdict::Unknown(UnknownReason::UnexpectedError),
                    format!("DNS lookup failed: {err}"),
                );
                return Self::scored(result);
            }
            Ok(_) => MailHosts::none(),
        };

        if flags.check_disposable {
            result.details.attributes.disposable = self.disposable(domain).await;
        }
        if flags.check_blacklist {
            result.details.blacklist = self.blacklist(domain, &hosts).await;
        }

        let smtp_allowed = flags.check_smtp && !hosts.is_empty();
        if !smtp_allowed {
            return self.dns_only_result(result, domain, &hosts).await;
        }

        if self.breaker_open().await {
            if let Err(err) = self.breaker.record_dns_fallback().await {
                warn!(error = %err, "failed to count dns fallback");
            }
            debug!(email, "smtp circuit open, using dns-only validation");
            return self.dns_only_result(result, domain, &hosts).await;
        }

        self.smtp_result(result, email, domain, &hosts, flags).await
    }

    async fn mail_hosts(&self, domain: &str) -> Result<MailHosts, DnsError> {
        if let Some(hosts) = self.cache.mail_hosts(domain).await {
            return Ok(hosts);
        }
        let hosts = resolve_mail_hosts(self.dns.as_ref(), domain).await?;
        if !hosts.is_empty() {
            self.cache.put(CacheKind::Mx, domain, &hosts).await;
        }
        Ok(hosts)
    }

    async fn disposable(&self, domain: &str) -> bool {
        if let Some(disposable) = self.cache.disposable(domain).await {
            return disposable;
        }
        let disposable = is_disposable_domain(domain);
        self.cache.put(CacheKind::Disposable, domain, &disposable).await;
        disposable
    }

    async fn blacklist(&self, domain: &str, hosts: &MailHosts) -> BlacklistInfo {
        if let Some(info) = self.cache.blacklist(domain).await {
            return info;
        }
        let host_ips = match hosts.primary() {
            Some(host) => self.dns.ip_addrs(host).await.unwrap_or_default(),
            None => Vec::new(),
        };
        let info = check_blacklists(self.dns.as_ref(), domain, &host_ips).await;
        self.cache.put(CacheKind::Blacklist, domain, &info).await;
        info
    }

    async fn breaker_open(&self) -> bool {
        match self.breaker.is_open().await {
            Ok(open) => open,
            Err(err) => {
                warn!(error = %err, "circuit breaker unreadable, treating as closed");
                false
            }
        }
    }

    async fn dns_only_result(
        &self,
        mut result: EmailValidationResult,
        domain: &str,
        hosts: &MailHosts,
    ) -> EmailValidationResult {
        let assessment = self.dns_only.assess(domain, hosts).await;
        assessment.apply(&mut result, hosts);
        if Self::demote_if_blacklisted(&mut result) {
            result.risk_level = risk_level(result.deliverability_score, &result.verdict);
        }
        result
    }

    async fn smtp_result(
        &self,
        mut result: EmailValidationResult,
        email: &str,
        domain: &str,
        hosts: &MailHosts,
        flags: &ValidationFlags,
    ) -> EmailValidationResult {
        let cached_catch_all = if flags.check_catch_all {
            self.cache.catch_all(domain).await
        } else {
            None
        };
        let catch_all_address = (flags.check_catch_all && cached_catch_all.is_none())
            .then(|| format!("nonexistent{}@{domain}", Utc::now().timestamp_micros()));

        let report = self.prober.probe(&hosts.hosts, email, catch_all_address).await;
        self.record_probe(&report).await;
        debug!(email, outcome = ?report.outcome, "smtp probe finished");

        let (verdict, reason) = probe_verdict(&report.outcome);
        result.set_verdict(verdict, reason);
        result.details.general.validation_method = ValidationMethod::Smtp;
        if let ProbeOutcome::Accepted { mailbox_full, .. } = report.outcome {
            result.details.attributes.mailbox_full = mailbox_full;
        }

        let primary = hosts.primary().unwrap_or_default();
        result.details.mail_server.smtp_provider = identify_smtp_provider(primary).map(str::to_string);
        let used_host = report.host.clone().unwrap_or_else(|| primary.to_string());
        if hosts.implicit {
            result.details.mail_server.implicit_mx = Some(used_host);
        } else {
            result.details.mail_server.mx_record = Some(used_host);
        }

        if let Some(catch_all) = report.catch_all {
            self.cache.put(CacheKind::CatchAll, domain, &catch_all).await;
        }
        let catch_all = cached_catch_all.or(report.catch_all).unwrap_or(false);
        if catch_all && flags.check_catch_all {
            result.details.attributes.catch_all = true;
            if result.verdict == Verdict::Deliverable {
                result.set_verdict(
                    Verdict::Risky(RiskyReason::LowDeliverability),
                    "Catch-all domain accepts any address",
                );
            }
        }

        Self::demote_if_blacklisted(&mut result);
        Self::scored(result)
    }

    /// Feeds the breaker: a finished dialogue is a success whatever the
    /// answer, while a timeout or failed connection counts against SMTP.
    async fn record_probe(&self, report: &ProbeReport) {
        let recorded = if report.outcome.is_completed_handshake() {
            self.breaker.record_smtp_success().await
        } else {
            self.breaker.record_smtp_timeout().await.map(|_| ())
        };
        if let Err(err) = recorded {
            warn!(error = %err, "failed to update smtp circuit breaker");
        }
    }

    fn demote_if_blacklisted(result: &mut EmailValidationResult) -> bool {
        if result.verdict == Verdict::Deliverable && is_severe(&result.details.blacklist) {
            let listings = result.details.blacklist.blacklists_found.join(", ");
            result.set_verdict(
                Verdict::Risky(RiskyReason::LowQuality),
                format!("Domain listed on {listings}"),
            );
            return true;
        }
        false
    }

    fn scored(mut result: EmailValidationResult) -> EmailValidationResult {
        let score = smtp_score(
            &result.verdict,
            &result.details.attributes,
            &result.details.blacklist,
        );
        result.deliverability_score = score;
        result.risk_level = risk_level(score, &result.verdict);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::config::{CacheSettings, CircuitBreakerSettings};
    use crate::models::RiskLevel;
    use crate::store::MemoryStore;
    use crate::validation::dns::{MockDnsLookup, MxRecord};
    use crate::validation::smtp::MockMailboxProber;

    fn ip() -> IpAddr {
        "192.0.2.25".parse().unwrap()
    }

    /// Resolves `gmail.com`, `corp.io` and `spammy.io`; everything else is NXDOMAIN.
    fn dns() -> MockDnsLookup {
        let mut dns = MockDnsLookup::new();
        dns.expect_mx_records().returning(|domain| match domain {
            "gmail.com" => Ok(vec![MxRecord {
                host: "gmail-smtp-in.l.google.com".into(),
                preference: 5,
            }]),
            "corp.io" | "spammy.io" | "mailinator.com" => Ok(vec![
                MxRecord {
                    host: format!("mx1.{domain}"),
                    preference: 10,
                },
                MxRecord {
                    host: format!("mx2.{domain}"),
                    preference: 20,
                },
            ]),
            _ => Err(DnsError::NoRecords),
        });
        dns.expect_ip_addrs().returning(|host| {
            if host.contains("nonexistent") {
                Err(DnsError::NoRecords)
            } else {
                Ok(vec![ip()])
            }
        });
        dns.expect_txt_records()
            .returning(|_| Ok(vec!["v=spf1 -all".into()]));
        dns.expect_is_listed()
            .returning(|query| Ok(query.starts_with("spammy.io.")));
        dns
    }

    fn accepted(catch_all: Option<bool>) -> ProbeReport {
        ProbeReport {
            outcome: ProbeOutcome::Accepted {
                code: 250,
                mailbox_full: false,
            },
            catch_all,
            host: Some("mx1.corp.io".into()),
        }
    }

    struct Harness {
        validator: EmailValidator,
        breaker: CircuitBreaker,
        cache: Arc<DomainCache>,
    }

    fn harness(dns: MockDnsLookup, prober: MockMailboxProber, threshold: u64) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let breaker = CircuitBreaker::new(
            store.clone(),
            CircuitBreakerSettings {
                threshold,
                recovery_window_secs: 3600,
                dns_only_mode: false,
            },
        );
        let cache = Arc::new(DomainCache::new(store, CacheSettings::default()));
        let validator = EmailValidator::new(
            Arc::new(dns),
            Arc::new(prober),
            breaker.clone(),
            cache.clone(),
        );
        Harness {
            validator,
            breaker,
            cache,
        }
    }

    #[test]
    fn test_probe_verdict_mapping() {
        let rejected = |code: u16, message: &str| ProbeOutcome::Rejected {
            code,
            message: message.into(),
        };
        assert_eq!(
            probe_verdict(&rejected(550, "5.1.1 user unknown")).0,
            Verdict::Undeliverable(UndeliverableReason::RejectedEmail)
        );
        assert_eq!(
            probe_verdict(&rejected(553, "mailbox name not allowed")).0,
            Verdict::Undeliverable(UndeliverableReason::RejectedEmail)
        );
        assert_eq!(
            probe_verdict(&rejected(550, "Client host blocked using Spamhaus")).0,
            Verdict::Undeliverable(UndeliverableReason::InvalidSmtp)
        );
        assert_eq!(
            probe_verdict(&rejected(554, "transaction failed")).0,
            Verdict::Undeliverable(UndeliverableReason::InvalidSmtp)
        );
        assert_eq!(
            probe_verdict(&ProbeOutcome::Deferred {
                code: 451,
                message: "greylisted".into()
            })
            .0,
            Verdict::Unknown(UnknownReason::UnavailableSmtp)
        );
        assert_eq!(
            probe_verdict(&ProbeOutcome::Accepted {
                code: 552,
                mailbox_full: true
            })
            .0,
            Verdict::Risky(RiskyReason::LowDeliverability)
        );
        assert_eq!(
            probe_verdict(&ProbeOutcome::NoConnect).0,
            Verdict::Unknown(UnknownReason::NoConnect)
        );
    }

    #[tokio::test]
    async fn test_mixed_submission_scenario() {
        let mut prober = MockMailboxProber::new();
        prober
            .expect_probe()
            .withf(|hosts, email, probe| {
                hosts[0] == "gmail-smtp-in.l.google.com"
                    && email == "a@gmail.com"
                    && probe.as_deref().is_some_and(|p| p.ends_with("@gmail.com"))
            })
            .times(1)
            .returning(|_, _, _| accepted(Some(false)));
        let h = harness(dns(), prober, 10);

        let emails: Vec<String> = ["a@gmail.com", "bad-syntax", "x@nonexistent-domain-xyz.test"]
            .iter()
            .map(|e| e.to_string())
            .collect();
        let results = h
            .validator
            .validate_many(&emails, &ValidationFlags::default())
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].email, "a@gmail.com");
        assert_eq!(results[0].verdict, Verdict::Deliverable);
        assert_eq!(results[0].details.general.validation_method, ValidationMethod::Smtp);
        assert_eq!(results[0].details.mail_server.smtp_provider.as_deref(), Some("google"));
        assert!(results[0].details.attributes.free_email);
        assert_eq!(results[0].deliverability_score, 90);
        assert_eq!(results[0].risk_level, RiskLevel::None);

        assert_eq!(
            results[1].verdict,
            Verdict::Undeliverable(UndeliverableReason::InvalidEmail)
        );
        assert_eq!(
            results[2].verdict,
            Verdict::Undeliverable(UndeliverableReason::InvalidDomain)
        );
        assert_eq!(results[2].deliverability_score, 0);
        assert_eq!(h.breaker.state().await.unwrap().consecutive_smtp_timeouts, 0);
    }

    #[tokio::test]
    async fn test_catch_all_domain_is_demoted_and_cached() {
        let mut prober = MockMailboxProber::new();
        prober
            .expect_probe()
            .withf(|_, _, probe| probe.is_some())
            .times(1)
            .returning(|_, _, _| accepted(Some(true)));
        prober
            .expect_probe()
            .withf(|_, _, probe| probe.is_none())
            .times(1)
            .returning(|_, _, _| accepted(None));
        let h = harness(dns(), prober, 10);

        let first = h.validator.validate("jane@corp.io", &ValidationFlags::default()).await;
        assert_eq!(first.verdict, Verdict::Risky(RiskyReason::LowDeliverability));
        assert!(first.details.attributes.catch_all);
        assert!(first.is_valid);
        assert_eq!(h.cache.catch_all("corp.io").await, Some(true));

        // The cached answer stands in for the second RCPT.
        let second = h.validator.validate("john@corp.io", &ValidationFlags::default()).await;
        assert_eq!(second.verdict, Verdict::Risky(RiskyReason::LowDeliverability));
        assert!(second.details.attributes.catch_all);
    }

    #[tokio::test]
    async fn test_timeouts_open_breaker_then_dns_only() {
        let mut prober = MockMailboxProber::new();
        prober.expect_probe().times(2).returning(|_, _, _| ProbeReport {
            outcome: ProbeOutcome::Timeout,
            catch_all: None,
            host: None,
        });
        let h = harness(dns(), prober, 2);
        let flags = ValidationFlags::default();

        for _ in 0..2 {
            let result = h.validator.validate("jane@corp.io", &flags).await;
            assert_eq!(result.verdict, Verdict::Unknown(UnknownReason::Timeout));
            assert_eq!(result.details.general.validation_method, ValidationMethod::Smtp);
        }
        assert!(h.breaker.is_open().await.unwrap());

        let result = h.validator.validate("jane@corp.io", &flags).await;
        assert_eq!(result.details.general.validation_method, ValidationMethod::DnsOnly);
        assert!(result.deliverability_score <= 80);
        assert_eq!(h.breaker.state().await.unwrap().total_dns_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_smtp_disabled_uses_dns_only_without_counting_fallback() {
        let mut prober = MockMailboxProber::new();
        prober.expect_probe().never();
        let h = harness(dns(), prober, 10);
        let flags = ValidationFlags {
            check_smtp: false,
            ..ValidationFlags::default()
        };

        let result = h.validator.validate("jane@corp.io", &flags).await;
        assert_eq!(result.verdict, Verdict::Deliverable);
        assert_eq!(result.details.general.validation_method, ValidationMethod::DnsOnly);
        assert_eq!(result.details.mail_server.mx_record.as_deref(), Some("mx1.corp.io"));
        assert_eq!(result.deliverability_score, 80);
        assert_eq!(h.breaker.state().await.unwrap().total_dns_fallbacks, 0);
    }

    #[tokio::test]
    async fn test_smtp_rejection_is_terminal() {
        let mut prober = MockMailboxProber::new();
        prober.expect_probe().returning(|_, _, _| ProbeReport {
            outcome: ProbeOutcome::Rejected {
                code: 550,
                message: "5.1.1 no such user".into(),
            },
            catch_all: None,
            host: Some("mx1.corp.io".into()),
        });
        let h = harness(dns(), prober, 10);

        let result = h.validator.validate("ghost@corp.io", &ValidationFlags::default()).await;
        assert_eq!(
            result.verdict,
            Verdict::Undeliverable(UndeliverableReason::RejectedEmail)
        );
        assert!(!result.is_valid);
        assert_eq!(result.deliverability_score, 0);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(!result.details.attributes.catch_all);
    }

    #[tokio::test]
    async fn test_dns_timeout_is_its_own_status() {
        let mut dns = MockDnsLookup::new();
        dns.expect_mx_records().returning(|_| Err(DnsError::Timeout));
        let mut prober = MockMailboxProber::new();
        prober.expect_probe().never();
        let h = harness(dns, prober, 10);

        let result = h.validator.validate("jane@slow.io", &ValidationFlags::default()).await;
        assert_eq!(result.verdict, Verdict::Unknown(UnknownReason::Timeout));
        assert_eq!(result.details.general.validation_method, ValidationMethod::Dns);
    }

    #[tokio::test]
    async fn test_dns_timeout_without_mx_check_is_not_invalid_domain() {
        let mut dns = MockDnsLookup::new();
        dns.expect_mx_records().returning(|_| Err(DnsError::Timeout));
        dns.expect_ip_addrs().returning(|_| Err(DnsError::Timeout));
        dns.expect_txt_records().returning(|_| Err(DnsError::Timeout));
        dns.expect_is_listed().returning(|_| Err(DnsError::Timeout));
        let mut prober = MockMailboxProber::new();
        prober.expect_probe().never();
        let h = harness(dns, prober, 10);
        let flags = ValidationFlags {
            check_mx: false,
            ..ValidationFlags::default()
        };

        let result = h.validator.validate("jane@slow.io", &flags).await;
        assert_eq!(result.verdict, Verdict::Unknown(UnknownReason::Timeout));
        assert_eq!(result.details.general.reason, "DNS lookup timed out");
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_severe_blacklisting_demotes_accept() {
        let mut prober = MockMailboxProber::new();
        prober.expect_probe().returning(|_, _, _| accepted(Some(false)));
        let h = harness(dns(), prober, 10);

        let result = h.validator.validate("ceo@spammy.io", &ValidationFlags::default()).await;
        assert!(result.details.blacklist.is_blacklisted);
        assert!(result.details.blacklist.reputation_score < 50);
        assert_eq!(result.verdict, Verdict::Risky(RiskyReason::LowQuality));
        assert_eq!(h.cache.blacklist("spammy.io").await, Some(result.details.blacklist));
    }

    #[tokio::test]
    async fn test_disposable_domain_is_penalised_not_rejected() {
        let mut prober = MockMailboxProber::new();
        prober.expect_probe().returning(|_, _, _| accepted(Some(false)));
        let h = harness(dns(), prober, 10);

        let result = h
            .validator
            .validate("throwaway@mailinator.com", &ValidationFlags::default())
            .await;
        assert!(result.details.attributes.disposable);
        assert_eq!(result.verdict, Verdict::Deliverable);
        assert_eq!(result.deliverability_score, 60);
        assert_eq!(h.cache.disposable("mailinator.com").await, Some(true));
    }
}
