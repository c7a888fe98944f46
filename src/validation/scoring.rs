use crate::models::{BlacklistInfo, EmailAttributes, RiskLevel, Verdict};

/// Ceiling for any score not backed by an SMTP accept.
pub const DNS_ONLY_SCORE_CAP: u8 = 80;

const DISPOSABLE_PENALTY: i32 = 40;
const CATCH_ALL_PENALTY: i32 = 50;
const ROLE_PENALTY: i32 = 20;
const FREE_PENALTY: i32 = 10;
const PLUS_TAG_PENALTY: i32 = 10;
const NO_REPLY_PENALTY: i32 = 15;
const RISKY_PENALTY: i32 = 30;
const UNKNOWN_PENALTY: i32 = 40;

fn attribute_penalty(attrs: &EmailAttributes, include_catch_all: bool) -> i32 {
    [
        (attrs.disposable, DISPOSABLE_PENALTY),
        (attrs.catch_all && include_catch_all, CATCH_ALL_PENALTY),
        (attrs.role_account, ROLE_PENALTY),
        (attrs.free_email, FREE_PENALTY),
        (attrs.has_plus_tag, PLUS_TAG_PENALTY),
        (attrs.no_reply, NO_REPLY_PENALTY),
    ]
    .iter()
    .filter(|(applies, _)| *applies)
    .map(|(_, penalty)| penalty)
    .sum()
}

/// Half the reputation lost to DNSBL listings.
fn blacklist_penalty(blacklist: &BlacklistInfo) -> i32 {
    (100 - i32::from(blacklist.reputation_score.min(100))) / 2
}

fn clamp(score: i32, cap: u8) -> u8 {
    score.clamp(0, i32::from(cap)) as u8
}

/// Score of a result that went through SMTP (or stopped before it).
pub fn smtp_score(verdict: &Verdict, attrs: &EmailAttributes, blacklist: &BlacklistInfo) -> u8 {
    let status_penalty = match verdict {
        Verdict::Undeliverable(_) => return 0,
        Verdict::Deliverable => 0,
        Verdict::Risky(_) => RISKY_PENALTY,
        Verdict::Unknown(_) => UNKNOWN_PENALTY,
    };
    clamp(
        100 - attribute_penalty(attrs, true) - blacklist_penalty(blacklist) - status_penalty,
        100,
    )
}

/// Score of a DNS-only result, starting from the DNS confidence score. The
/// catch-all heuristic is already part of `base`, so it is not charged twice.
pub fn dns_only_score(
    base: u8,
    verdict: &Verdict,
    attrs: &EmailAttributes,
    blacklist: &BlacklistInfo,
) -> u8 {
    if matches!(verdict, Verdict::Undeliverable(_)) {
        return 0;
    }
    clamp(
        i32::from(base) - attribute_penalty(attrs, false) - blacklist_penalty(blacklist),
        DNS_ONLY_SCORE_CAP,
    )
}

pub fn risk_level(score: u8, verdict: &Verdict) -> RiskLevel {
    let by_score = match score {
        90.. => RiskLevel::None,
        80..=89 => RiskLevel::Low,
        60..=79 => RiskLevel::Medium,
        _ => RiskLevel::High,
    };
    match verdict {
        Verdict::Undeliverable(_) => RiskLevel::High,
        Verdict::Unknown(_) | Verdict::Risky(_) => by_score.max(RiskLevel::Medium),
        Verdict::Deliverable => by_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RiskyReason, UndeliverableReason, UnknownReason};

    fn attrs() -> EmailAttributes {
        EmailAttributes::default()
    }

    #[test]
    fn test_clean_smtp_accept_scores_full() {
        let score = smtp_score(&Verdict::Deliverable, &attrs(), &BlacklistInfo::default());
        assert_eq!(score, 100);
        assert_eq!(risk_level(score, &Verdict::Deliverable), RiskLevel::None);
    }

    #[test]
    fn test_penalties_accumulate() {
        let attributes = EmailAttributes {
            free_email: true,
            role_account: true,
            has_plus_tag: true,
            ..attrs()
        };
        let score = smtp_score(&Verdict::Deliverable, &attributes, &BlacklistInfo::default());
        assert_eq!(score, 60);
        assert_eq!(risk_level(score, &Verdict::Deliverable), RiskLevel::Medium);

        let blacklist = BlacklistInfo {
            is_blacklisted: true,
            blacklists_found: vec!["zen.spamhaus.org".into()],
            reputation_score: 60,
        };
        assert_eq!(smtp_score(&Verdict::Deliverable, &attrs(), &blacklist), 80);
    }

    #[test]
    fn test_catch_all_risky_result() {
        let attributes = EmailAttributes {
            catch_all: true,
            ..attrs()
        };
        let verdict = Verdict::Risky(RiskyReason::LowDeliverability);
        let score = smtp_score(&verdict, &attributes, &BlacklistInfo::default());
        assert_eq!(score, 20);
        assert_eq!(risk_level(score, &verdict), RiskLevel::High);
    }

    #[test]
    fn test_undeliverable_is_zero_and_high_risk() {
        let verdict = Verdict::Undeliverable(UndeliverableReason::RejectedEmail);
        assert_eq!(smtp_score(&verdict, &attrs(), &BlacklistInfo::default()), 0);
        assert_eq!(dns_only_score(80, &verdict, &attrs(), &BlacklistInfo::default()), 0);
        assert_eq!(risk_level(100, &verdict), RiskLevel::High);
    }

    #[test]
    fn test_unknown_is_never_low_risk() {
        let verdict = Verdict::Unknown(UnknownReason::Timeout);
        let score = smtp_score(&verdict, &attrs(), &BlacklistInfo::default());
        assert_eq!(score, 60);
        assert_eq!(risk_level(95, &verdict), RiskLevel::Medium);
    }

    #[test]
    fn test_dns_only_scores_never_exceed_cap() {
        for base in [0u8, 40, 79, 80, 81, 100, 255] {
            let score = dns_only_score(base, &Verdict::Deliverable, &attrs(), &BlacklistInfo::default());
            assert!(score <= DNS_ONLY_SCORE_CAP, "base {base} scored {score}");
        }
        let catch_all = EmailAttributes {
            catch_all: true,
            ..attrs()
        };
        let verdict = Verdict::Risky(RiskyReason::LowDeliverability);
        assert_eq!(dns_only_score(50, &verdict, &catch_all, &BlacklistInfo::default()), 50);
    }
}
