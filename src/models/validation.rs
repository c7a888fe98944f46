use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn enabled() -> bool {
    true
}

/// Which optional checks the pipeline runs. Every flag defaults to on, so a
/// partial flags object only needs to name the checks it turns off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFlags {
    #[serde(default = "enabled")]
    pub check_mx: bool,
    #[serde(default = "enabled")]
    pub check_smtp: bool,
    #[serde(default = "enabled")]
    pub check_disposable: bool,
    #[serde(default = "enabled")]
    pub check_catch_all: bool,
    #[serde(default = "enabled")]
    pub check_blacklist: bool,
}

impl Default for ValidationFlags {
    fn default() -> Self {
        Self {
            check_mx: true,
            check_smtp: true,
            check_disposable: true,
            check_catch_all: true,
            check_blacklist: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndeliverableReason {
    InvalidEmail,
    InvalidDomain,
    RejectedEmail,
    InvalidSmtp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskyReason {
    LowQuality,
    LowDeliverability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownReason {
    NoConnect,
    Timeout,
    UnavailableSmtp,
    UnexpectedError,
}

/// Terminal classification of one address. Each status carries only the
/// sub-statuses that make sense for it; `deliverable` has none.
///
/// On the wire `status` sits on the result itself and `subStatus` inside
/// its `details`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliverable,
    Undeliverable(UndeliverableReason),
    Risky(RiskyReason),
    Unknown(UnknownReason),
}

impl Verdict {
    const ALL: [Verdict; 11] = [
        Self::Deliverable,
        Self::Undeliverable(UndeliverableReason::InvalidEmail),
        Self::Undeliverable(UndeliverableReason::InvalidDomain),
        Self::Undeliverable(UndeliverableReason::RejectedEmail),
        Self::Undeliverable(UndeliverableReason::InvalidSmtp),
        Self::Risky(RiskyReason::LowQuality),
        Self::Risky(RiskyReason::LowDeliverability),
        Self::Unknown(UnknownReason::NoConnect),
        Self::Unknown(UnknownReason::Timeout),
        Self::Unknown(UnknownReason::UnavailableSmtp),
        Self::Unknown(UnknownReason::UnexpectedError),
    ];

    /// Inverse of [`Verdict::status`] and [`Verdict::sub_status`]. `None`
    /// for a pair no verdict produces.
    pub fn from_parts(status: &str, sub_status: Option<&str>) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|verdict| verdict.status() == status && verdict.sub_status() == sub_status)
    }

    /// Deliverable and risky addresses are worth sending to.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Deliverable | Self::Risky(_))
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Deliverable => "deliverable",
            Self::Undeliverable(_) => "undeliverable",
            Self::Risky(_) => "risky",
            Self::Unknown(_) => "unknown",
        }
    }

    pub fn sub_status(&self) -> Option<&'static str> {
        match self {
            Self::Deliverable => None,
            Self::Undeliverable(reason) => Some(match reason {
                UndeliverableReason::InvalidEmail => "invalid_email",
                UndeliverableReason::InvalidDomain => "invalid_domain",
                UndeliverableReason::RejectedEmail => "rejected_email",
                UndeliverableReason::InvalidSmtp => "invalid_smtp",
            }),
            Self::Risky(reason) => Some(match reason {
                RiskyReason::LowQuality => "low_quality",
                RiskyReason::LowDeliverability => "low_deliverability",
            }),
            Self::Unknown(reason) => Some(match reason {
                UnknownReason::NoConnect => "no_connect",
                UnknownReason::Timeout => "timeout",
                UnknownReason::UnavailableSmtp => "unavailable_smtp",
                UnknownReason::UnexpectedError => "unexpected_error",
            }),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub_status() {
            Some(sub) => write!(f, "{}/{}", self.status(), sub),
            None => f.write_str(self.status()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

/// How far the pipeline got before it settled on a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMethod {
    Syntax,
    Dns,
    Smtp,
    DnsOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralInfo {
    pub domain: String,
    pub reason: String,
    pub validation_method: ValidationMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAttributes {
    pub free_email: bool,
    pub role_account: bool,
    pub disposable: bool,
    pub catch_all: bool,
    pub has_plus_tag: bool,
    pub mailbox_full: bool,
    pub no_reply: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailServerInfo {
    pub smtp_provider: Option<String>,
    pub mx_record: Option<String>,
    /// Set when the domain has no MX and mail would go to its A record.
    pub implicit_mx: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistInfo {
    pub is_blacklisted: bool,
    pub blacklists_found: Vec<String>,
    /// 0-100, 100 meaning no list knows the domain or its mail hosts.
    pub reputation_score: u8,
}

impl Default for BlacklistInfo {
    fn default() -> Self {
        Self {
            is_blacklisted: false,
            blacklists_found: Vec::new(),
            reputation_score: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationDetails {
    pub general: GeneralInfo,
    pub attributes: EmailAttributes,
    pub mail_server: MailServerInfo,
    pub blacklist: BlacklistInfo,
}

/// Outcome for one submitted address. Produced once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ResultRecord", try_from = "ResultRecord")]
pub struct EmailValidationResult {
    pub email: String,
    pub is_valid: bool,
    pub verdict: Verdict,
    pub risk_level: RiskLevel,
    pub deliverability_score: u8,
    pub details: ValidationDetails,
}

impl EmailValidationResult {
    /// A result with empty details, the given verdict, and the worst score.
    /// Callers fill in what they learned and then score it.
    pub fn new(
        email: impl Into<String>,
        domain: impl Into<String>,
        verdict: Verdict,
        reason: impl Into<String>,
        validation_method: ValidationMethod,
    ) -> Self {
        Self {
            email: email.into(),
            is_valid: verdict.is_valid(),
            verdict,
            risk_level: RiskLevel::High,
            deliverability_score: 0,
            details: ValidationDetails {
                general: GeneralInfo {
                    domain: domain.into(),
                    reason: reason.into(),
                    validation_method,
                },
                attributes: EmailAttributes::default(),
                mail_server: MailServerInfo::default(),
                blacklist: BlacklistInfo::default(),
            },
        }
    }

    pub fn set_verdict(&mut self, verdict: Verdict, reason: impl Into<String>) {
        self.verdict = verdict;
        self.is_valid = verdict.is_valid();
        self.details.general.reason = reason.into();
    }
}

/// Serialized form of [`EmailValidationResult`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultRecord {
    email: String,
    is_valid: bool,
    status: String,
    risk_level: RiskLevel,
    deliverability_score: u8,
    details: DetailsRecord,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsRecord {
    #[serde(flatten)]
    details: ValidationDetails,
    sub_status: Option<String>,
}

impl From<EmailValidationResult> for ResultRecord {
    fn from(result: EmailValidationResult) -> Self {
        Self {
            email: result.email,
            is_valid: result.is_valid,
            status: result.verdict.status().to_string(),
            risk_level: result.risk_level,
            deliverability_score: result.deliverability_score,
            details: DetailsRecord {
                details: result.details,
                sub_status: result.verdict.sub_status().map(str::to_string),
            },
        }
    }
}

impl TryFrom<ResultRecord> for EmailValidationResult {
    type Error = String;

    fn try_from(record: ResultRecord) -> Result<Self, Self::Error> {
        let sub_status = record.details.sub_status;
        let verdict = Verdict::from_parts(&record.status, sub_status.as_deref())
            .ok_or_else(|| format!("unknown status {:?}/{sub_status:?}", record.status))?;
        Ok(Self {
            email: record.email,
            is_valid: record.is_valid,
            verdict,
            risk_level: record.risk_level,
            deliverability_score: record.deliverability_score,
            details: record.details.details,
        })
    }
}
