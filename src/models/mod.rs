pub mod batch;
pub mod health;
pub mod validation;

pub use self::batch::{
    ProgressEvent, ProgressSnapshot, StatusView, SubmissionStatus, SubmissionTracker,
    SubmitOutcome, UnitProgress, UnitStatus, ValidationUnit,
};
pub use self::health::HealthResponse;
pub use self::validation::{
    BlacklistInfo, EmailAttributes, EmailValidationResult, MailServerInfo, RiskLevel,
    RiskyReason, UndeliverableReason, UnknownReason, ValidationFlags, ValidationMethod, Verdict,
};
