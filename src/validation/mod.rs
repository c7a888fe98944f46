//! Address validation: the per-email pipeline and the checks it is built from.

pub mod blacklist;
pub mod classify;
pub mod dns;
pub mod dns_only;
pub mod pipeline;
pub mod scoring;
pub mod smtp;
pub mod syntax;

pub use dns::{DnsLookup, TrustDnsLookup};
pub use dns_only::DnsOnlyValidator;
pub use pipeline::EmailValidator;
pub use smtp::{MailboxProber, SmtpProber};
