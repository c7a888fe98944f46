//! Static classification tables and the attribute checks built on them.

use phf::phf_set;

use crate::models::EmailAttributes;

pub const FREE_EMAIL_PROVIDERS: phf::Set<&'static str> = phf_set! {
    "gmail.com", "yahoo.com", "hotmail.com", "outlook.com", "aol.com",
    "icloud.com", "protonmail.com", "zoho.com", "yandex.com",
};

pub const ROLE_PREFIXES: phf::Set<&'static str> = phf_set! {
    "admin", "administrator", "support", "help", "info", "contact",
    "sales", "marketing", "billing", "accounts", "abuse", "postmaster",
};

pub const DISPOSABLE_DOMAINS: phf::Set<&'static str> = phf_set! {
    "mailinator.com", "mailinator.net", "mailinator.org", "mailinator.info",
    "guerrillamail.com", "guerrillamail.info", "guerrillamail.biz",
    "guerrillamail.de", "guerrillamail.net", "guerrillamail.org",
    "guerrillamailblock.com", "grr.la",
    "tempmail.com", "throwawaymail.com", "tempmail.net",
    "disposablemail.com", "yopmail.com", "maildrop.cc",
    "temp-mail.org", "fakeinbox.com", "10minutemail.com",
    "trashmail.com", "sharklasers.com", "spam4.me",
};

/// Reserved and placeholder domains. Real mail never lands there.
pub const EXAMPLE_DOMAINS: phf::Set<&'static str> = phf_set! {
    "example.com", "example.net", "example.org", "test.com", "test.net",
    "test.org", "domain.com", "domain.net", "domain.org",
};

/// Provider name and the MX host fragments that identify it, checked in order.
const SMTP_PROVIDERS: &[(&str, &[&str])] = &[
    ("google", &["google", "gmail"]),
    ("microsoft", &["outlook", "hotmail", "microsoft"]),
    ("yahoo", &["yahoo"]),
    ("aol", &["aol"]),
    ("proton", &["proton"]),
    ("zoho", &["zoho"]),
    ("yandex", &["yandex"]),
];

/// Primary MX hosts of hosted-mail offerings where catch-all is common.
const CATCH_ALL_MX_PATTERNS: &[(&str, &[&str])] = &[
    (
        "google",
        &["aspmx.l.google.com", "alt1.aspmx.l.google.com", "alt2.aspmx.l.google.com"],
    ),
    ("microsoft", &["mail.protection.outlook.com"]),
    ("zoho", &["mx.zoho.com", "mx2.zoho.com"]),
    ("proton", &["mail.protonmail.ch"]),
];

/// MX host fragments of large mail platforms, used as a DNS confidence signal.
pub const MAJOR_PROVIDER_FRAGMENTS: [&str; 5] =
    ["google", "outlook", "microsoft", "amazon", "protonmail"];

pub fn is_free_provider(domain: &str) -> bool {
    FREE_EMAIL_PROVIDERS.contains(domain.to_lowercase().as_str())
}

pub fn is_disposable_domain(domain: &str) -> bool {
    DISPOSABLE_DOMAINS.contains(domain.to_lowercase().as_str())
}

pub fn is_example_domain(domain: &str) -> bool {
    EXAMPLE_DOMAINS.contains(domain.to_lowercase().as_str())
}

/// Role accounts are matched on the part before any `+` tag.
pub fn is_role_account(local: &str) -> bool {
    let lower = local.to_lowercase();
    let base = lower.split('+').next().unwrap_or_default();
    ROLE_PREFIXES.contains(base)
}

pub fn is_no_reply(local: &str) -> bool {
    let lower = local.to_lowercase();
    lower.starts_with("noreply") || lower.starts_with("no-reply")
}

/// Attributes derivable from the address alone. `disposable` is left to the
/// caller since it goes through the domain cache.
pub fn address_attributes(local: &str, domain: &str) -> EmailAttributes {
    EmailAttributes {
        free_email: is_free_provider(domain),
        role_account: is_role_account(local),
        has_plus_tag: local.contains('+'),
        no_reply: is_no_reply(local),
        ..EmailAttributes::default()
    }
}

pub fn identify_smtp_provider(mx_host: &str) -> Option<&'static str> {
    let lower = mx_host.to_lowercase();
    SMTP_PROVIDERS
        .iter()
        .find(|(_, fragments)| fragments.iter().any(|f| lower.contains(f)))
        .map(|(provider, _)| *provider)
}

pub fn uses_major_provider(mx_host: &str) -> bool {
    let lower = mx_host.to_lowercase();
    MAJOR_PROVIDER_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// DNS-level catch-all heuristic: Google Workspace and Microsoft 365 domains
/// are assumed catch-all until SMTP says otherwise.
pub fn is_likely_catch_all(primary_mx: &str, provider: Option<&str>) -> bool {
    let Some(provider) = provider else {
        return false;
    };
    if !matches!(provider, "google" | "microsoft") {
        return false;
    }
    let lower = primary_mx.to_lowercase();
    CATCH_ALL_MX_PATTERNS
        .iter()
        .filter(|(name, _)| *name == provider)
        .any(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_attributes() {
        let attrs = address_attributes("Support+billing", "Gmail.com");
        assert!(attrs.free_email);
        assert!(attrs.role_account);
        assert!(attrs.has_plus_tag);
        assert!(!attrs.no_reply);
        assert!(!attrs.disposable);

        let attrs = address_attributes("no-reply", "corp.io");
        assert!(attrs.no_reply);
        assert!(!attrs.free_email);
        assert!(!attrs.role_account);
    }

    #[test]
    fn test_domain_tables() {
        assert!(is_disposable_domain("MAILINATOR.com"));
        assert!(!is_disposable_domain("gmail.com"));
        assert!(is_example_domain("example.org"));
        assert!(!is_example_domain("examples.org"));
    }

    #[test]
    fn test_identify_smtp_provider() {
        assert_eq!(identify_smtp_provider("gmail-smtp-in.l.google.com"), Some("google"));
        assert_eq!(
            identify_smtp_provider("corp-com.mail.protection.outlook.com"),
            Some("microsoft")
        );
        assert_eq!(identify_smtp_provider("mta5.am0.yahoodns.net"), Some("yahoo"));
        assert_eq!(identify_smtp_provider("mx.example.net"), None);
    }

    #[test]
    fn test_catch_all_heuristic() {
        assert!(is_likely_catch_all("aspmx.l.google.com", Some("google")));
        assert!(is_likely_catch_all(
            "corp-com.mail.protection.outlook.com",
            Some("microsoft")
        ));
        // Zoho is listed but not trusted as a catch-all signal on its own.
        assert!(!is_likely_catch_all("mx.zoho.com", Some("zoho")));
        assert!(!is_likely_catch_all("gmail-smtp-in.l.google.com", Some("google")));
        assert!(!is_likely_catch_all("aspmx.l.google.com", None));
    }

    #[test]
    fn test_major_provider() {
        assert!(uses_major_provider("inbound-smtp.us-east-1.amazonaws.com"));
        assert!(!uses_major_provider("mail.smallhost.net"));
    }
}
