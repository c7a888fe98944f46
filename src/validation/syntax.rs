/// An address that passed the syntax check, split at its separating `@`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress<'a> {
    pub local: &'a str,
    /// Lower-cased, without a trailing dot.
    pub domain: String,
}

/// Parses `email` into local part and domain, or `None` when it is not an
/// address the pipeline can probe.
///
/// The local part follows RFC 5322 (dot-atom or quoted string). The domain must
/// be a resolvable host name: at least two labels and an alphabetic top-level
/// label. Domain literals such as `user@[192.0.2.1]` are rejected because they
/// carry no MX records to look up.
///
/// ```
/// use email_validation_service::validation::syntax::parse_address;
///
/// let parsed = parse_address("user.name+tag@Example.COM").unwrap();
/// assert_eq!(parsed.local, "user.name+tag");
/// assert_eq!(parsed.domain, "example.com");
/// assert!(parse_address("bad-syntax").is_none());
/// ```
pub fn parse_address(email: &str) -> Option<ParsedAddress<'_>> {
    // RFC 5321 path limit
    if email.is_empty() || email.len() > 254 {
        return None;
    }

    let split_index = find_separator(email)?;
    let (local, domain) = email.split_at(split_index);
    let domain = &domain[1..];

    if local.is_empty() || local.len() > 64 || !is_valid_local_part(local) {
        return None;
    }

    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if !is_valid_host_name(domain) {
        return None;
    }

    Some(ParsedAddress {
        local,
        domain: domain.to_lowercase(),
    })
}

pub fn is_valid_email(email: &str) -> bool {
    parse_address(email).is_some()
}

/// Index of the `@` that separates local part and domain. `@` inside a quoted
/// local part does not count.
fn find_separator(email: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in email.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '@' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn is_valid_local_part(local: &str) -> bool {
    if local.len() >= 2 && local.starts_with('"') && local.ends_with('"') {
        is_valid_quoted_string(&local[1..local.len() - 1])
    } else {
        is_valid_dot_atom(local)
    }
}

fn is_valid_quoted_string(content: &str) -> bool {
    let mut escaped = false;
    for c in content.chars() {
        if escaped {
            if !matches!(c, '\\' | '"') {
                return false;
            }
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' || c.is_control() {
            return false;
        }
    }
    !escaped
}

fn is_valid_dot_atom(atom: &str) -> bool {
    atom.split('.').all(|part| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(c))
    })
}

/// Host name check shared with the DNS-only validator's MX syntax check.
pub fn is_valid_host_name(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    });

    let tld_ok = labels
        .last()
        .is_some_and(|tld| tld.chars().count() >= 2 && tld.chars().all(char::is_alphabetic));

    labels_ok && tld_ok
}
