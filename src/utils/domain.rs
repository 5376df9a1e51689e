//! Utility functions for cleaning up company domains and splitting addresses.

use url::{Host, Url};

/// Reduces a website URL or domain string to a bare lower-case host name.
///
/// Handles common variations:
/// - strips any scheme (`https://`, `http://`, ...);
/// - strips every leading `www.`;
/// - drops port, path, query and fragment;
/// - drops trailing dots.
///
/// Returns an empty string when nothing usable remains, including IP literals and
/// hosts with characters a domain cannot carry. The function is idempotent:
/// feeding its output back in yields the same value.
pub fn normalize_domain(website_url_or_domain: &str) -> String {
    let trimmed_input = website_url_or_domain.trim();
    if trimmed_input.is_empty() {
        return String::new();
    }

    let raw_host = match trimmed_input.split_once("://") {
        Some((scheme, _)) if SPECIAL_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) => {
            match Url::parse(trimmed_input) {
                Ok(url) => url.host_str().unwrap_or("").to_string(),
                Err(e) => {
                    tracing::trace!(
                        "'{}' failed URL parsing ({}), falling back to manual domain cleanup.",
                        trimmed_input,
                        e
                    );
                    manual_host(trimmed_input)
                }
            }
        }
        _ => manual_host(trimmed_input),
    };

    // Settle on a host that maps to itself, so the output can be fed back in.
    let mut domain = raw_host;
    for _ in 0..MAX_CANONICAL_PASSES {
        let next = canonical_host(&domain);
        if next == domain {
            return domain;
        }
        domain = next;
    }
    tracing::trace!("'{}' did not settle on a stable host name.", trimmed_input);
    String::new()
}

const SPECIAL_SCHEMES: [&str; 5] = ["http", "https", "ftp", "ws", "wss"];
const MAX_CANONICAL_PASSES: usize = 4;

/// One cleanup pass: lower-case, strip `www.` prefixes and stray dots or whitespace,
/// then let `Url` validate and punycode the result. Anything that is not a domain
/// name (IP literals, forbidden characters) becomes empty.
fn canonical_host(host: &str) -> String {
    let mut domain = host.trim().to_lowercase();
    loop {
        let stripped = domain.strip_prefix("www.").unwrap_or(&domain);
        let trimmed = stripped.trim_matches(|c: char| c == '.' || c.is_whitespace());
        if trimmed.len() == domain.len() {
            break;
        }
        domain = trimmed.to_string();
    }
    if domain.is_empty() {
        return domain;
    }

    match Url::parse(&format!("https://{}", domain)) {
        Ok(url) => match url.host() {
            Some(Host::Domain(parsed)) => parsed.to_string(),
            _ => String::new(),
        },
        Err(_) => String::new(),
    }
}

/// Best-effort host extraction for inputs without a web scheme.
fn manual_host(input: &str) -> String {
    let without_scheme = match input.find("://") {
        Some(idx) => &input[idx + 3..],
        None => input,
    };
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("");
    let host_port = authority.rsplit('@').next().unwrap_or("");
    host_port.split(':').next().unwrap_or("").to_string()
}

/// Splits an address into `(local_part, domain)`.
pub fn split_email(email: &str) -> Option<(&str, &str)> {
    let (local, domain) = email.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        None
    } else {
        Some((local, domain))
    }
}
