//! Expands ranked templates into concrete candidate addresses for a lead.

use crate::core::catalog::PatternCatalog;
use crate::core::error::{AppError, Result};
use crate::core::models::{Candidate, Lead};
use crate::utils::domain::{normalize_domain, split_email};
use std::collections::HashSet;

/// Lower-cases a name part and keeps only ASCII letters.
pub fn normalize_name(part: &str) -> String {
    part.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect()
}

/// Name and domain of a lead after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedLead {
    pub first: String,
    pub last: String,
    pub domain: String,
}

/// Normalizes a lead, failing if any of the three fields ends up empty.
pub fn normalize_lead(lead: &Lead) -> Result<NormalizedLead> {
    let normalized = NormalizedLead {
        first: normalize_name(&lead.first_name),
        last: normalize_name(&lead.last_name),
        domain: normalize_domain(&lead.domain),
    };

    let mut missing_parts = Vec::new();
    if normalized.first.is_empty() {
        missing_parts.push("first name");
    }
    if normalized.last.is_empty() {
        missing_parts.push("last name");
    }
    if normalized.domain.is_empty() {
        missing_parts.push("domain");
    }
    if !missing_parts.is_empty() {
        return Err(AppError::Validation(format!(
            "Missing {} after normalization",
            missing_parts.join(", ")
        )));
    }
    Ok(normalized)
}

/// Literal placeholder substitution, producing `localpart@domain`.
pub fn render_template(template: &str, first: &str, last: &str, domain: &str) -> String {
    let first_initial: String = first.chars().take(1).collect();
    let last_initial: String = last.chars().take(1).collect();
    let local_part = template
        .replace("{first}", first)
        .replace("{last}", last)
        .replace("{f}", &first_initial)
        .replace("{l}", &last_initial);
    format!("{}@{}", local_part, domain)
}

/// One candidate per catalog template, in the bucket's priority order.
///
/// Duplicates are kept; see [`deduplicate`].
pub fn generate_candidates(lead: &Lead, catalog: &PatternCatalog) -> Result<Vec<Candidate>> {
    let normalized = normalize_lead(lead)?;
    let patterns = catalog.lookup(lead.company_size.as_ref());

    tracing::debug!(
        "Generating {} candidates for '{} {}' @ '{}'",
        patterns.len(),
        normalized.first,
        normalized.last,
        normalized.domain
    );

    Ok(patterns
        .iter()
        .map(|pattern| Candidate {
            email: render_template(
                &pattern.template,
                &normalized.first,
                &normalized.last,
                &normalized.domain,
            ),
            source_pattern: pattern.template.clone(),
            prevalence_score: pattern.prevalence_score,
            verification_priority: pattern.verification_priority,
        })
        .collect())
}

/// Removes repeated addresses; the first occurrence wins and order is preserved.
pub fn deduplicate(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.email.clone()))
        .collect()
}

/// Generation followed by deduplication.
pub fn generate_deduplicated(lead: &Lead, catalog: &PatternCatalog) -> Result<Vec<Candidate>> {
    let all = generate_candidates(lead, catalog)?;
    let total = all.len();
    let unique = deduplicate(all);
    if unique.len() < total {
        tracing::trace!(
            "Dropped {} duplicate candidates for {}",
            total - unique.len(),
            lead.task_label()
        );
    }
    Ok(unique)
}

/// Keeps only the `limit` most likely candidates.
pub fn top_candidates(mut candidates: Vec<Candidate>, limit: Option<usize>) -> Vec<Candidate> {
    if let Some(limit) = limit {
        candidates.truncate(limit);
    }
    candidates
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    First,
    Last,
    FirstInitial,
    LastInitial,
}

fn tokenize(template: &str) -> Vec<Token> {
    const PLACEHOLDERS: [(&str, Token); 4] = [
        ("{first}", Token::First),
        ("{last}", Token::Last),
        ("{f}", Token::FirstInitial),
        ("{l}", Token::LastInitial),
    ];
    let mut tokens = Vec::new();
    let mut rest = template;
    'outer: while !rest.is_empty() {
        for (text, token) in PLACEHOLDERS {
            if let Some(tail) = rest.strip_prefix(text) {
                tokens.push(token);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            tokens.push(Token::Literal(c));
        }
        rest = chars.as_str();
    }
    tokens
}

/// Name components recovered from a rendered address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedParts {
    pub first: Option<String>,
    pub last: Option<String>,
    pub first_initial: Option<char>,
    pub last_initial: Option<char>,
    pub domain: String,
}

impl ExtractedParts {
    /// True when every recovered component matches the given normalized values.
    pub fn agrees_with(&self, first: &str, last: &str, domain: &str) -> bool {
        self.first.as_deref().is_none_or(|f| f == first)
            && self.last.as_deref().is_none_or(|l| l == last)
            && self.first_initial.is_none_or(|c| first.starts_with(c))
            && self.last_initial.is_none_or(|c| last.starts_with(c))
            && normalize_domain(&self.domain) == domain
    }
}

/// Reverses `template` against `email`, returning every consistent parse.
///
/// Templates with adjacent full-name placeholders (e.g. `{first}{last}`) are
/// ambiguous, hence the list. An empty list means the address cannot have been
/// rendered from this template.
pub fn extract_name_parts(template: &str, email: &str) -> Vec<ExtractedParts> {
    let Some((local_part, domain)) = split_email(email) else {
        return Vec::new();
    };
    let tokens = tokenize(template);
    let input: Vec<char> = local_part.chars().collect();
    let mut parses = Vec::new();
    let start = ExtractedParts {
        domain: domain.to_string(),
        ..Default::default()
    };
    match_tokens(&tokens, &input, start, &mut parses);
    parses
}

fn match_tokens(
    tokens: &[Token],
    input: &[char],
    parts: ExtractedParts,
    out: &mut Vec<ExtractedParts>,
) {
    let Some((token, rest_tokens)) = tokens.split_first() else {
        if input.is_empty() {
            out.push(parts);
        }
        return;
    };

    match *token {
        Token::Literal(c) => {
            if input.first() == Some(&c) {
                match_tokens(rest_tokens, &input[1..], parts, out);
            }
        }
        Token::FirstInitial | Token::LastInitial => {
            let Some(&c) = input.first() else { return };
            if !c.is_ascii_alphabetic() {
                return;
            }
            let is_first = *token == Token::FirstInitial;
            let (initial, full) = if is_first {
                (parts.first_initial, parts.first.as_deref())
            } else {
                (parts.last_initial, parts.last.as_deref())
            };
            if initial.is_some_and(|i| i != c) || full.is_some_and(|f| !f.starts_with(c)) {
                return;
            }
            let mut next = parts.clone();
            if is_first {
                next.first_initial = Some(c);
            } else {
                next.last_initial = Some(c);
            }
            match_tokens(rest_tokens, &input[1..], next, out);
        }
        Token::First | Token::Last => {
            let is_first = *token == Token::First;
            let letters = input.iter().take_while(|c| c.is_ascii_alphabetic()).count();
            for len in 1..=letters {
                let candidate: String = input[..len].iter().collect();
                let (existing, initial) = if is_first {
                    (parts.first.as_deref(), parts.first_initial)
                } else {
                    (parts.last.as_deref(), parts.last_initial)
                };
                if existing.is_some_and(|e| e != candidate)
                    || initial.is_some_and(|i| !candidate.starts_with(i))
                {
                    continue;
                }
                let mut next = parts.clone();
                if is_first {
                    next.first = Some(candidate);
                } else {
                    next.last = Some(candidate);
                }
                match_tokens(rest_tokens, &input[len..], next, out);
            }
        }
    }
}
