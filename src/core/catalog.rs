//! Ranked email-format tables, one per organization-size bucket.
//!
//! The tables are data, not code: the default set is embedded from
//! `data/patterns.toml` and a replacement file can be supplied at start-up. Every
//! table is validated on load so the rest of the pipeline can rely on the ordering
//! invariants without re-checking them.

use crate::core::error::{AppError, Result};
use crate::core::models::{Bucket, BucketResolution, CompanySize, EmailPattern};

use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Number of templates every bucket must carry.
pub const PATTERNS_PER_BUCKET: usize = 32;

const EMBEDDED_CATALOG: &str = include_str!("../../data/patterns.toml");

/// Substring aliases seen in CRM exports, checked in bucket order.
const BUCKET_ALIASES: &[(Bucket, &[&str])] = &[
    (Bucket::Small, &["1-50", "1-10", "2-10", "11-50"]),
    (Bucket::Medium, &["51-200", "51-100", "101-200"]),
    (Bucket::Large, &["201-500", "201-300", "301-500"]),
    (
        Bucket::Enterprise,
        &[
            "500+",
            "501+",
            "1000+",
            "1001+",
            "501-1000",
            "1001-5000",
            "5001-10000",
            "10001+",
        ],
    ),
];

#[derive(Debug, Deserialize)]
struct CatalogFile {
    version: String,
    buckets: Vec<BucketTable>,
}

#[derive(Debug, Deserialize)]
struct BucketTable {
    label: String,
    patterns: Vec<PatternRow>,
}

#[derive(Debug, Deserialize)]
struct PatternRow {
    rank: u8,
    template: String,
    prevalence: f64,
    #[serde(default)]
    cumulative: f64,
    priority: u8,
}

/// Immutable lookup from company size to a priority-ordered list of templates.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    version: String,
    tables: [Vec<EmailPattern>; 4],
    default_bucket: Bucket,
}

fn slot(bucket: Bucket) -> usize {
    match bucket {
        Bucket::Small => 0,
        Bucket::Medium => 1,
        Bucket::Large => 2,
        Bucket::Enterprise => 3,
    }
}

impl PatternCatalog {
    /// The catalog compiled into the binary.
    pub fn embedded() -> Result<Self> {
        Self::from_toml_str(EMBEDDED_CATALOG)
    }

    /// Reads and validates a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(target: "pattern_catalog", "Loading pattern catalog from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Catalog(format!(
                "Failed to read pattern catalog '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates catalog TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        let template_re = Regex::new(r"^(?:\{(?:first|last|f|l)\}|[._-])+$")
            .map_err(|e| AppError::Initialization(format!("Template regex: {}", e)))?;

        let mut tables: [Option<Vec<EmailPattern>>; 4] = [None, None, None, None];
        for table in file.buckets {
            let bucket = Bucket::from_label(&table.label).ok_or_else(|| {
                AppError::Catalog(format!("Unknown bucket label '{}'", table.label))
            })?;
            if tables[slot(bucket)].is_some() {
                return Err(AppError::Catalog(format!(
                    "Bucket '{}' is defined more than once",
                    bucket
                )));
            }
            let patterns = validate_table(bucket, table.patterns, &template_re)?;
            tables[slot(bucket)] = Some(patterns);
        }

        let [small, medium, large, enterprise] = tables;
        let missing = |b: Bucket| AppError::Catalog(format!("Bucket '{}' is missing", b));
        let catalog = Self {
            version: file.version,
            tables: [
                small.ok_or_else(|| missing(Bucket::Small))?,
                medium.ok_or_else(|| missing(Bucket::Medium))?,
                large.ok_or_else(|| missing(Bucket::Large))?,
                enterprise.ok_or_else(|| missing(Bucket::Enterprise))?,
            ],
            default_bucket: Bucket::Medium,
        };
        tracing::info!(target: "pattern_catalog", "Pattern catalog v{} loaded ({} buckets x {} patterns)",
            catalog.version, Bucket::ALL.len(), PATTERNS_PER_BUCKET);
        Ok(catalog)
    }

    /// Sets the bucket used when a company size cannot be interpreted.
    pub fn with_default_bucket(mut self, bucket: Bucket) -> Self {
        self.default_bucket = bucket;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn default_bucket(&self) -> Bucket {
        self.default_bucket
    }

    /// The templates of one bucket, ascending by verification priority.
    pub fn patterns(&self, bucket: Bucket) -> &[EmailPattern] {
        &self.tables[slot(bucket)]
    }

    /// Templates for a company size, after bucket resolution.
    pub fn lookup(&self, company_size: Option<&CompanySize>) -> &[EmailPattern] {
        self.patterns(self.resolve(company_size).bucket)
    }

    /// Maps a company size onto a bucket. Never fails; unknown sizes fall back to the
    /// default bucket with `defaulted` set.
    pub fn resolve(&self, company_size: Option<&CompanySize>) -> BucketResolution {
        let matched = match company_size {
            Some(CompanySize::Count(n)) if n.is_finite() => Some(Bucket::from_employee_count(*n)),
            Some(CompanySize::Count(_)) => None,
            Some(CompanySize::Label(label)) => resolve_label(label),
            None => None,
        };

        match matched {
            Some(bucket) => BucketResolution {
                bucket,
                defaulted: false,
            },
            None => {
                tracing::debug!(target: "pattern_catalog",
                    "Company size {:?} not recognised, defaulting to bucket {}",
                    company_size, self.default_bucket);
                BucketResolution {
                    bucket: self.default_bucket,
                    defaulted: true,
                }
            }
        }
    }
}

fn resolve_label(label: &str) -> Option<Bucket> {
    let lowered = label.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }

    for (bucket, aliases) in BUCKET_ALIASES {
        if aliases.iter().any(|alias| contains_alias(&lowered, alias)) {
            return Some(*bucket);
        }
    }

    if let Some(bucket) = Bucket::from_label(label.trim()) {
        return Some(bucket);
    }

    leading_number(&lowered).map(Bucket::from_employee_count)
}

/// Substring match that refuses aliases glued to neighbouring digits, so that
/// `"1001-5000"` does not match `"1-50"`.
fn contains_alias(haystack: &str, alias: &str) -> bool {
    haystack.match_indices(alias).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + alias.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
    })
}

/// Parses the number a label starts with, e.g. `"1,200 employees"` -> 1200.
fn leading_number(label: &str) -> Option<f64> {
    let digits: String = label
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn validate_table(
    bucket: Bucket,
    rows: Vec<PatternRow>,
    template_re: &Regex,
) -> Result<Vec<EmailPattern>> {
    if rows.len() != PATTERNS_PER_BUCKET {
        return Err(AppError::Catalog(format!(
            "Bucket '{}' has {} patterns, expected {}",
            bucket,
            rows.len(),
            PATTERNS_PER_BUCKET
        )));
    }

    let mut seen_priorities = [false; PATTERNS_PER_BUCKET];
    let mut seen_ranks = [false; PATTERNS_PER_BUCKET];
    for row in &rows {
        for (value, seen, field) in [
            (row.priority, &mut seen_priorities, "priority"),
            (row.rank, &mut seen_ranks, "rank"),
        ] {
            let idx = usize::from(value);
            if idx == 0 || idx > PATTERNS_PER_BUCKET || seen[idx - 1] {
                return Err(AppError::Catalog(format!(
                    "Bucket '{}': {} values must be a permutation of 1..={} (bad value {})",
                    bucket, field, PATTERNS_PER_BUCKET, value
                )));
            }
            seen[idx - 1] = true;
        }
        if !template_re.is_match(&row.template) || !row.template.contains('{') {
            return Err(AppError::Catalog(format!(
                "Bucket '{}': malformed template '{}'",
                bucket, row.template
            )));
        }
        if !row.prevalence.is_finite() || row.prevalence < 0.0 {
            return Err(AppError::Catalog(format!(
                "Bucket '{}': invalid prevalence {} for '{}'",
                bucket, row.prevalence, row.template
            )));
        }
    }

    let mut patterns: Vec<EmailPattern> = rows
        .into_iter()
        .map(|row| EmailPattern {
            rank: row.rank,
            template: row.template,
            prevalence_score: row.prevalence,
            cumulative_score: row.cumulative,
            verification_priority: row.priority,
        })
        .collect();
    patterns.sort_by_key(|p| p.verification_priority);

    if let Some(pair) = patterns
        .windows(2)
        .find(|w| w[1].prevalence_score > w[0].prevalence_score)
    {
        return Err(AppError::Catalog(format!(
            "Bucket '{}': priority {} ('{}', {}) outranks priority {} ('{}', {}) despite lower prevalence",
            bucket,
            pair[0].verification_priority,
            pair[0].template,
            pair[0].prevalence_score,
            pair[1].verification_priority,
            pair[1].template,
            pair[1].prevalence_score
        )));
    }

    Ok(patterns)
}
