//! Data structures flowing through the enrichment pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Organization-size category used to select a pattern ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bucket {
    #[serde(rename = "1-50")]
    Small,
    #[serde(rename = "51-200")]
    Medium,
    #[serde(rename = "201-500")]
    Large,
    #[serde(rename = "500+")]
    Enterprise,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Small,
        Bucket::Medium,
        Bucket::Large,
        Bucket::Enterprise,
    ];

    /// Canonical label, e.g. `"51-200"`.
    pub fn label(&self) -> &'static str {
        match self {
            Bucket::Small => "1-50",
            Bucket::Medium => "51-200",
            Bucket::Large => "201-500",
            Bucket::Enterprise => "500+",
        }
    }

    /// Exact match against the canonical labels.
    pub fn from_label(label: &str) -> Option<Bucket> {
        Bucket::ALL.into_iter().find(|b| b.label() == label)
    }

    /// Maps an employee count onto a bucket.
    pub fn from_employee_count(count: f64) -> Bucket {
        if count <= 50.0 {
            Bucket::Small
        } else if count <= 200.0 {
            Bucket::Medium
        } else if count <= 500.0 {
            Bucket::Large
        } else {
            Bucket::Enterprise
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Company size as it arrives from upstream: either a head count or a free-form label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompanySize {
    Count(f64),
    Label(String),
}

impl fmt::Display for CompanySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompanySize::Count(n) => write!(f, "{}", n),
            CompanySize::Label(s) => f.write_str(s),
        }
    }
}

impl From<u32> for CompanySize {
    fn from(value: u32) -> Self {
        CompanySize::Count(value as f64)
    }
}

impl From<&str> for CompanySize {
    fn from(value: &str) -> Self {
        CompanySize::Label(value.to_string())
    }
}

/// Input record for one person to enrich.
///
/// Missing name or domain fields deserialize as empty strings so they are reported
/// per lead instead of failing the whole input file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_size: Option<CompanySize>,
}

impl Lead {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        domain: impl Into<String>,
        company_size: Option<CompanySize>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            domain: domain.into(),
            company_size,
        }
    }

    /// Short label used in log lines.
    pub(crate) fn task_label(&self) -> String {
        format!("{} {}@{}", self.first_name, self.last_name, self.domain)
    }
}

/// One entry of a bucket's ranking table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPattern {
    pub rank: u8,
    pub template: String,
    pub prevalence_score: f64,
    #[serde(default)]
    pub cumulative_score: f64,
    pub verification_priority: u8,
}

/// Outcome of mapping a company size onto a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketResolution {
    pub bucket: Bucket,
    /// True when nothing matched and the default bucket was used.
    pub defaulted: bool,
}

/// A concrete address derived from a lead and one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub email: String,
    pub source_pattern: String,
    pub prevalence_score: f64,
    pub verification_priority: u8,
}

/// Canonical verification status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    Valid,
    Invalid,
    CatchAll,
    Unverifiable,
    Error,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Valid => "valid",
            VerificationStatus::Invalid => "invalid",
            VerificationStatus::CatchAll => "catch-all",
            VerificationStatus::Unverifiable => "unverifiable",
            VerificationStatus::Error => "error",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result code reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCode {
    Ok,
    Ko,
    Mb,
    #[serde(other)]
    Unknown,
}

/// Body returned by the verification provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub mx: String,
    pub code: ProviderCode,
    pub message: String,
    #[serde(default)]
    pub connections: u32,
}

/// Outcome of one verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub email: String,
    pub status: VerificationStatus,
    pub message: String,
    pub mx_host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_provider_payload: Option<ProviderResponse>,
}

impl VerificationResult {
    pub fn error(email: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            status: VerificationStatus::Error,
            message: message.into(),
            mx_host: String::new(),
            raw_provider_payload: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == VerificationStatus::Valid
    }
}

/// Final record for one lead, handed back to the job layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    pub first_name: String,
    pub last_name: String,
    pub domain: String,
    pub company_size: Option<CompanySize>,
    /// Set only when `status` is `valid`.
    pub email: Option<String>,
    pub status: VerificationStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevalence_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<Bucket>,
    #[serde(default)]
    pub bucket_defaulted: bool,
    /// Provider calls spent on this lead.
    #[serde(default)]
    pub attempts: usize,
}

impl EnrichmentResult {
    pub(crate) fn error(lead: &Lead, message: impl Into<String>) -> Self {
        Self {
            first_name: lead.first_name.clone(),
            last_name: lead.last_name.clone(),
            domain: lead.domain.clone(),
            company_size: lead.company_size.clone(),
            email: None,
            status: VerificationStatus::Error,
            message: message.into(),
            pattern: None,
            prevalence_score: None,
            verification_priority: None,
            bucket: None,
            bucket_defaulted: false,
            attempts: 0,
        }
    }
}

/// Per-candidate progress notification. Carries no control semantics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Label of the lead being processed.
    pub lead: String,
    pub completed: usize,
    pub total: usize,
    pub email: String,
    pub status: VerificationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_size_deserializes_number_or_label() {
        let lead: Lead = serde_json::from_str(
            r#"{"firstName":"John","lastName":"Doe","domain":"example.com","companySize":7500}"#,
        )
        .unwrap();
        assert_eq!(lead.company_size, Some(CompanySize::Count(7500.0)));

        let lead: Lead = serde_json::from_str(
            r#"{"firstName":"John","lastName":"Doe","domain":"example.com","companySize":"51-200"}"#,
        )
        .unwrap();
        assert_eq!(lead.company_size, Some(CompanySize::Label("51-200".into())));
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let lead: Lead = serde_json::from_str(r#"{"firstName":"John"}"#).unwrap();
        assert_eq!(lead.last_name, "");
        assert_eq!(lead.domain, "");
        assert!(lead.company_size.is_none());
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&VerificationStatus::CatchAll).unwrap(),
            "\"catch-all\""
        );
        assert_eq!(
            serde_json::to_string(&Bucket::Enterprise).unwrap(),
            "\"500+\""
        );
    }

    #[test]
    fn test_unknown_provider_code() {
        let resp: ProviderResponse =
            serde_json::from_str(r#"{"code":"zz","message":"Odd"}"#).unwrap();
        assert_eq!(resp.code, ProviderCode::Unknown);
    }

    #[test]
    fn test_enrichment_result_keeps_null_email() {
        let lead = Lead::new("a", "b", "c.com", None);
        let json = serde_json::to_value(EnrichmentResult::error(&lead, "boom")).unwrap();
        assert!(json.get("email").unwrap().is_null());
        assert!(json.get("pattern").is_none());
        assert_eq!(json["status"], "error");
    }

    #[test]
    fn test_bucket_thresholds() {
        assert_eq!(Bucket::from_employee_count(50.0), Bucket::Small);
        assert_eq!(Bucket::from_employee_count(51.0), Bucket::Medium);
        assert_eq!(Bucket::from_employee_count(200.0), Bucket::Medium);
        assert_eq!(Bucket::from_employee_count(500.0), Bucket::Large);
        assert_eq!(Bucket::from_employee_count(7500.0), Bucket::Enterprise);
    }
}
