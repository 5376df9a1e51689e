//! Per-lead orchestration: bucket resolution, candidate generation and early-stop
//! verification, folded into one `EnrichmentResult`.

use crate::core::catalog::PatternCatalog;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::models::{
    BucketResolution, Candidate, EnrichmentResult, Lead, VerificationResult, VerificationStatus,
};
use crate::core::progress::ProgressObserver;
use crate::core::rate_gate::{RateGate, RateGateSettings};
use crate::utils::domain::normalize_domain;
use crate::utils::patterns::{generate_deduplicated, top_candidates};
use crate::verification::{EarlyStopVerifier, EmailVerifier};

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared, cloneable enrichment engine. All clones use the same rate gate and the same
/// catch-all domain cache.
#[derive(Clone)]
pub struct LeadEnricher {
    catalog: Arc<PatternCatalog>,
    verifier: EarlyStopVerifier,
    max_candidates: Option<usize>,
    stop_on_catch_all: bool,
    catch_all_domains: Arc<RwLock<HashSet<String>>>,
}

impl LeadEnricher {
    pub fn new(
        config: &Config,
        catalog: PatternCatalog,
        gate: RateGate,
        verifier: Arc<dyn EmailVerifier>,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            verifier: EarlyStopVerifier::new(gate, verifier)
                .stop_on_catch_all(config.stop_on_catch_all),
            max_candidates: config.max_candidates,
            stop_on_catch_all: config.stop_on_catch_all,
            catch_all_domains: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    pub fn gate(&self) -> &RateGate {
        self.verifier.gate()
    }

    /// The addresses that would be tried for `lead`, in verification order.
    pub fn candidates_for(&self, lead: &Lead) -> Result<Vec<Candidate>> {
        Ok(top_candidates(
            generate_deduplicated(lead, &self.catalog)?,
            self.max_candidates,
        ))
    }

    /// Whether a previous lead found `domain` to accept every address.
    pub fn is_known_catch_all(&self, domain: &str) -> bool {
        self.catch_all_domains
            .read()
            .contains(&normalize_domain(domain))
    }

    /// Runs the whole pipeline for one lead. Never fails: problems end up in the
    /// returned record's `status` and `message`.
    pub async fn enrich(&self, lead: &Lead, observer: &dyn ProgressObserver) -> EnrichmentResult {
        let task_label = lead.task_label();
        let start_time = Instant::now();
        let resolution = self.catalog.resolve(lead.company_size.as_ref());
        tracing::info!(target: "enrich_lead", "[{}] Starting enrichment (bucket {}{})",
            task_label, resolution.bucket, if resolution.defaulted { ", defaulted" } else { "" });

        let candidates = match self.candidates_for(lead) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(target: "enrich_lead", "[{}] Skipping lead: {}", task_label, e);
                return with_resolution(EnrichmentResult::error(lead, e.to_string()), resolution);
            }
        };
        tracing::debug!(target: "enrich_lead", "[{}] {} candidates to verify", task_label, candidates.len());
        tracing::trace!(target: "enrich_lead", "[{}] Candidate list (ordered): {:?}",
            task_label, candidates.iter().map(|c| c.email.as_str()).collect::<Vec<_>>());

        let domain = normalize_domain(&lead.domain);
        if self.stop_on_catch_all && self.catch_all_domains.read().contains(&domain) {
            tracing::info!(target: "enrich_lead", "[{}] Domain already known as catch-all; skipping verification", task_label);
            let cached = VerificationResult {
                email: String::new(),
                status: VerificationStatus::CatchAll,
                message: "Domain previously identified as catch-all; verification skipped"
                    .to_string(),
                mx_host: String::new(),
                raw_provider_payload: None,
            };
            return assemble(lead, resolution, &candidates, cached, 0);
        }

        let emails: Vec<String> = candidates.iter().map(|c| c.email.clone()).collect();
        let outcome = self
            .verifier
            .verify_until_valid(&task_label, &emails, observer)
            .await;

        if self.stop_on_catch_all && outcome.result.status == VerificationStatus::CatchAll {
            self.catch_all_domains.write().insert(domain);
        }

        let result = assemble(lead, resolution, &candidates, outcome.result, outcome.attempts);
        tracing::info!(target: "enrich_lead", "[{}] Finished in {:.2?}: {} ({}), {} attempt(s)",
            task_label, start_time.elapsed(), result.status,
            result.email.as_deref().unwrap_or("no address"), result.attempts);
        result
    }
}

fn with_resolution(mut result: EnrichmentResult, resolution: BucketResolution) -> EnrichmentResult {
    result.bucket = Some(resolution.bucket);
    result.bucket_defaulted = resolution.defaulted;
    result
}

/// Builds the output record, attaching the metadata of the candidate the final result
/// refers to.
fn assemble(
    lead: &Lead,
    resolution: BucketResolution,
    candidates: &[Candidate],
    verification: VerificationResult,
    attempts: usize,
) -> EnrichmentResult {
    let matched = candidates.iter().find(|c| c.email == verification.email);
    let mut result = with_resolution(EnrichmentResult::error(lead, verification.message), resolution);
    result.status = verification.status;
    result.email = (verification.status == VerificationStatus::Valid).then_some(verification.email);
    result.pattern = matched.map(|c| c.source_pattern.clone());
    result.prevalence_score = matched.map(|c| c.prevalence_score);
    result.verification_priority = matched.map(|c| c.verification_priority);
    result.attempts = attempts;
    result
}

/// Wall-clock time the gate needs to grant `count` calls back to back.
pub fn estimate_verification_time(settings: &RateGateSettings, count: usize) -> Duration {
    settings.estimated_duration(count)
}

/// Provider spend for `count` calls.
pub fn estimate_verification_cost(count: usize, cost_per_email: f64) -> f64 {
    count as f64 * cost_per_email
}
