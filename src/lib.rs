//! # Email Prospector Core Library
//!
//! This crate finds the most likely professional email address for a person at a
//! company. It expands statistically ranked address templates for the company's size
//! into concrete candidates, then confirms them one by one against a verification
//! provider, stopping at the first address the provider accepts.
//!
//! It is designed to be used either directly as a library or via the `email-prospector`
//! command-line tool (which uses this library).

mod core;
mod utils;
mod verification;

pub use crate::core::catalog::{PatternCatalog, PATTERNS_PER_BUCKET};
pub use crate::core::config::{Config, ConfigBuilder, ConfigFile, DEFAULT_API_URL};
pub use crate::core::error::{AppError, Result};
pub use crate::core::models::{
    Bucket, BucketResolution, Candidate, CompanySize, EmailPattern, EnrichmentResult, Lead,
    ProgressEvent, ProviderCode, ProviderResponse, VerificationResult, VerificationStatus,
};
pub use crate::core::pipeline::{
    estimate_verification_cost, estimate_verification_time, LeadEnricher,
};
pub use crate::core::progress::{
    ChannelObserver, NoopObserver, ProgressObserver, ProgressUpdate, TracingObserver,
};
pub use crate::core::rate_gate::{Grant, RateGate, RateGateSettings, RateGateStatus};
pub use crate::utils::domain::normalize_domain;
pub use crate::utils::patterns::{
    deduplicate, extract_name_parts, generate_candidates, generate_deduplicated, normalize_lead,
    normalize_name, top_candidates, ExtractedParts, NormalizedLead,
};
pub use crate::verification::api::{map_provider_status, parse_provider_body};
pub use crate::verification::{
    EarlyStopOutcome, EarlyStopVerifier, EmailVerifier, MailTesterClient,
};

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;

/// Loads the pattern catalog named by the configuration, or the built-in one.
pub fn load_catalog(config: &Config) -> Result<PatternCatalog> {
    let catalog = match config.pattern_catalog_path {
        Some(ref path) => PatternCatalog::load(path)?,
        None => PatternCatalog::embedded()?,
    };
    Ok(catalog.with_default_bucket(config.default_bucket))
}

/// Initializes the shared resources (catalog, rate gate, HTTP client) and returns the
/// enricher that every lead of a run should share.
///
/// Must be called inside a tokio runtime; the rate gate spawns its worker task here.
pub async fn initialize_enricher(config: &Config) -> Result<LeadEnricher> {
    let client = MailTesterClient::new(config)?;
    tracing::debug!("Verification client initialized.");
    initialize_enricher_with(config, Arc::new(client)).await
}

/// Like [`initialize_enricher`] but with a caller-supplied verifier.
pub async fn initialize_enricher_with(
    config: &Config,
    verifier: Arc<dyn EmailVerifier>,
) -> Result<LeadEnricher> {
    tracing::debug!("Initializing enricher components...");
    let catalog = load_catalog(config)?;
    let gate = RateGate::new(RateGateSettings::from_config(config));
    tracing::debug!("Rate gate initialized.");

    tracing::info!(
        "Enricher initialized (catalog v{}, {} calls per {:?}).",
        catalog.version(),
        config.rate_ceiling,
        config.rate_window
    );
    Ok(LeadEnricher::new(config, catalog, gate, verifier))
}

/// Processes a single lead.
///
/// Never fails: validation problems, gate timeouts and provider errors come back as an
/// `EnrichmentResult` with `status = error`.
pub async fn enrich_single_lead(
    enricher: &LeadEnricher,
    lead: &Lead,
    observer: &dyn ProgressObserver,
) -> EnrichmentResult {
    let result = enricher.enrich(lead, observer).await;
    observer.on_lead_complete(0, &result);
    result
}

/// Processes a batch of leads with at most `config.max_concurrency` in flight.
///
/// All leads share the enricher's rate gate. The output has one record per input lead,
/// in input order, whatever the completion order was.
pub async fn process_leads(
    config: Arc<Config>,
    enricher: Arc<LeadEnricher>,
    leads: Vec<Lead>,
    observer: Arc<dyn ProgressObserver>,
) -> Vec<EnrichmentResult> {
    let total_records = leads.len();
    if total_records == 0 {
        return Vec::new();
    }
    tracing::info!(target: "process_leads", "Processing {} leads with concurrency {}",
        total_records, config.max_concurrency);

    let mut tasks = FuturesUnordered::new();
    let mut results: Vec<Option<EnrichmentResult>> = vec![None; total_records];

    for (index, lead) in leads.iter().enumerate() {
        while tasks.len() >= config.max_concurrency.max(1) {
            match tasks.next().await {
                Some(joined) => store_result(&mut results, joined),
                None => {
                    tracing::warn!(target: "process_leads", "Task queue unexpectedly empty while limiting concurrency.");
                    break;
                }
            }
        }

        let enricher_clone = Arc::clone(&enricher);
        let observer_clone = Arc::clone(&observer);
        let lead = lead.clone();

        tasks.push(tokio::spawn(async move {
            let result = enricher_clone.enrich(&lead, observer_clone.as_ref()).await;
            observer_clone.on_lead_complete(index, &result);
            (index, result)
        }));
    }

    while let Some(joined) = tasks.next().await {
        store_result(&mut results, joined);
    }

    results
        .into_iter()
        .zip(leads.iter())
        .enumerate()
        .map(|(index, (slot, lead))| {
            slot.unwrap_or_else(|| {
                let result = EnrichmentResult::error(lead, "Processing task failed before completion");
                observer.on_lead_complete(index, &result);
                result
            })
        })
        .collect()
}

fn store_result(
    results: &mut [Option<EnrichmentResult>],
    joined: std::result::Result<(usize, EnrichmentResult), tokio::task::JoinError>,
) {
    match joined {
        Ok((index, result)) => results[index] = Some(result),
        Err(e) => {
            tracing::error!(target: "process_leads", "A processing task failed to join: {}", e);
        }
    }
}
