//! # Email Prospector CLI
//!
//! Command-line interface for the Email Prospector library (`email_prospector_core`).
//! This binary parses arguments, sets up configuration, initializes the enricher,
//! processes leads (either single or from a file), and handles output.

use email_prospector_core::{
    enrich_single_lead, estimate_verification_cost, estimate_verification_time,
    initialize_enricher, load_catalog, process_leads, Bucket, Candidate, CompanySize, Config,
    ConfigBuilder, EnrichmentResult, Lead, LeadEnricher, PatternCatalog, ProgressEvent,
    ProgressObserver, RateGateSettings, VerificationStatus,
};

// Dependencies specific to the CLI binary
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Finds the most likely professional email address for each lead.",
    long_about = "Email Prospector ranks address patterns by company size, then confirms candidates one at a time against the MailTester Ninja API, stopping at the first valid address to save credits."
)]
struct AppArgs {
    /// Path to the input JSON file containing leads (required in file mode).
    #[arg(short, long, default_value = "input.json", env = "EMAIL_PROSPECTOR_INPUT")]
    input: String,

    /// Path to the output JSON file where results will be saved.
    #[arg(
        short,
        long,
        default_value = "results.json",
        env = "EMAIL_PROSPECTOR_OUTPUT"
    )]
    output: String,

    /// Full name of the person (enables single lead mode). Split on whitespace.
    #[arg(long, env = "EMAIL_PROSPECTOR_NAME", conflicts_with_all = ["first_name", "last_name"])]
    name: Option<String>,

    /// First name of the person (enables single lead mode). Requires --last-name.
    #[arg(long, env = "EMAIL_PROSPECTOR_FIRST_NAME", requires = "last_name")]
    first_name: Option<String>,

    /// Last name of the person. Requires --first-name.
    #[arg(long, env = "EMAIL_PROSPECTOR_LAST_NAME", requires = "first_name")]
    last_name: Option<String>,

    /// Company domain or website URL (single lead mode).
    #[arg(long, env = "EMAIL_PROSPECTOR_DOMAIN")]
    domain: Option<String>,

    /// Company size: a head count ("7500") or a label ("51-200", "enterprise").
    #[arg(long, env = "EMAIL_PROSPECTOR_COMPANY_SIZE")]
    company_size: Option<String>,

    /// Output results to standard output instead of a file (only in single lead mode).
    #[arg(long, default_value = "false", env = "EMAIL_PROSPECTOR_STDOUT")]
    stdout: bool,

    /// Only generate and rank candidates; no provider calls, no API key needed.
    #[arg(long, default_value = "false")]
    generate_only: bool,

    /// Path to a configuration file (TOML format) to load settings from. CLI args override file settings.
    #[arg(long, env = "EMAIL_PROSPECTOR_CONFIG")]
    config_file: Option<String>,

    /// MailTester Ninja API key.
    #[arg(long, env = "MAIL_TESTER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Verification endpoint URL.
    #[arg(long, env = "EMAIL_PROSPECTOR_API_URL")]
    api_url: Option<String>,

    /// HTTP request timeout in seconds.
    #[arg(long, env = "EMAIL_PROSPECTOR_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// User agent string for provider requests.
    #[arg(long, env = "EMAIL_PROSPECTOR_USER_AGENT")]
    user_agent: Option<String>,

    /// Maximum provider calls per rate window.
    #[arg(long, env = "EMAIL_PROSPECTOR_RATE_CEILING")]
    rate_ceiling: Option<usize>,

    /// Length of the rate window in milliseconds.
    #[arg(long, env = "EMAIL_PROSPECTOR_RATE_WINDOW_MS")]
    rate_window_ms: Option<u64>,

    /// Minimum spacing between provider calls in milliseconds.
    #[arg(long, env = "EMAIL_PROSPECTOR_MIN_SPACING_MS")]
    min_spacing_ms: Option<u64>,

    /// Extra wait after a full window in milliseconds.
    #[arg(long, env = "EMAIL_PROSPECTOR_SAFETY_BUFFER_MS")]
    safety_buffer_ms: Option<u64>,

    /// Longest wait for a rate slot in seconds (0 waits forever).
    #[arg(long, env = "EMAIL_PROSPECTOR_ACQUIRE_TIMEOUT")]
    acquire_timeout: Option<u64>,

    /// Maximum number of leads processed concurrently.
    #[arg(short, long, env = "EMAIL_PROSPECTOR_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Bucket used when the company size cannot be interpreted.
    #[arg(long, env = "EMAIL_PROSPECTOR_DEFAULT_BUCKET", value_parser = parse_bucket)]
    default_bucket: Option<Bucket>,

    /// Verify at most this many candidates per lead.
    #[arg(long, env = "EMAIL_PROSPECTOR_MAX_CANDIDATES")]
    max_candidates: Option<usize>,

    /// Stop on a catch-all answer and skip known catch-all domains.
    #[arg(long, action = clap::ArgAction::SetTrue, env = "EMAIL_PROSPECTOR_STOP_ON_CATCH_ALL")]
    stop_on_catch_all: Option<bool>,

    /// Path to a custom pattern catalog (TOML).
    #[arg(long, env = "EMAIL_PROSPECTOR_PATTERN_CATALOG")]
    pattern_catalog: Option<String>,

    /// Provider cost per verification, for estimates.
    #[arg(long, env = "EMAIL_PROSPECTOR_COST_PER_VERIFICATION")]
    cost_per_verification: Option<f64>,
}

impl AppArgs {
    fn is_single_mode(&self) -> bool {
        self.name.is_some() || self.first_name.is_some()
    }

    fn single_lead(&self) -> Result<Lead> {
        let (first_name, last_name) = match (&self.name, &self.first_name, &self.last_name) {
            (Some(name), _, _) => {
                let name_parts: Vec<&str> = name.split_whitespace().collect();
                match (name_parts.first(), name_parts.last()) {
                    (Some(first), Some(last)) if name_parts.len() >= 2 => {
                        (first.to_string(), last.to_string())
                    }
                    _ => {
                        return Err(anyhow::anyhow!(
                            "--name needs a first and a last name, got '{}'",
                            name
                        ))
                    }
                }
            }
            (None, Some(first), Some(last)) => (first.clone(), last.clone()),
            _ => return Err(anyhow::anyhow!("Single lead mode needs --name or --first-name/--last-name")),
        };
        let domain = self
            .domain
            .clone()
            .context("Single lead mode needs --domain")?;
        Ok(Lead::new(
            first_name,
            last_name,
            domain,
            self.company_size.as_deref().map(parse_company_size),
        ))
    }
}

fn parse_bucket(value: &str) -> std::result::Result<Bucket, String> {
    Bucket::from_label(value.trim()).ok_or_else(|| {
        format!(
            "unknown bucket '{}', expected one of: {}",
            value,
            Bucket::ALL.map(|b| b.label()).join(", ")
        )
    })
}

fn parse_company_size(value: &str) -> CompanySize {
    match value.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => CompanySize::Count(n),
        _ => CompanySize::Label(value.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_thread_names(true)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Setting up tracing subscriber failed")?;

    tracing::info!(
        "Email Prospector CLI v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let args = AppArgs::parse();
    tracing::debug!(
        "Parsed CLI arguments: input={}, output={}, single={}, generate_only={}",
        args.input,
        args.output,
        args.is_single_mode(),
        args.generate_only
    );

    let config = match build_config(&args) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            return Err(anyhow::anyhow!("Failed to build configuration: {}", e));
        }
    };
    tracing::debug!("Effective configuration loaded: {:?}", *config);

    let start_time = Instant::now();

    if args.generate_only {
        let catalog = load_catalog(&config).context("Failed to load pattern catalog")?;
        return process_generate_only(&config, &catalog, &args);
    }

    let enricher = match initialize_enricher(&config).await {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Initialization error: {}", e);
            if !config.has_api_key() {
                tracing::error!("Set MAIL_TESTER_API_KEY or [provider].api_key, or use --generate-only.");
            }
            return Err(anyhow::anyhow!("Failed to initialize enricher: {}", e));
        }
    };

    let is_cli_mode = args.is_single_mode();
    let execution_result = if is_cli_mode {
        process_cli_mode(&config, &enricher, &args).await
    } else {
        process_file_mode(config.clone(), enricher, &args, start_time).await
    };

    if let Err(e) = execution_result {
        tracing::error!("Execution failed: {:#}", e);
        return Err(e);
    }

    if !is_cli_mode {
        tracing::info!(
            "Processing finished successfully. Total duration: {:.2?}",
            start_time.elapsed()
        );
    }

    Ok(())
}

fn build_config(args: &AppArgs) -> email_prospector_core::Result<Config> {
    let mut config_builder = ConfigBuilder::new();

    if let Some(ref path) = args.config_file {
        config_builder = config_builder.config_file(path);
    }
    if let Some(ref key) = args.api_key {
        config_builder = config_builder.api_key(key);
    }
    if let Some(ref url) = args.api_url {
        config_builder = config_builder.api_url(url);
    }
    if let Some(t) = args.request_timeout {
        config_builder = config_builder.request_timeout(Duration::from_secs(t));
    }
    if let Some(ref ua) = args.user_agent {
        config_builder = config_builder.user_agent(ua);
    }
    if let Some(c) = args.rate_ceiling {
        config_builder = config_builder.rate_ceiling(c);
    }
    if let Some(ms) = args.rate_window_ms {
        config_builder = config_builder.rate_window(Duration::from_millis(ms));
    }
    if let Some(ms) = args.min_spacing_ms {
        config_builder = config_builder.min_spacing(Duration::from_millis(ms));
    }
    if let Some(ms) = args.safety_buffer_ms {
        config_builder = config_builder.window_safety_buffer(Duration::from_millis(ms));
    }
    if let Some(secs) = args.acquire_timeout {
        let timeout = (secs > 0).then(|| Duration::from_secs(secs));
        config_builder = config_builder.acquire_timeout(timeout);
    }
    if let Some(c) = args.concurrency {
        config_builder = config_builder.max_concurrency(c);
    }
    if let Some(bucket) = args.default_bucket {
        config_builder = config_builder.default_bucket(bucket);
    }
    if let Some(n) = args.max_candidates {
        config_builder = config_builder.max_candidates(n);
    }
    if args.stop_on_catch_all == Some(true) {
        config_builder = config_builder.stop_on_catch_all(true);
    }
    if let Some(ref path) = args.pattern_catalog {
        config_builder = config_builder.pattern_catalog_path(path);
    }
    if let Some(cost) = args.cost_per_verification {
        config_builder = config_builder.cost_per_verification(cost);
    }

    config_builder.build()
}

/// Feeds pipeline progress into an `indicatif` bar.
struct ProgressBarObserver {
    pb: ProgressBar,
}

impl ProgressObserver for ProgressBarObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        self.pb.set_message(format!(
            "{} ({}/{}) {}",
            event.lead, event.completed, event.total, event.status
        ));
    }

    fn on_lead_complete(&self, _index: usize, _result: &EnrichmentResult) {
        self.pb.inc(1);
    }
}

async fn process_cli_mode(config: &Config, enricher: &LeadEnricher, args: &AppArgs) -> Result<()> {
    tracing::info!("Running in Single Lead CLI mode.");
    let start_time = Instant::now();
    let lead = args.single_lead()?;

    tracing::info!(
        "Finding email for '{} {}', Domain='{}', Company size={}",
        lead.first_name,
        lead.last_name,
        lead.domain,
        lead.company_size
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );

    let observer = email_prospector_core::TracingObserver;
    let result = enrich_single_lead(enricher, &lead, &observer).await;

    if args.stdout {
        print_cli_results(&result, config);
    } else {
        tracing::info!("Saving result to '{}'...", args.output);
        save_results(&[result], &args.output)?;
        tracing::info!("Result saved successfully to '{}'.", args.output);
    }
    tracing::info!("CLI mode finished. Duration: {:.2?}", start_time.elapsed());
    Ok(())
}

async fn process_file_mode(
    config: Arc<Config>,
    enricher: Arc<LeadEnricher>,
    args: &AppArgs,
    start_time: Instant,
) -> Result<()> {
    tracing::info!(
        "Running in File Processing mode. Input: '{}', Output: '{}'",
        args.input,
        args.output
    );
    prepare_output_path(&args.output)?;

    tracing::info!("Loading leads from '{}'...", args.input);
    let leads = load_leads(&args.input)?;
    let total_records_loaded = leads.len();
    if total_records_loaded == 0 {
        tracing::warn!(
            "Input file '{}' is empty or contains no leads. Saving empty results file.",
            args.input
        );
        save_results(&[], &args.output)?;
        return Ok(());
    }
    tracing::info!("Loaded {} records from input file.", total_records_loaded);

    tracing::info!(
        "Starting enrichment for {} records (Concurrency: {})...",
        total_records_loaded,
        config.max_concurrency
    );
    let pb = ProgressBar::new(total_records_loaded as u64);
    pb.set_style(ProgressStyle::default_bar()
         .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | ETA: {eta} | {msg}")
         .context("Failed to set progress bar template")?
         .progress_chars("=> "));
    pb.set_message("Processing leads...");

    let observer = Arc::new(ProgressBarObserver { pb: pb.clone() });
    let processed_results = process_leads(config.clone(), enricher, leads, observer).await;

    pb.finish_with_message(format!("Processed {} records", processed_results.len()));

    tracing::info!("Saving results to '{}'...", args.output);
    save_results(&processed_results, &args.output)?;
    tracing::info!("Results saved successfully.");

    log_summary(
        &processed_results,
        total_records_loaded,
        start_time.elapsed(),
        config.cost_per_verification,
    );

    Ok(())
}

/// Candidate list for one lead, as written by `--generate-only`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CandidateReport {
    first_name: String,
    last_name: String,
    domain: String,
    bucket: Bucket,
    bucket_defaulted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    candidates: Vec<Candidate>,
}

fn candidate_report(lead: &Lead, catalog: &PatternCatalog, config: &Config) -> CandidateReport {
    let resolution = catalog.resolve(lead.company_size.as_ref());
    let (candidates, error) = match email_prospector_core::generate_deduplicated(lead, catalog) {
        Ok(c) => (
            email_prospector_core::top_candidates(c, config.max_candidates),
            None,
        ),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };
    CandidateReport {
        first_name: lead.first_name.clone(),
        last_name: lead.last_name.clone(),
        domain: lead.domain.clone(),
        bucket: resolution.bucket,
        bucket_defaulted: resolution.defaulted,
        error,
        candidates,
    }
}

fn process_generate_only(config: &Config, catalog: &PatternCatalog, args: &AppArgs) -> Result<()> {
    tracing::info!("Running in generate-only mode; the provider will not be called.");
    let leads = if args.is_single_mode() {
        vec![args.single_lead()?]
    } else {
        load_leads(&args.input)?
    };
    let reports: Vec<CandidateReport> = leads
        .iter()
        .map(|lead| candidate_report(lead, catalog, config))
        .collect();
    let worst_case: usize = reports.iter().map(|r| r.candidates.len()).sum();

    if args.is_single_mode() && args.stdout {
        print_candidate_report(&reports[0]);
    } else {
        prepare_output_path(&args.output)?;
        write_json(&reports, &args.output)?;
        tracing::info!("Candidate lists saved to '{}'.", args.output);
    }

    let settings = RateGateSettings::from_config(config);
    tracing::info!(
        "Worst case: {} verifications, ~{:.1?} at the configured rate, ~${:.3} in credits.",
        worst_case,
        estimate_verification_time(&settings, worst_case),
        estimate_verification_cost(worst_case, config.cost_per_verification)
    );
    Ok(())
}

fn prepare_output_path(output: &str) -> Result<()> {
    let output_path = Path::new(output);
    if let Some(parent_dir) = output_path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            tracing::debug!("Creating output directory: {}", parent_dir.display());
            std::fs::create_dir_all(parent_dir).with_context(|| {
                format!(
                    "Failed to create output directory '{}'",
                    parent_dir.display()
                )
            })?;
        }
    }
    File::create(output)
        .with_context(|| format!("Cannot write to output file '{}'. Check permissions.", output))?;
    tracing::debug!("Output path '{}' seems writable.", output);
    Ok(())
}

fn load_leads(file_path: &str) -> Result<Vec<Lead>> {
    let input_path = Path::new(file_path);
    if !input_path.exists() || !input_path.is_file() {
        return Err(anyhow::anyhow!(
            "Input file not found or is not a file: {}",
            file_path
        ));
    }
    tracing::debug!("Opening input file: {}", file_path);
    let file = File::open(file_path)
        .with_context(|| format!("Failed to open input file '{}'", file_path))?;
    let reader = BufReader::new(file);

    tracing::debug!("Parsing JSON from file: {}", file_path);
    let records: Vec<Lead> = serde_json::from_reader(reader).with_context(|| {
        format!(
            "Failed to parse JSON from '{}'. Ensure it's an array of lead objects.",
            file_path
        )
    })?;

    Ok(records)
}

/// Saves the processed results to the specified JSON file.
fn save_results(results: &[EnrichmentResult], file_path: &str) -> Result<()> {
    write_json(results, file_path)
}

/// Uses `serde_json` with pretty printing for human readability.
fn write_json<T: Serialize + ?Sized>(value: &T, file_path: &str) -> Result<()> {
    tracing::debug!("Creating output file: {}", file_path);
    let file = File::create(file_path)
        .with_context(|| format!("Failed to create/truncate output file '{}'", file_path))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, value)
        .with_context(|| format!("Failed to serialize results to JSON for '{}'", file_path))?;

    Ok(())
}

/// Logs a summary of the processing results to the console using `tracing::info`.
fn log_summary(
    processed_results: &[EnrichmentResult],
    original_total: usize,
    duration: Duration,
    cost_per_verification: f64,
) {
    let mut per_status: BTreeMap<&'static str, usize> = BTreeMap::new();
    for result in processed_results {
        *per_status.entry(result.status.as_str()).or_default() += 1;
    }
    let total_attempts: usize = processed_results.iter().map(|r| r.attempts).sum();
    let defaulted = processed_results
        .iter()
        .filter(|r| r.bucket_defaulted)
        .count();

    tracing::info!("-------------------- Processing Summary --------------------");
    tracing::info!("Total Records in Input File : {}", original_total);
    tracing::info!("Records Processed           : {}", processed_results.len());
    for status in [
        VerificationStatus::Valid,
        VerificationStatus::Invalid,
        VerificationStatus::CatchAll,
        VerificationStatus::Unverifiable,
        VerificationStatus::Error,
    ] {
        tracing::info!(
            "  - {:<24}: {}",
            status.as_str(),
            per_status.get(status.as_str()).copied().unwrap_or(0)
        );
    }
    tracing::info!("Size Fell Back To Default   : {}", defaulted);
    tracing::info!("Provider Calls              : {}", total_attempts);
    tracing::info!(
        "Estimated Credit Spend      : ${:.3}",
        estimate_verification_cost(total_attempts, cost_per_verification)
    );
    tracing::info!("Total Time Taken            : {:.2?}", duration);
    if duration.as_secs_f64() > 0.01 && !processed_results.is_empty() {
        let rate = (processed_results.len() as f64) / duration.as_secs_f64();
        tracing::info!("Processing Rate             : {:.2} records/sec", rate);
    }
    tracing::info!("----------------------------------------------------------");
}

const BLUE: &str = "\x1b[34m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Prints results for a single lead to standard output (CLI mode).
fn print_cli_results(result: &EnrichmentResult, config: &Config) {
    println!("\n{BLUE}===== Email Prospector Results ====={RESET}");
    println!("Name:   {} {}", result.first_name, result.last_name);
    println!("Domain: {}", result.domain);
    if let Some(bucket) = result.bucket {
        let note = if result.bucket_defaulted {
            " (size not recognised, default bucket)"
        } else {
            ""
        };
        println!("Bucket: {}{}", bucket, note);
    }

    match result.status {
        VerificationStatus::Valid => {
            println!("\n{GREEN}Status: VALID{RESET}");
            if let Some(ref email) = result.email {
                println!("Email:    {GREEN}{}{RESET}", email);
            }
        }
        VerificationStatus::CatchAll => {
            println!("\n{YELLOW}Status: CATCH-ALL{RESET}");
            println!("Reason: The domain accepts every address; no address can be confirmed.");
        }
        VerificationStatus::Invalid | VerificationStatus::Unverifiable => {
            println!("\n{YELLOW}Status: NO EMAIL FOUND ({}){RESET}", result.status);
        }
        VerificationStatus::Error => {
            println!("\n{RED}Status: ERROR{RESET}");
        }
    }
    println!("Message:  {}", result.message);
    if let Some(ref pattern) = result.pattern {
        println!(
            "Pattern:  {} (priority {}, prevalence {:.1})",
            pattern,
            result.verification_priority.unwrap_or(0),
            result.prevalence_score.unwrap_or(0.0)
        );
    }
    println!(
        "Attempts: {} (~${:.3})",
        result.attempts,
        estimate_verification_cost(result.attempts, config.cost_per_verification)
    );

    println!("{BLUE}=================================={RESET}\n");
}

/// Prints the ranked candidate list of one lead (generate-only mode).
fn print_candidate_report(report: &CandidateReport) {
    println!("\n{BLUE}===== Candidate Addresses ====={RESET}");
    println!("Name:   {} {}", report.first_name, report.last_name);
    println!("Domain: {}", report.domain);
    println!(
        "Bucket: {}{}",
        report.bucket,
        if report.bucket_defaulted { " (default)" } else { "" }
    );
    if let Some(ref error) = report.error {
        println!("\n{RED}Error: {}{RESET}", error);
    }
    for candidate in &report.candidates {
        println!(
            "{:>3}. {:<40} {:<16} {:>5.1}",
            candidate.verification_priority,
            candidate.email,
            candidate.source_pattern,
            candidate.prevalence_score
        );
    }
    println!("{BLUE}=============================={RESET}\n");
}
