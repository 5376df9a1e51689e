use async_trait::async_trait;
use email_prospector_core::{
    enrich_single_lead, extract_name_parts, initialize_enricher, initialize_enricher_with,
    normalize_lead, process_leads, Bucket, ChannelObserver, CompanySize, Config, EmailVerifier,
    EnrichmentResult, Lead, NoopObserver, ProgressObserver, ProgressUpdate, VerificationResult,
    VerificationStatus,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Accepts only the addresses it was given; records every call.
struct AcceptList {
    valid: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl AcceptList {
    fn new(valid: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            valid: valid.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailVerifier for AcceptList {
    async fn verify(&self, email: &str) -> VerificationResult {
        self.calls.lock().unwrap().push(email.to_string());
        let (status, message) = if self.valid.contains(email) {
            (VerificationStatus::Valid, "Accepted")
        } else {
            (VerificationStatus::Invalid, "Rejected")
        };
        VerificationResult {
            email: email.to_string(),
            status,
            message: message.to_string(),
            mx_host: "mx.test".to_string(),
            raw_provider_payload: None,
        }
    }
}

fn fast_config() -> Config {
    Config {
        api_key: "test-key".to_string(),
        min_spacing: Duration::ZERO,
        max_concurrency: 3,
        ..Config::default()
    }
}

#[tokio::test(start_paused = true)]
async fn john_doe_medium_company_resolves_on_first_call() {
    let verifier = AcceptList::new(&["jdoe@example.com"]);
    let config = fast_config();
    let enricher = initialize_enricher_with(&config, verifier.clone())
        .await
        .unwrap();

    let lead = Lead::new("John", "Doe", "example.com", Some("51-200".into()));
    let candidates = enricher.candidates_for(&lead).unwrap();
    assert_eq!(candidates[0].email, "jdoe@example.com");
    assert_eq!(candidates[0].source_pattern, "{f}{last}");

    let result = enrich_single_lead(&enricher, &lead, &NoopObserver).await;
    assert_eq!(result.email.as_deref(), Some("jdoe@example.com"));
    assert_eq!(result.status, VerificationStatus::Valid);
    assert_eq!(result.pattern.as_deref(), Some("{f}{last}"));
    assert_eq!(result.verification_priority, Some(1));
    assert_eq!(result.attempts, 1);
    assert_eq!(verifier.calls(), vec!["jdoe@example.com".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn large_head_count_uses_enterprise_ranking() {
    let config = fast_config();
    let enricher = initialize_enricher_with(&config, AcceptList::new(&[]))
        .await
        .unwrap();
    let lead = Lead::new("John", "Doe", "example.com", Some(CompanySize::Count(7500.0)));

    let resolution = enricher.catalog().resolve(lead.company_size.as_ref());
    assert_eq!(resolution.bucket, Bucket::Enterprise);
    assert!(!resolution.defaulted);
    assert_eq!(
        enricher.candidates_for(&lead).unwrap()[0].email,
        "john.doe@example.com"
    );
}

#[tokio::test(start_paused = true)]
async fn every_candidate_reverses_to_the_lead() {
    let config = fast_config();
    let enricher = initialize_enricher_with(&config, AcceptList::new(&[]))
        .await
        .unwrap();
    let lead = Lead::new("Mary-Jane", "O'Neil", "https://www.Example.org/team", Some(CompanySize::Count(300.0)));
    let normalized = normalize_lead(&lead).unwrap();

    let candidates = enricher.candidates_for(&lead).unwrap();
    assert!(!candidates.is_empty() && candidates.len() <= 32);
    for candidate in &candidates {
        let parses = extract_name_parts(&candidate.source_pattern, &candidate.email);
        assert!(
            parses
                .iter()
                .any(|p| p.agrees_with(&normalized.first, &normalized.last, &normalized.domain)),
            "{} did not reverse via {}",
            candidate.email,
            candidate.source_pattern
        );
    }
}

#[tokio::test(start_paused = true)]
async fn batch_keeps_input_order_and_isolates_failures() {
    let verifier = AcceptList::new(&["ann.lee@alpha.io", "bob@beta.io"]);
    let config = Arc::new(fast_config());
    let enricher = Arc::new(
        initialize_enricher_with(&config, verifier.clone())
            .await
            .unwrap(),
    );
    let leads = vec![
        Lead::new("Ann", "Lee", "alpha.io", Some(CompanySize::Count(1000.0))),
        Lead::new("", "", "", None),
        Lead::new("Bob", "Stone", "beta.io", Some("1-50".into())),
        Lead::new("Cy", "Twombly", "gamma.io", Some("a few".into())),
    ];

    let (observer, mut rx) = ChannelObserver::channel();
    let observer: Arc<dyn ProgressObserver> = Arc::new(observer);
    let results = process_leads(config.clone(), enricher, leads, observer).await;

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].email.as_deref(), Some("ann.lee@alpha.io"));
    assert_eq!(results[1].status, VerificationStatus::Error);
    assert_eq!(results[1].attempts, 0);
    assert_eq!(results[2].email.as_deref(), Some("bob@beta.io"));
    assert_eq!(results[2].bucket, Some(Bucket::Small));
    assert_eq!(results[3].status, VerificationStatus::Invalid);
    assert!(results[3].bucket_defaulted);
    assert_eq!(results[3].attempts, 32);

    let mut completed = Vec::new();
    while let Ok(update) = rx.try_recv() {
        if let ProgressUpdate::LeadComplete { index, result } = update {
            assert_eq!(result, results[index]);
            completed.push(index);
        }
    }
    completed.sort_unstable();
    assert_eq!(completed, vec![0, 1, 2, 3]);

    let total_calls: usize = results.iter().map(|r: &EnrichmentResult| r.attempts).sum();
    assert_eq!(verifier.calls().len(), total_calls);
}

#[tokio::test]
async fn empty_batch_returns_nothing() {
    let config = Arc::new(fast_config());
    let enricher = Arc::new(
        initialize_enricher_with(&config, AcceptList::new(&[]))
            .await
            .unwrap(),
    );
    let results = process_leads(config, enricher, Vec::new(), Arc::new(NoopObserver)).await;
    assert!(results.is_empty());
}

/// Minimal provider stand-in: answers `ok/Accepted` for `accepted`, `ko/Rejected`
/// for everything else, one connection per request.
async fn spawn_provider(accepted: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let seen = Arc::clone(&seen_clone);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf).into_owned();
                let request_line = request.lines().next().unwrap_or_default().to_string();
                seen.lock().unwrap().push(request_line.clone());

                let asked = format!("email={}", accepted.replace('@', "%40"));
                let (code, message) = if request_line.contains(&asked) {
                    ("ok", "Accepted")
                } else {
                    ("ko", "Rejected")
                };
                let body = format!(
                    r#"{{"email":"","user":"","domain":"","mx":"mx.canned.test","code":"{}","message":"{}","connections":1}}"#,
                    code, message
                );
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}/ninja", addr), seen)
}

#[tokio::test]
async fn http_client_drives_pipeline_end_to_end() {
    let (api_url, seen) = spawn_provider("john.doe@example.com").await;
    let config = Config {
        api_url,
        max_candidates: Some(5),
        ..fast_config()
    };
    let enricher = initialize_enricher(&config).await.unwrap();

    // 51-200 ranks {f}{last} first and {first}.{last} second.
    let lead = Lead::new("John", "Doe", "example.com", Some("51-200".into()));
    let result = enrich_single_lead(&enricher, &lead, &NoopObserver).await;

    assert_eq!(result.status, VerificationStatus::Valid);
    assert_eq!(result.email.as_deref(), Some("john.doe@example.com"));
    assert_eq!(result.pattern.as_deref(), Some("{first}.{last}"));
    assert_eq!(result.verification_priority, Some(2));
    assert_eq!(result.attempts, 2);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].contains("email=jdoe%40example.com"));
    assert!(seen.iter().all(|line| line.contains("key=test-key")));
}

#[tokio::test]
async fn missing_api_key_fails_initialization() {
    let config = Config::default();
    assert!(initialize_enricher(&config).await.is_err());
}
