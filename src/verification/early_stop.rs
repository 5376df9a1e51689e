//! Drives a lead's candidates through the rate gate and the provider, stopping at the
//! first confirmed address.

use super::api::EmailVerifier;
use crate::core::models::{ProgressEvent, VerificationResult, VerificationStatus};
use crate::core::progress::ProgressObserver;
use crate::core::rate_gate::RateGate;

use std::sync::Arc;

/// What `verify_until_valid` settled on, plus the provider calls it spent.
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyStopOutcome {
    pub result: VerificationResult,
    pub attempts: usize,
}

#[derive(Clone)]
pub struct EarlyStopVerifier {
    gate: RateGate,
    verifier: Arc<dyn EmailVerifier>,
    stop_on_catch_all: bool,
}

impl EarlyStopVerifier {
    pub fn new(gate: RateGate, verifier: Arc<dyn EmailVerifier>) -> Self {
        Self {
            gate,
            verifier,
            stop_on_catch_all: false,
        }
    }

    /// Also stop on a `catch-all` answer: every further address on the domain would get
    /// the same answer.
    pub fn stop_on_catch_all(mut self, enable: bool) -> Self {
        self.stop_on_catch_all = enable;
        self
    }

    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    /// Verifies `candidates` in order until one comes back `valid`.
    ///
    /// Returns the valid result, or the last result when none is valid. An empty list
    /// yields an `error` result without touching the provider. A gate timeout or a
    /// closed gate ends the lead with an `error` result; no candidate is retried.
    pub async fn verify_until_valid(
        &self,
        lead_label: &str,
        candidates: &[String],
        observer: &dyn ProgressObserver,
    ) -> EarlyStopOutcome {
        let total = candidates.len();
        let mut last: Option<VerificationResult> = None;
        let mut attempts = 0;

        for (i, email) in candidates.iter().enumerate() {
            if let Err(e) = self.gate.acquire().await {
                tracing::warn!(target: "enrich_lead", "[{}] Stopping before {}: {}", lead_label, email, e);
                return EarlyStopOutcome {
                    result: VerificationResult::error(email.as_str(), e.to_string()),
                    attempts,
                };
            }

            let result = self.verifier.verify(email).await;
            attempts += 1;
            observer.on_progress(&ProgressEvent {
                lead: lead_label.to_string(),
                completed: i + 1,
                total,
                email: email.clone(),
                status: result.status,
            });

            match result.status {
                VerificationStatus::Valid => {
                    tracing::info!(target: "enrich_lead", "[{}] {} confirmed after {} attempt(s)",
                        lead_label, email, attempts);
                    return EarlyStopOutcome { result, attempts };
                }
                VerificationStatus::CatchAll if self.stop_on_catch_all => {
                    tracing::info!(target: "enrich_lead", "[{}] Domain accepts all addresses; stopping after {} attempt(s)",
                        lead_label, attempts);
                    return EarlyStopOutcome { result, attempts };
                }
                status => {
                    tracing::debug!(target: "enrich_lead", "[{}] {} -> {} ({})",
                        lead_label, email, status, result.message);
                }
            }
            last = Some(result);
        }

        let result = last.unwrap_or_else(|| VerificationResult::error("", "No emails to verify"));
        EarlyStopOutcome { result, attempts }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::progress::{ChannelObserver, NoopObserver, ProgressUpdate};
    use crate::core::rate_gate::RateGateSettings;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Answers from a script keyed by address; unknown addresses are `invalid`.
    #[derive(Default)]
    pub(crate) struct ScriptedVerifier {
        answers: HashMap<String, (&'static str, &'static str)>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl ScriptedVerifier {
        pub(crate) fn answer(mut self, email: &str, code: &'static str, message: &'static str) -> Self {
            self.answers.insert(email.to_string(), (code, message));
            self
        }
    }

    #[async_trait]
    impl EmailVerifier for ScriptedVerifier {
        async fn verify(&self, email: &str) -> VerificationResult {
            self.calls.lock().push(email.to_string());
            let (code, message) = self.answers.get(email).copied().unwrap_or(("ko", "Rejected"));
            let body = format!(
                r#"{{"email":"{}","user":"","domain":"","mx":"mx.test","code":"{}","message":"{}","connections":1}}"#,
                email, code, message
            );
            crate::verification::api::parse_provider_body(email, &body)
        }
    }

    fn fast_gate() -> RateGate {
        RateGate::new(RateGateSettings {
            min_spacing: Duration::ZERO,
            ..RateGateSettings::default()
        })
    }

    fn emails(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_invalid_then_valid_makes_four_calls() {
        let verifier = Arc::new(ScriptedVerifier::default().answer("d@x.com", "ok", "Accepted"));
        let early = EarlyStopVerifier::new(fast_gate(), verifier.clone());
        let (observer, mut rx) = ChannelObserver::channel();

        let outcome = early
            .verify_until_valid(
                "lead",
                &emails(&["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com"]),
                &observer,
            )
            .await;

        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.result.email, "d@x.com");
        assert_eq!(outcome.result.status, VerificationStatus::Valid);
        assert_eq!(verifier.calls.lock().len(), 4);

        drop(observer);
        let mut completed = Vec::new();
        while let Some(ProgressUpdate::Candidate(event)) = rx.recv().await {
            assert_eq!(event.total, 5);
            completed.push(event.completed);
        }
        assert_eq!(completed, vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_list_returns_last_result() {
        let verifier = Arc::new(ScriptedVerifier::default().answer("b@x.com", "mb", "Timeout"));
        let early = EarlyStopVerifier::new(fast_gate(), verifier.clone());

        let outcome = early
            .verify_until_valid("lead", &emails(&["a@x.com", "b@x.com"]), &NoopObserver)
            .await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result.email, "b@x.com");
        assert_eq!(outcome.result.status, VerificationStatus::Unverifiable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_list_is_error_without_calls() {
        let verifier = Arc::new(ScriptedVerifier::default());
        let early = EarlyStopVerifier::new(fast_gate(), verifier.clone());

        let outcome = early.verify_until_valid("lead", &[], &NoopObserver).await;
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.result.status, VerificationStatus::Error);
        assert_eq!(outcome.result.message, "No emails to verify");
        assert!(verifier.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_all_stops_only_when_enabled() {
        let list = emails(&["a@x.com", "b@x.com", "c@x.com"]);
        let verifier = Arc::new(ScriptedVerifier::default().answer("a@x.com", "ok", "Catch-All"));

        let outcome = EarlyStopVerifier::new(fast_gate(), verifier.clone())
            .verify_until_valid("lead", &list, &NoopObserver)
            .await;
        assert_eq!(outcome.attempts, 3);

        let outcome = EarlyStopVerifier::new(fast_gate(), verifier.clone())
            .stop_on_catch_all(true)
            .verify_until_valid("lead", &list, &NoopObserver)
            .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.status, VerificationStatus::CatchAll);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_timeout_is_terminal() {
        let gate = RateGate::new(RateGateSettings {
            ceiling: 1,
            window: Duration::from_secs(60),
            min_spacing: Duration::ZERO,
            safety_buffer: Duration::ZERO,
            acquire_timeout: Some(Duration::from_secs(5)),
        });
        let verifier = Arc::new(ScriptedVerifier::default());
        let early = EarlyStopVerifier::new(gate, verifier.clone());

        let outcome = early
            .verify_until_valid("lead", &emails(&["a@x.com", "b@x.com", "c@x.com"]), &NoopObserver)
            .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.status, VerificationStatus::Error);
        assert_eq!(outcome.result.email, "b@x.com");
        assert_eq!(*verifier.calls.lock(), vec!["a@x.com".to_string()]);
    }
}
