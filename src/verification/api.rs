//! HTTP client for the MailTester Ninja verification API.

use crate::core::config::Config;
use crate::core::error::{AppError, Result};
use crate::core::models::{ProviderCode, ProviderResponse, VerificationResult, VerificationStatus};

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Verifies a single address. Implementations never fail: transport and provider
/// problems come back as a result with `status = error`.
#[async_trait]
pub trait EmailVerifier: Send + Sync {
    async fn verify(&self, email: &str) -> VerificationResult;
}

/// Maps the provider's `code`/`message` pair to a canonical status.
pub fn map_provider_status(code: ProviderCode, message: &str) -> VerificationStatus {
    match code {
        ProviderCode::Ok if message == "Catch-All" => VerificationStatus::CatchAll,
        ProviderCode::Ok => VerificationStatus::Valid,
        ProviderCode::Ko => VerificationStatus::Invalid,
        ProviderCode::Mb => VerificationStatus::Unverifiable,
        ProviderCode::Unknown => VerificationStatus::Error,
    }
}

/// Turns a provider response body into a `VerificationResult` for `email`.
///
/// The result always carries the address that was asked about, so callers can match it
/// back to their candidate even if the provider echoes a differently-cased copy.
pub fn parse_provider_body(email: &str, body: &str) -> VerificationResult {
    match serde_json::from_str::<ProviderResponse>(body) {
        Ok(response) => {
            let status = map_provider_status(response.code, &response.message);
            let message = if status == VerificationStatus::Error {
                format!("Unrecognized provider code (message: {})", response.message)
            } else {
                response.message.clone()
            };
            VerificationResult {
                email: email.to_string(),
                status,
                message,
                mx_host: response.mx.clone(),
                raw_provider_payload: Some(response),
            }
        }
        Err(e) => VerificationResult::error(email, format!("Malformed provider response: {}", e)),
    }
}

/// `EmailVerifier` backed by the MailTester Ninja HTTP endpoint.
#[derive(Clone)]
pub struct MailTesterClient {
    http_client: Client,
    api_url: Url,
    api_key: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for MailTesterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailTesterClient")
            .field("api_url", &self.api_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl MailTesterClient {
    /// Builds a client from the provider settings in `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Initialization(format!("Failed to build HTTP client: {}", e)))?;
        Self::with_client(http_client, config)
    }

    /// Uses an existing `reqwest::Client`, e.g. one shared with other components.
    pub fn with_client(http_client: Client, config: &Config) -> Result<Self> {
        if !config.has_api_key() {
            return Err(AppError::Initialization(
                "A provider API key is required for verification".to_string(),
            ));
        }
        let api_url = Url::parse(&config.api_url)?;
        tracing::debug!(target: "verification_api", "Verification client targets {}", api_url);
        Ok(Self {
            http_client,
            api_url,
            api_key: config.api_key.trim().to_string(),
            request_timeout: config.request_timeout,
        })
    }

    async fn fetch(&self, email: &str) -> std::result::Result<String, String> {
        let response = self
            .http_client
            .get(self.api_url.clone())
            .query(&[("email", email), ("key", self.api_key.as_str())])
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                // The request URL carries the API key; keep it out of every message.
                let e = e.without_url();
                if e.is_timeout() {
                    format!("Provider request timed out after {:?}", self.request_timeout)
                } else if e.is_connect() {
                    format!("Could not connect to provider: {}", e)
                } else {
                    format!("Provider request failed: {}", e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!(
                "Provider returned HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string());
        }
        response
            .text()
            .await
            .map_err(|e| format!("Failed to read provider response: {}", e.without_url()))
    }
}

#[async_trait]
impl EmailVerifier for MailTesterClient {
    async fn verify(&self, email: &str) -> VerificationResult {
        let task_label = format!("[Verify: {}]", email);
        tracing::debug!(target: "verification_api", "{} Sending request", task_label);

        let result = match self.fetch(email).await {
            Ok(body) => parse_provider_body(email, &body),
            Err(message) => VerificationResult::error(email, message),
        };

        match result.status {
            VerificationStatus::Error => {
                tracing::warn!(target: "verification_api", "{} {}", task_label, result.message)
            }
            status => tracing::info!(target: "verification_api",
                "{} {} ({}, mx: {})", task_label, status, result.message, result.mx_host),
        }
        result
    }
}
