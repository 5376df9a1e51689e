//! Progress reporting for the enrichment pipeline.
//!
//! The pipeline never calls back into caller code beyond these two notifications, and
//! neither carries control semantics: an observer cannot stop or steer a lead.

use crate::core::models::{EnrichmentResult, ProgressEvent};
use tokio::sync::mpsc;

/// Receives pipeline progress. Called from worker tasks, so implementations must be cheap
/// and must not block.
pub trait ProgressObserver: Send + Sync {
    /// One candidate of a lead has been verified.
    fn on_progress(&self, _event: &ProgressEvent) {}

    /// A lead finished. `index` is the lead's position in the submitted batch.
    fn on_lead_complete(&self, _index: usize, _result: &EnrichmentResult) {}
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// Logs notifications through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        tracing::debug!(target: "enrich_lead", "[{}] Candidate {}/{} {} -> {}",
            event.lead, event.completed, event.total, event.email, event.status);
    }

    fn on_lead_complete(&self, index: usize, result: &EnrichmentResult) {
        tracing::info!(target: "process_leads", "[{} {}@{}] Lead #{} finished: {} after {} attempt(s)",
            result.first_name, result.last_name, result.domain, index + 1, result.status, result.attempts);
    }
}

/// Message forwarded by `ChannelObserver`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    Candidate(ProgressEvent),
    LeadComplete {
        index: usize,
        result: EnrichmentResult,
    },
}

/// Forwards notifications into an mpsc channel so a consumer task can render them.
/// Sends after the receiver is gone are dropped silently.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self { tx }
    }

    /// Creates the observer together with the receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = self.tx.send(ProgressUpdate::Candidate(event.clone()));
    }

    fn on_lead_complete(&self, index: usize, result: &EnrichmentResult) {
        let _ = self.tx.send(ProgressUpdate::LeadComplete {
            index,
            result: result.clone(),
        });
    }
}
