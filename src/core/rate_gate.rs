//! Process-wide gate that bounds provider calls per rolling time window.
//!
//! One worker task owns the grant history and drains a FIFO channel of waiters.
//! Callers only hold a cheap cloneable handle, so every task that talks to the
//! provider shares the same budget without any global state.

use crate::core::config::Config;
use crate::core::error::{AppError, Result};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, sleep_until, Instant};

/// Tuning knobs of a [`RateGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateGateSettings {
    /// Maximum grants inside any trailing `window`.
    pub ceiling: usize,
    pub window: Duration,
    /// Minimum distance between two consecutive grants.
    pub min_spacing: Duration,
    /// Extra wait once the ceiling is hit, so the oldest grant is safely out.
    pub safety_buffer: Duration,
    /// Upper bound on how long a single `acquire` may wait. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

impl Default for RateGateSettings {
    fn default() -> Self {
        Self {
            ceiling: 170,
            window: Duration::from_millis(30_000),
            min_spacing: Duration::from_millis(176),
            safety_buffer: Duration::from_millis(100),
            acquire_timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl RateGateSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ceiling: config.rate_ceiling,
            window: config.rate_window,
            min_spacing: config.min_spacing,
            safety_buffer: config.window_safety_buffer,
            acquire_timeout: config.acquire_timeout,
        }
    }

    /// Time between the first and the last of `count` back-to-back grants on an idle
    /// gate, following the same rules as the worker.
    pub fn estimated_duration(&self, count: usize) -> Duration {
        let ceiling = self.ceiling.max(1);
        let mut grants: VecDeque<Duration> = VecDeque::with_capacity(ceiling);
        let mut now = Duration::ZERO;
        for _ in 0..count {
            loop {
                while grants
                    .front()
                    .is_some_and(|t| now.saturating_sub(*t) >= self.window)
                {
                    grants.pop_front();
                }
                if grants.len() >= ceiling {
                    let resume = grants[0]
                        .saturating_add(self.window)
                        .saturating_add(self.safety_buffer);
                    if resume <= now {
                        // Saturated: the next slot lies beyond any representable time.
                        return Duration::MAX;
                    }
                    now = resume;
                    continue;
                }
                if let Some(next) = grants.back().map(|last| last.saturating_add(self.min_spacing)) {
                    if next > now {
                        now = next;
                        continue;
                    }
                }
                break;
            }
            grants.push_back(now);
        }
        now
    }
}

/// A granted slot.
#[derive(Debug, Clone, Copy)]
pub struct Grant {
    pub granted_at: Instant,
    /// Time spent queued.
    pub waited: Duration,
}

/// Point-in-time view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateGateStatus {
    pub grants_in_window: usize,
    pub ceiling: usize,
    pub pending: usize,
    pub available: usize,
}

struct Waiter {
    reply: oneshot::Sender<Instant>,
}

/// Handle to the shared gate. Clone it into every task that calls the provider.
#[derive(Clone)]
pub struct RateGate {
    tx: mpsc::UnboundedSender<Waiter>,
    settings: RateGateSettings,
    pending: Arc<AtomicUsize>,
    history: watch::Receiver<VecDeque<Instant>>,
}

impl RateGate {
    /// Spawns the worker task. Must be called inside a tokio runtime.
    pub fn new(mut settings: RateGateSettings) -> Self {
        if settings.ceiling == 0 {
            tracing::warn!(target: "rate_gate", "Rate ceiling of 0 would never grant; using 1.");
            settings.ceiling = 1;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let (history_tx, history) = watch::channel(VecDeque::new());
        let pending = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_worker(rx, settings, Arc::clone(&pending), history_tx));
        tracing::debug!(target: "rate_gate",
            "Rate gate started: {} grants / {:?}, spacing {:?}, acquire timeout {:?}",
            settings.ceiling, settings.window, settings.min_spacing, settings.acquire_timeout);

        Self {
            tx,
            settings,
            pending,
            history,
        }
    }

    pub fn settings(&self) -> &RateGateSettings {
        &self.settings
    }

    /// Waits for a slot. Waiters are served strictly in arrival order.
    ///
    /// Dropping the returned future before it resolves gives the slot up; the
    /// worker skips the waiter instead of recording a grant for it.
    pub async fn acquire(&self) -> Result<Grant> {
        let enqueued_at = Instant::now();
        let (reply, mut reply_rx) = oneshot::channel();

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Waiter { reply }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::RateGateClosed);
        }

        let granted_at = match self.settings.acquire_timeout {
            Some(limit) => {
                tokio::select! {
                    res = &mut reply_rx => res.map_err(|_| AppError::RateGateClosed)?,
                    _ = sleep(limit) => {
                        // Close first so a grant racing the deadline is either seen
                        // here or refused by the worker, never lost.
                        reply_rx.close();
                        match reply_rx.try_recv() {
                            Ok(at) => at,
                            Err(_) => {
                                tracing::warn!(target: "rate_gate",
                                    "Gave up waiting for a slot after {:?}", limit);
                                return Err(AppError::RateGateTimeout(limit));
                            }
                        }
                    }
                }
            }
            None => reply_rx.await.map_err(|_| AppError::RateGateClosed)?,
        };

        Ok(Grant {
            granted_at,
            waited: granted_at.saturating_duration_since(enqueued_at),
        })
    }

    pub fn status(&self) -> RateGateStatus {
        let now = Instant::now();
        let grants_in_window = self
            .history
            .borrow()
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.settings.window)
            .count();
        RateGateStatus {
            grants_in_window,
            ceiling: self.settings.ceiling,
            pending: self.pending.load(Ordering::SeqCst),
            available: self.settings.ceiling.saturating_sub(grants_in_window),
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Waiter>,
    settings: RateGateSettings,
    pending: Arc<AtomicUsize>,
    history_tx: watch::Sender<VecDeque<Instant>>,
) {
    let mut grants: VecDeque<Instant> = VecDeque::with_capacity(settings.ceiling);

    while let Some(mut waiter) = rx.recv().await {
        pending.fetch_sub(1, Ordering::SeqCst);
        if waiter.reply.is_closed() {
            tracing::trace!(target: "rate_gate", "Skipping waiter that left the queue.");
            continue;
        }
        if !wait_for_slot(&mut grants, &settings, &mut waiter.reply).await {
            tracing::trace!(target: "rate_gate", "Waiter left while its slot was pending.");
            continue;
        }

        let now = Instant::now();
        if waiter.reply.send(now).is_ok() {
            grants.push_back(now);
            history_tx.send_replace(grants.clone());
            tracing::trace!(target: "rate_gate", "Slot granted ({}/{} in window).",
                grants.len(), settings.ceiling);
        } else {
            tracing::trace!(target: "rate_gate", "Waiter left just before its grant.");
        }
    }

    tracing::debug!(target: "rate_gate", "All gate handles dropped, worker exiting.");
}

/// Sleeps until the next grant is allowed. Returns `false` if the waiter went away.
async fn wait_for_slot(
    grants: &mut VecDeque<Instant>,
    settings: &RateGateSettings,
    reply: &mut oneshot::Sender<Instant>,
) -> bool {
    loop {
        let now = Instant::now();
        while grants
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= settings.window)
        {
            grants.pop_front();
        }

        let deadline = if grants.len() >= settings.ceiling {
            let resume = grants.front().map(|oldest| {
                later_by(later_by(*oldest, settings.window), settings.safety_buffer)
            });
            tracing::debug!(target: "rate_gate",
                "Ceiling of {} reached, pausing until {:?} from now.",
                settings.ceiling, resume.map(|r| r.saturating_duration_since(now)));
            resume
        } else {
            grants
                .back()
                .map(|last| later_by(*last, settings.min_spacing))
                .filter(|next| *next > now)
        };

        let Some(deadline) = deadline else {
            return true;
        };

        tokio::select! {
            _ = sleep_until(deadline) => {}
            _ = reply.closed() => return false,
        }
    }
}

/// `at + by`, clamped to a far-future instant instead of overflowing.
fn later_by(at: Instant, by: Duration) -> Instant {
    at.checked_add(by)
        .unwrap_or_else(|| at + Duration::from_secs(FAR_FUTURE_SECS))
}

const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    fn settings(ceiling: usize, window_ms: u64, spacing_ms: u64) -> RateGateSettings {
        RateGateSettings {
            ceiling,
            window: Duration::from_millis(window_ms),
            min_spacing: Duration::from_millis(spacing_ms),
            safety_buffer: Duration::from_millis(100),
            acquire_timeout: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stress_500_acquires_respect_window_and_spacing() {
        let gate = RateGate::new(settings(170, 30_000, 176));
        let handles: Vec<_> = (0..500)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.acquire().await.unwrap().granted_at })
            })
            .collect();

        let mut trace = Vec::with_capacity(500);
        for handle in handles {
            trace.push(handle.await.unwrap());
        }
        trace.sort();
        assert_eq!(trace.len(), 500);

        let window = Duration::from_millis(30_000);
        let mut start = 0;
        for end in 0..trace.len() {
            while trace[end].duration_since(trace[start]) >= window {
                start += 1;
            }
            assert!(
                end - start + 1 <= 170,
                "{} grants inside one window ending at grant {}",
                end - start + 1,
                end
            );
        }
        for pair in trace.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(176));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_served_in_arrival_order() {
        let gate = RateGate::new(settings(3, 1_000, 10));
        let grants = join_all((0..10).map(|_| gate.acquire())).await;
        let times: Vec<Instant> = grants.into_iter().map(|g| g.unwrap().granted_at).collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_waiter_is_not_counted() {
        let mut s = settings(2, 10_000, 0);
        s.acquire_timeout = Some(Duration::from_secs(1));
        let gate = RateGate::new(s);
        let start = Instant::now();

        gate.acquire().await.unwrap();
        gate.acquire().await.unwrap();
        let err = gate.acquire().await.unwrap_err();
        assert!(matches!(err, AppError::RateGateTimeout(_)));

        let status = gate.status();
        assert_eq!(status.grants_in_window, 2);
        assert_eq!(status.available, 0);

        let mut patient = s;
        patient.acquire_timeout = Some(Duration::from_secs(60));
        let late = RateGate { settings: patient, ..gate.clone() };
        let grant = late.acquire().await.unwrap();
        assert_eq!(
            grant.granted_at.duration_since(start),
            Duration::from_millis(10_100)
        );
        assert_eq!(gate.status().grants_in_window, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_acquire_gives_slot_up() {
        let gate = RateGate::new(settings(1, 5_000, 0));
        let first = gate.acquire().await.unwrap();

        let abandoned = tokio::time::timeout(Duration::from_secs(1), gate.acquire()).await;
        assert!(abandoned.is_err());

        let next = gate.acquire().await.unwrap();
        assert_eq!(
            next.granted_at.duration_since(first.granted_at),
            Duration::from_millis(5_100)
        );
        assert_eq!(gate.status().pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_grants() {
        let gate = RateGate::new(settings(100, 30_000, 176));
        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();
        assert_eq!(b.granted_at.duration_since(a.granted_at), Duration::from_millis(176));
        assert_eq!(b.waited, Duration::from_millis(176));
    }

    #[test]
    fn test_estimated_duration() {
        let s = RateGateSettings::default();
        assert_eq!(s.estimated_duration(0), Duration::ZERO);
        assert_eq!(s.estimated_duration(1), Duration::ZERO);
        assert_eq!(s.estimated_duration(2), Duration::from_millis(176));
        assert_eq!(s.estimated_duration(170), Duration::from_millis(169 * 176));
        assert_eq!(s.estimated_duration(171), Duration::from_millis(30_100));
    }

    #[test]
    fn test_estimated_duration_saturates_on_huge_intervals() {
        let s = RateGateSettings {
            ceiling: 2,
            window: Duration::MAX,
            min_spacing: Duration::from_secs(1),
            safety_buffer: Duration::from_secs(1),
            acquire_timeout: None,
        };
        assert_eq!(s.estimated_duration(2), Duration::from_secs(1));
        assert_eq!(s.estimated_duration(3), Duration::MAX);
        assert_eq!(s.estimated_duration(10), Duration::MAX);

        let s = RateGateSettings {
            min_spacing: Duration::MAX,
            ..s
        };
        assert_eq!(s.estimated_duration(2), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_window_keeps_worker_alive() {
        let gate = RateGate::new(RateGateSettings {
            ceiling: 1,
            window: Duration::from_secs(u64::MAX),
            min_spacing: Duration::ZERO,
            safety_buffer: Duration::from_millis(100),
            acquire_timeout: Some(Duration::from_secs(5)),
        });
        assert!(gate.acquire().await.is_ok());
        // The second caller waits on a far-off slot and times out; the worker survives.
        assert!(matches!(
            gate.acquire().await,
            Err(AppError::RateGateTimeout(_))
        ));
        assert!(matches!(
            gate.acquire().await,
            Err(AppError::RateGateTimeout(_))
        ));
        assert_eq!(gate.status().grants_in_window, 1);
    }
}
