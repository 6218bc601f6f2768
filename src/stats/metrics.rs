//! In-process gateway metrics

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::recorder::{DropReason, MetricsRecorder};

/// Labeled counter keyed by (message kind, transport)
type LabeledCounts = HashMap<(&'static str, String), u64>;

/// Atomic implementation of [`MetricsRecorder`]
///
/// Unlabeled counters are plain atomics. The (kind, transport) counters sit
/// behind a short mutex since the label set is small and fixed in practice.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    active_sessions: AtomicI64,
    sessions_total: AtomicU64,
    session_lifetime_micros: AtomicU64,
    session_lifetime_max_micros: AtomicU64,
    sessions_closed: AtomicU64,
    dropped: [AtomicU64; 4],
    heartbeat_misses: AtomicU64,
    ingress: Mutex<LabeledCounts>,
    egress: Mutex<LabeledCounts>,
}

impl GatewayMetrics {
    /// Create an empty metrics set
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let closed = self.sessions_closed.load(Ordering::Relaxed);
        let total_micros = self.session_lifetime_micros.load(Ordering::Relaxed);

        MetricsSnapshot {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            sessions_closed: closed,
            mean_session_lifetime: if closed > 0 {
                Duration::from_micros(total_micros / closed)
            } else {
                Duration::ZERO
            },
            max_session_lifetime: Duration::from_micros(
                self.session_lifetime_max_micros.load(Ordering::Relaxed),
            ),
            dropped: DropReason::ALL
                .iter()
                .map(|r| (*r, self.dropped[r.index()].load(Ordering::Relaxed)))
                .collect(),
            heartbeat_misses: self.heartbeat_misses.load(Ordering::Relaxed),
            ingress: self.ingress.lock().clone(),
            egress: self.egress.lock().clone(),
        }
    }
}

impl MetricsRecorder for GatewayMetrics {
    fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
    }

    fn session_closed(&self, lifetime: Duration) {
        let micros = lifetime.as_micros().min(u64::MAX as u128) as u64;
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        self.session_lifetime_micros
            .fetch_add(micros, Ordering::Relaxed);
        self.session_lifetime_max_micros
            .fetch_max(micros, Ordering::Relaxed);
    }

    fn ingress(&self, kind: &'static str, transport: &str) {
        *self
            .ingress
            .lock()
            .entry((kind, transport.to_string()))
            .or_insert(0) += 1;
    }

    fn egress(&self, kind: &'static str, transport: &str) {
        *self
            .egress
            .lock()
            .entry((kind, transport.to_string()))
            .or_insert(0) += 1;
    }

    fn dropped(&self, reason: DropReason) {
        self.dropped[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn heartbeat_missed(&self) {
        self.heartbeat_misses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Copy of [`GatewayMetrics`] at one instant
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Sessions currently registered
    pub active_sessions: i64,
    /// Sessions ever registered
    pub sessions_total: u64,
    /// Sessions detached
    pub sessions_closed: u64,
    pub mean_session_lifetime: Duration,
    pub max_session_lifetime: Duration,
    /// Drop counts by reason
    pub dropped: HashMap<DropReason, u64>,
    pub heartbeat_misses: u64,
    /// Inbound counts by (kind, transport)
    pub ingress: LabeledCounts,
    /// Outbound counts by (kind, transport)
    pub egress: LabeledCounts,
}

impl MetricsSnapshot {
    /// Drops recorded for one reason
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped.get(&reason).copied().unwrap_or(0)
    }

    /// Inbound count for one kind summed over transports
    pub fn ingress_of(&self, kind: &str) -> u64 {
        self.ingress
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Outbound count for one kind summed over transports
    pub fn egress_of(&self, kind: &str) -> u64 {
        self.egress
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, n)| *n)
            .sum()
    }
}
