//! Metrics recorder seam
//!
//! The broker, engine and gateway report counts and durations through this
//! trait. Wiring it to an actual metrics registry is left to the embedder.

use std::time::Duration;

/// Reason a message was discarded instead of delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Session mailbox was full or closed
    MailboxFull,
    /// Matching work queue was full
    IngressSaturated,
    /// Matching engine is no longer accepting work
    EngineStopped,
    /// Envelope type had no route
    Unroutable,
}

impl DropReason {
    pub const ALL: [DropReason; 4] = [
        DropReason::MailboxFull,
        DropReason::IngressSaturated,
        DropReason::EngineStopped,
        DropReason::Unroutable,
    ];

    /// Label value used when exporting
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MailboxFull => "queue_full",
            DropReason::IngressSaturated => "ingress_saturated",
            DropReason::EngineStopped => "engine_stopped",
            DropReason::Unroutable => "unroutable",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            DropReason::MailboxFull => 0,
            DropReason::IngressSaturated => 1,
            DropReason::EngineStopped => 2,
            DropReason::Unroutable => 3,
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for gateway counters, gauges and distributions
///
/// Implementations must be cheap and non-blocking; they are called from
/// inside shard locks and worker loops.
pub trait MetricsRecorder: Send + Sync + 'static {
    /// A session was registered (active-session gauge +1)
    fn session_opened(&self);

    /// A session was detached after living for `lifetime` (gauge -1)
    fn session_closed(&self, lifetime: Duration);

    /// An inbound envelope of `kind` arrived over `transport`
    fn ingress(&self, kind: &'static str, transport: &str);

    /// An outbound envelope of `kind` was queued for a session on `transport`
    fn egress(&self, kind: &'static str, transport: &str);

    /// A message was discarded
    fn dropped(&self, reason: DropReason);

    /// A session missed its heartbeat window
    fn heartbeat_missed(&self);
}

/// Recorder that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn session_opened(&self) {}
    fn session_closed(&self, _lifetime: Duration) {}
    fn ingress(&self, _kind: &'static str, _transport: &str) {}
    fn egress(&self, _kind: &'static str, _transport: &str) {}
    fn dropped(&self, _reason: DropReason) {}
    fn heartbeat_missed(&self) {}
}
