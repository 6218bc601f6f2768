//! Sharded session broker
//!
//! Owns a fixed array of shards and routes every operation to the shard that
//! owns a user ID. Sending to one user touches one shard; broadcasting walks
//! all of them one at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::config::BrokerConfig;
use super::error::BrokerError;
use super::hash::stable_hash;
use super::shard::Shard;
use crate::protocol::ServerEnvelope;
use crate::session::session::unix_millis;
use crate::session::{Outgoing, Session};
use crate::stats::{MetricsRecorder, NoopRecorder};

/// Registry of live sessions partitioned by user ID
pub struct Broker {
    shards: Box<[Shard]>,
    max_sessions: usize,
    session_count: AtomicUsize,
    metrics: Arc<dyn MetricsRecorder>,
}

impl Broker {
    /// Create a broker with `shard_count` shards and a session ceiling
    ///
    /// A zero shard count is raised to one.
    pub fn new(shard_count: usize, max_sessions: usize) -> Self {
        Self::with_metrics(shard_count, max_sessions, Arc::new(NoopRecorder))
    }

    /// Create a broker that reports through `metrics`
    pub fn with_metrics(
        shard_count: usize,
        max_sessions: usize,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        let shards = (0..shard_count.max(1)).map(|_| Shard::new()).collect();
        Self {
            shards,
            max_sessions,
            session_count: AtomicUsize::new(0),
            metrics,
        }
    }

    /// Create a broker from configuration
    pub fn from_config(config: &BrokerConfig, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self::with_metrics(config.shard_count, config.max_sessions, metrics)
    }

    /// Register a new session for `user_id`
    ///
    /// Fails immediately once the ceiling is reached; existing sessions are
    /// never evicted. The returned token is a child of `parent` and is
    /// cancelled when the session closes.
    pub fn register(
        &self,
        parent: &CancellationToken,
        user_id: &str,
        transport: &str,
        mailbox_capacity: usize,
    ) -> Result<(Arc<Session>, CancellationToken), BrokerError> {
        if mailbox_capacity == 0 {
            return Err(BrokerError::InvalidMailboxCapacity);
        }

        // Reserve a slot first so concurrent registers cannot overshoot.
        self.session_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_sessions).then_some(n + 1)
            })
            .map_err(|_| BrokerError::CapacityReached {
                max: self.max_sessions,
            })?;

        let session = Arc::new(Session::new(parent, user_id, transport, mailbox_capacity));
        let token = session.cancellation().clone();
        self.pick(user_id).attach(Arc::clone(&session));
        self.metrics.session_opened();

        tracing::info!(
            session_id = %session.id(),
            user_id = %user_id,
            transport = %transport,
            sessions = self.session_count(),
            "Session registered"
        );

        Ok((session, token))
    }

    /// Remove a session
    ///
    /// Safe to call more than once; only the call that actually removes the
    /// entry decrements the counter and returns true.
    pub fn detach(&self, session: &Session) -> bool {
        if !self.pick(session.user_id()).detach(session) {
            return false;
        }
        self.session_count.fetch_sub(1, Ordering::AcqRel);
        self.metrics.session_closed(session.lifetime());

        tracing::info!(
            session_id = %session.id(),
            user_id = %session.user_id(),
            lifetime_ms = session.lifetime().as_millis() as u64,
            sessions = self.session_count(),
            "Session detached"
        );
        true
    }

    /// Deliver `msg` to every session of `user_id`
    pub fn send(&self, user_id: &str, msg: impl Into<Outgoing>) -> usize {
        self.pick(user_id)
            .broadcast_to_user(user_id, msg.into(), self.metrics.as_ref())
    }

    /// Deliver a per-session message to every matching session in every shard
    ///
    /// Shards are visited one at a time; no two shard locks are ever held
    /// together.
    pub fn broadcast<P, F>(&self, predicate: P, factory: F) -> usize
    where
        P: Fn(&Session) -> bool,
        F: Fn(&Session) -> ServerEnvelope,
    {
        self.shards
            .iter()
            .map(|shard| shard.broadcast(&predicate, &factory, self.metrics.as_ref()))
            .sum()
    }

    /// Close and detach every session silent for longer than `timeout`
    ///
    /// Returns the number of sessions reaped.
    pub fn reap_idle(&self, timeout: Duration) -> usize {
        let cutoff = unix_millis() - timeout.as_millis() as i64;
        let mut reaped = 0;

        for shard in self.shards.iter() {
            // Collect under the read lock, then close and detach without it.
            for session in shard.idle_sessions(cutoff) {
                if self.reap(&session) {
                    reaped += 1;
                }
            }
        }

        reaped
    }

    /// Close and detach one idle session
    ///
    /// Counts a heartbeat miss only if this call removed the session; the
    /// connection may have detached it since it was collected.
    fn reap(&self, session: &Session) -> bool {
        session.close();
        if !self.detach(session) {
            return false;
        }
        tracing::debug!(
            session_id = %session.id(),
            user_id = %session.user_id(),
            last_seen_ms = session.last_seen_ms(),
            "Heartbeat missed, session closed"
        );
        self.metrics.heartbeat_missed();
        true
    }

    /// Spawn a task that reaps idle sessions every `interval`
    ///
    /// The task exits when `shutdown` is cancelled.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = broker.reap_idle(timeout);
                        if reaped > 0 {
                            tracing::info!(reaped = reaped, "Idle sessions reaped");
                        }
                    }
                }
            }
        })
    }

    /// Approximate number of registered sessions
    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::Acquire)
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Sum of per-shard session counts
    ///
    /// Equal to [`session_count`](Self::session_count) whenever no
    /// register or detach is in flight.
    pub fn indexed_sessions(&self) -> usize {
        self.shards.iter().map(Shard::session_count).sum()
    }

    /// Sessions currently attached for `user_id`
    pub fn sessions_of(&self, user_id: &str) -> Vec<Arc<Session>> {
        self.pick(user_id).sessions_of(user_id)
    }

    /// Index of the shard owning `user_id`
    pub fn shard_index(&self, user_id: &str) -> usize {
        (stable_hash(user_id) % self.shards.len() as u64) as usize
    }

    fn pick(&self, user_id: &str) -> &Shard {
        &self.shards[self.shard_index(user_id)]
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("shards", &self.shards.len())
            .field("max_sessions", &self.max_sessions)
            .field("session_count", &self.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Ack, ServerBody};
    use crate::stats::{DropReason, GatewayMetrics};

    fn ack(id: &str) -> ServerEnvelope {
        ServerEnvelope::new(
            id,
            0,
            ServerBody::Ack(Ack {
                correlation_id: id.into(),
                success: true,
                detail: String::new(),
            }),
        )
    }

    #[test]
    fn test_register_and_detach() {
        let broker = Broker::new(4, 10);
        let root = CancellationToken::new();

        let (session, token) = broker.register(&root, "u1", "test", 2).unwrap();
        assert_eq!(broker.session_count(), 1);
        assert_eq!(broker.indexed_sessions(), 1);
        assert!(!token.is_cancelled());

        assert!(broker.detach(&session));
        assert!(!broker.detach(&session));
        assert_eq!(broker.session_count(), 0);
        assert_eq!(broker.indexed_sessions(), 0);
    }

    #[test]
    fn test_reap_counts_only_sessions_it_removes() {
        let metrics = Arc::new(GatewayMetrics::new());
        let broker = Broker::with_metrics(2, 10, metrics.clone());
        let root = CancellationToken::new();
        let (session, _) = broker.register(&root, "u1", "test", 2).unwrap();

        // The connection detaches first, after the reaper collected the session
        assert!(broker.detach(&session));
        assert!(!broker.reap(&session));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.heartbeat_misses, 0);
        assert_eq!(snapshot.sessions_closed, 1);
        assert!(session.is_closed());

        let (live, _) = broker.register(&root, "u2", "test", 2).unwrap();
        assert!(broker.reap(&live));
        assert!(!broker.reap(&live));
        assert_eq!(metrics.snapshot().heartbeat_misses, 1);
        assert_eq!(broker.session_count(), 0);
    }

    #[test]
    fn test_capacity_reached() {
        let broker = Broker::new(2, 2);
        let root = CancellationToken::new();

        let (a, _) = broker.register(&root, "u1", "test", 1).unwrap();
        broker.register(&root, "u2", "test", 1).unwrap();

        let err = broker.register(&root, "u3", "test", 1).unwrap_err();
        assert_eq!(err, BrokerError::CapacityReached { max: 2 });
        assert_eq!(broker.session_count(), 2);

        broker.detach(&a);
        assert!(broker.register(&root, "u3", "test", 1).is_ok());
    }

    #[test]
    fn test_zero_mailbox_rejected() {
        let broker = Broker::new(1, 1);
        let err = broker
            .register(&CancellationToken::new(), "u1", "test", 0)
            .unwrap_err();
        assert_eq!(err, BrokerError::InvalidMailboxCapacity);
        assert_eq!(broker.session_count(), 0);
    }

    #[test]
    fn test_session_token_follows_close_and_parent() {
        let broker = Broker::new(1, 10);
        let root = CancellationToken::new();

        let (a, token_a) = broker.register(&root, "u1", "test", 1).unwrap();
        let (_b, token_b) = broker.register(&root, "u1", "test", 1).unwrap();

        a.close();
        assert!(token_a.is_cancelled());
        assert!(!token_b.is_cancelled());

        root.cancel();
        assert!(token_b.is_cancelled());
    }

    #[test]
    fn test_send_reaches_all_sessions_of_user() {
        let broker = Broker::new(8, 100);
        let root = CancellationToken::new();
        let sessions: Vec<_> = (0..3)
            .map(|_| broker.register(&root, "u1", "test", 2).unwrap().0)
            .collect();
        let (other, _) = broker.register(&root, "u2", "test", 2).unwrap();

        assert_eq!(broker.send("u1", ack("m1")), 3);
        for s in &sessions {
            assert_eq!(s.pending(), 1);
        }
        assert_eq!(other.pending(), 0);

        // Fill one mailbox to capacity
        assert!(sessions[0].enqueue(ack("fill")));
        assert_eq!(broker.send("u1", ack("m2")), 2);
    }

    #[test]
    fn test_send_to_unknown_user() {
        let broker = Broker::new(4, 10);
        assert_eq!(broker.send("nobody", ack("m")), 0);
    }

    #[test]
    fn test_broadcast_spans_shards() {
        let broker = Broker::new(16, 1000);
        let root = CancellationToken::new();
        let users: Vec<String> = (0..64).map(|i| format!("user-{}", i)).collect();
        for u in &users {
            broker.register(&root, u, "test", 1).unwrap();
        }

        let touched: std::collections::HashSet<usize> =
            users.iter().map(|u| broker.shard_index(u)).collect();
        assert!(touched.len() > 1);

        let delivered = broker.broadcast(|_| true, |s| ack(s.user_id()));
        assert_eq!(delivered, users.len());

        let delivered = broker.broadcast(|s| s.user_id().ends_with('7'), |s| ack(s.user_id()));
        assert_eq!(delivered, users.iter().filter(|u| u.ends_with('7')).count());
    }

    #[test]
    fn test_shard_index_stable() {
        let broker = Broker::new(64, 1);
        let first = broker.shard_index("user-123");
        for _ in 0..100 {
            assert_eq!(broker.shard_index("user-123"), first);
        }
        assert!(first < 64);
    }

    #[test]
    fn test_metrics_reported() {
        let metrics = Arc::new(GatewayMetrics::new());
        let broker = Broker::with_metrics(4, 10, metrics.clone());
        let root = CancellationToken::new();

        let (session, _) = broker.register(&root, "u1", "test", 1).unwrap();
        broker.send("u1", ack("a"));
        broker.send("u1", ack("b"));
        broker.detach(&session);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_total, 1);
        assert_eq!(snapshot.active_sessions, 0);
        assert_eq!(snapshot.egress_of("ack"), 1);
        assert_eq!(snapshot.dropped(DropReason::MailboxFull), 1);
    }

    #[test]
    fn test_reap_idle() {
        let metrics = Arc::new(GatewayMetrics::new());
        let broker = Broker::with_metrics(4, 10, metrics.clone());
        let root = CancellationToken::new();
        let (stale, token) = broker.register(&root, "u1", "test", 1).unwrap();
        let (fresh, _) = broker.register(&root, "u2", "test", 1).unwrap();

        assert_eq!(broker.reap_idle(Duration::from_secs(3600)), 0);

        std::thread::sleep(Duration::from_millis(40));
        fresh.touch();

        assert_eq!(broker.reap_idle(Duration::from_millis(20)), 1);
        assert!(stale.is_closed());
        assert!(token.is_cancelled());
        assert!(!fresh.is_closed());
        assert!(broker.sessions_of("u1").is_empty());
        assert_eq!(broker.sessions_of("u2").len(), 1);
        assert_eq!(broker.session_count(), 1);
        assert_eq!(broker.indexed_sessions(), 1);
        assert_eq!(metrics.snapshot().heartbeat_misses, 1);
    }

    #[tokio::test]
    async fn test_reaper_task_stops_on_shutdown() {
        let broker = Arc::new(Broker::new(1, 10));
        let shutdown = CancellationToken::new();
        let handle = broker.spawn_reaper(
            Duration::from_millis(5),
            Duration::from_secs(60),
            shutdown.clone(),
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper did not stop")
            .unwrap();
    }
}
