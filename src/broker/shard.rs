//! One partition of the session registry

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::protocol::ServerEnvelope;
use crate::session::{Outgoing, Session, SessionId};
use crate::stats::{DropReason, MetricsRecorder};

#[derive(Debug, Default)]
struct ShardInner {
    /// user ID -> session ID -> session
    users: HashMap<String, HashMap<SessionId, Arc<Session>>>,
    /// Total sessions across all users in this shard
    sessions: usize,
}

/// Independently locked slice of the registry
///
/// Every operation takes only this shard's lock. Predicates and message
/// factories passed to [`broadcast`](Self::broadcast) run under the read
/// lock, so they must not call back into the broker.
#[derive(Debug, Default)]
pub struct Shard {
    inner: RwLock<ShardInner>,
}

impl Shard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a session under its user ID
    ///
    /// Returns false if a session with the same ID was already attached.
    pub fn attach(&self, session: Arc<Session>) -> bool {
        let mut inner = self.inner.write();
        let bucket = inner
            .users
            .entry(session.user_id().to_string())
            .or_default();
        if bucket.contains_key(session.id()) {
            return false;
        }
        bucket.insert(session.id().to_string(), session);
        inner.sessions += 1;
        true
    }

    /// Remove a session
    ///
    /// Returns true only if an entry was actually removed. Empty user
    /// buckets are dropped so churn does not grow the map.
    pub fn detach(&self, session: &Session) -> bool {
        let mut inner = self.inner.write();
        let Some(bucket) = inner.users.get_mut(session.user_id()) else {
            return false;
        };
        if bucket.remove(session.id()).is_none() {
            return false;
        }
        if bucket.is_empty() {
            inner.users.remove(session.user_id());
        }
        inner.sessions -= 1;
        true
    }

    /// Deliver one message to every session of `user_id`
    ///
    /// Saturated mailboxes are skipped. Returns the number of sessions that
    /// accepted the message.
    pub fn broadcast_to_user(
        &self,
        user_id: &str,
        msg: Outgoing,
        metrics: &dyn MetricsRecorder,
    ) -> usize {
        let inner = self.inner.read();
        let Some(bucket) = inner.users.get(user_id) else {
            return 0;
        };
        bucket
            .values()
            .filter(|session| deliver(session, Arc::clone(&msg), metrics))
            .count()
    }

    /// Deliver a per-session message to every session matching `predicate`
    pub fn broadcast<P, F>(&self, predicate: P, factory: F, metrics: &dyn MetricsRecorder) -> usize
    where
        P: Fn(&Session) -> bool,
        F: Fn(&Session) -> ServerEnvelope,
    {
        let inner = self.inner.read();
        inner
            .users
            .values()
            .flat_map(|bucket| bucket.values())
            .filter(|session| predicate(session))
            .filter(|session| deliver(session, Arc::new(factory(session)), metrics))
            .count()
    }

    /// Sessions whose last-seen time is older than `cutoff_ms`
    pub fn idle_sessions(&self, cutoff_ms: i64) -> Vec<Arc<Session>> {
        let inner = self.inner.read();
        inner
            .users
            .values()
            .flat_map(|bucket| bucket.values())
            .filter(|session| session.last_seen_ms() < cutoff_ms)
            .cloned()
            .collect()
    }

    /// Sessions currently attached
    pub fn session_count(&self) -> usize {
        self.inner.read().sessions
    }

    /// Distinct users with at least one session
    pub fn user_count(&self) -> usize {
        self.inner.read().users.len()
    }

    /// Sessions attached for one user
    pub fn sessions_of(&self, user_id: &str) -> Vec<Arc<Session>> {
        self.inner
            .read()
            .users
            .get(user_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn deliver(session: &Session, msg: Outgoing, metrics: &dyn MetricsRecorder) -> bool {
    let kind = msg.label();
    if session.enqueue(msg) {
        metrics.egress(kind, session.transport());
        true
    } else {
        metrics.dropped(DropReason::MailboxFull);
        false
    }
}
