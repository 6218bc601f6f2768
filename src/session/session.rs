//! Per-connection session state

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::mailbox::{Mailbox, Outbound, Outgoing};

/// Unique session identifier
pub type SessionId = String;

/// Server-side state for one live client connection
///
/// Shared as `Arc<Session>` between the shard that indexes it, the workers
/// that route to it and the transport that drains it.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    user_id: String,
    transport: String,
    mailbox: Mailbox,
    /// Drain side, handed out once
    outbound: Mutex<Option<Outbound>>,
    cancel: CancellationToken,
    created_at: Instant,
    last_seen_ms: AtomicI64,
    closed: AtomicBool,
}

impl Session {
    /// Create an open session whose token is a child of `parent`
    pub(crate) fn new(
        parent: &CancellationToken,
        user_id: impl Into<String>,
        transport: impl Into<String>,
        capacity: usize,
    ) -> Self {
        let cancel = parent.child_token();
        let (mailbox, outbound) = Mailbox::new(capacity, cancel.clone());

        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            transport: transport.into(),
            mailbox,
            outbound: Mutex::new(Some(outbound)),
            cancel,
            created_at: Instant::now(),
            last_seen_ms: AtomicI64::new(0),
            closed: AtomicBool::new(false),
        };
        session.touch();
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Tag of the transport that created this session
    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the session was created
    pub fn lifetime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Try to queue a message for the client
    ///
    /// Returns false without waiting if the mailbox is full or the session
    /// is closed.
    pub fn enqueue(&self, msg: impl Into<Outgoing>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.mailbox.try_push(msg.into())
    }

    /// Record that the client was heard from just now
    ///
    /// Never moves the timestamp backwards, so touches applied out of order
    /// by different workers resolve to the latest one.
    pub fn touch(&self) {
        self.last_seen_ms.fetch_max(unix_millis(), Ordering::AcqRel);
    }

    /// Last time the client was heard from, in unix milliseconds
    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms.load(Ordering::Acquire)
    }

    /// Last time the client was heard from
    pub fn last_seen(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_seen_ms().max(0) as u64)
    }

    /// Take the drain side of the mailbox
    ///
    /// Returns `None` on every call after the first; a new connection needs
    /// a new session.
    pub fn outbound(&self) -> Option<Outbound> {
        self.outbound.lock().take()
    }

    /// Close the session
    ///
    /// Disables the mailbox and cancels the session token, which wakes any
    /// task draining or reading on its behalf. Calling it again is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.mailbox.close();
        self.outbound.lock().take();
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Token cancelled when the session closes or its parent is cancelled
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Mailbox capacity fixed at creation
    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox.capacity()
    }

    /// Messages queued but not yet drained
    pub fn pending(&self) -> usize {
        self.mailbox.len()
    }
}

/// Current wall-clock time in unix milliseconds
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
