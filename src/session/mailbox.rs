//! Bounded outbound mailbox
//!
//! One writer side held by the session (shared by the broker and engine) and
//! one drain side handed to the transport. Enqueue never blocks: a full or
//! closed mailbox rejects the message and the caller counts the drop.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::protocol::ServerEnvelope;

/// Message type carried by mailboxes
///
/// Reference counted so a single envelope can be queued to every session of
/// a user without cloning the body.
pub type Outgoing = Arc<ServerEnvelope>;

/// Writer side of a session mailbox
#[derive(Debug)]
pub(crate) struct Mailbox {
    /// `None` once closed; taking the sender is what disables the mailbox
    tx: RwLock<Option<mpsc::Sender<Outgoing>>>,
    capacity: usize,
}

impl Mailbox {
    /// Create a mailbox and its drain side
    ///
    /// `capacity` must be non-zero; the broker validates it before calling.
    pub(crate) fn new(capacity: usize, cancel: CancellationToken) -> (Self, Outbound) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: RwLock::new(Some(tx)),
                capacity,
            },
            Outbound { rx, cancel },
        )
    }

    /// Try to queue a message without waiting
    pub(crate) fn try_push(&self, msg: Outgoing) -> bool {
        let guard = self.tx.read();
        match guard.as_ref() {
            Some(tx) => match tx.try_send(msg) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
            },
            None => false,
        }
    }

    /// Disable the mailbox. Returns false if it was already closed.
    pub(crate) fn close(&self) -> bool {
        self.tx.write().take().is_some()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued messages not yet drained
    pub(crate) fn len(&self) -> usize {
        self.tx
            .read()
            .as_ref()
            .map(|tx| self.capacity - tx.capacity())
            .unwrap_or(0)
    }
}

/// Drain side of a session mailbox
///
/// Yields queued messages in FIFO order until the session closes. Closing
/// discards anything still queued and wakes a pending [`recv`](Self::recv).
#[derive(Debug)]
pub struct Outbound {
    rx: mpsc::Receiver<Outgoing>,
    cancel: CancellationToken,
}

impl Outbound {
    /// Wait for the next message
    ///
    /// Returns `None` once the session is closed or its token is cancelled.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.rx.close();
                None
            }
            msg = self.rx.recv() => msg,
        }
    }

    /// Take a queued message if one is ready
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        if self.cancel.is_cancelled() {
            self.rx.close();
            return None;
        }
        self.rx.try_recv().ok()
    }
}
