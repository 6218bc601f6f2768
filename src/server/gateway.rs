//! Per-connection driver
//!
//! [`Gateway::serve`] registers a session, then runs two loops until either
//! ends: ingress reads envelopes from the source and submits them to the
//! engine, egress drains the session mailbox into the sink. Whichever way the
//! connection ends, the session is closed and detached exactly once.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::transport::{MessageSink, MessageSource};
use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::matching::Engine;
use crate::protocol::{Ack, ServerBody, ServerEnvelope};
use crate::session::{Outbound, Session};
use crate::stats::{MetricsRecorder, NoopRecorder};

/// Binds transports to the broker and engine
#[derive(Clone)]
pub struct Gateway {
    broker: Arc<Broker>,
    engine: Arc<Engine>,
    metrics: Arc<dyn MetricsRecorder>,
    shutdown: CancellationToken,
    transport: String,
    mailbox_capacity: usize,
}

impl Gateway {
    /// Create a gateway whose sessions are children of `shutdown`
    pub fn new(broker: Arc<Broker>, engine: Arc<Engine>, shutdown: CancellationToken) -> Self {
        Self {
            broker,
            engine,
            metrics: Arc::new(NoopRecorder),
            shutdown,
            transport: "memory".into(),
            mailbox_capacity: 256,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Tag sessions with `transport`
    pub fn transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    /// Mailbox capacity for new sessions
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Drive one connection to completion
    ///
    /// Fails fast with [`Error::Broker`] when the broker is full; the sink is
    /// sent a failed ack first. Returns once either half ends, the session
    /// closes or shutdown is signalled.
    pub async fn serve<S, K>(&self, user_id: &str, mut source: S, mut sink: K) -> Result<()>
    where
        S: MessageSource,
        K: MessageSink,
    {
        let (session, token) = match self.broker.register(
            &self.shutdown,
            user_id,
            &self.transport,
            self.mailbox_capacity,
        ) {
            Ok(registered) => registered,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Session rejected");
                let reject = ServerEnvelope::new(
                    "",
                    0,
                    ServerBody::Ack(Ack {
                        correlation_id: String::new(),
                        success: false,
                        detail: e.to_string(),
                    }),
                );
                let _ = sink.send(Arc::new(reject)).await;
                return Err(e.into());
            }
        };

        let guard = SessionGuard {
            broker: Arc::clone(&self.broker),
            session: Arc::clone(&session),
        };
        let outbound = session
            .outbound()
            .ok_or_else(|| Error::Transport("outbound already claimed".into()))?;

        let result = tokio::select! {
            r = self.ingress(&session, &token, &mut source) => r,
            r = egress(outbound, &mut sink) => r,
        };
        drop(guard);

        if let Err(ref e) = result {
            tracing::warn!(
                session_id = %session.id(),
                user_id = %session.user_id(),
                error = %e,
                "Transport error"
            );
        }
        result
    }

    async fn ingress<S: MessageSource>(
        &self,
        session: &Arc<Session>,
        token: &CancellationToken,
        source: &mut S,
    ) -> Result<()> {
        loop {
            let envelope = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                envelope = source.recv() => envelope?,
            };
            let Some(envelope) = envelope else {
                tracing::debug!(session_id = %session.id(), "Client finished sending");
                return Ok(());
            };

            session.touch();
            self.metrics.ingress(envelope.label(), session.transport());
            self.engine.submit(session, envelope);
        }
    }
}

/// Ends when the session closes and its mailbox stops yielding
async fn egress<K: MessageSink>(mut outbound: Outbound, sink: &mut K) -> Result<()> {
    while let Some(msg) = outbound.recv().await {
        sink.send(msg).await?;
    }
    Ok(())
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("transport", &self.transport)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("broker", &self.broker)
            .finish()
    }
}

/// Closes and detaches its session on drop
struct SessionGuard {
    broker: Arc<Broker>,
    session: Arc<Session>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.close();
        self.broker.detach(&self.session);
    }
}
