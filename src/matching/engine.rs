//! Matching and routing engine
//!
//! Inbound envelopes are queued on a bounded channel shared by a fixed pool
//! of workers. Each worker classifies one envelope and calls back into the
//! broker to deliver acks, zone broadcasts and synthesized matches.
//!
//! ```text
//!  transport read loop ──► submit() ──► [bounded queue] ──► worker 0..N
//!                            │ full                          │
//!                            ▼                               ▼
//!                         dropped                      process(env)
//!                                          heartbeat ─► touch
//!                                          location  ─► broker.broadcast(zone)
//!                                          status    ─► broker.send(match, ack)
//! ```
//!
//! Envelopes from one session may be handled by different workers and so
//! may complete out of order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::config::EngineConfig;
use super::strategy::{MatchStrategy, RandomMatcher};
use super::zone::{user_bucket, zone_bucket, zone_key, LocationPayload};
use crate::broker::Broker;
use crate::protocol::{
    Ack, BroadcastEvent, ClientEnvelope, LocationUpdate, RideStatus, RideStatusUpdate, ServerBody,
    ServerEnvelope,
};
use crate::session::Session;
use crate::stats::{DropReason, MetricsRecorder, NoopRecorder};

/// One unit of queued work
struct Work {
    session: Arc<Session>,
    envelope: ClientEnvelope,
}

/// Classifies inbound envelopes and routes the responses
pub struct Engine {
    broker: Arc<Broker>,
    strategy: Arc<dyn MatchStrategy>,
    metrics: Arc<dyn MetricsRecorder>,
    workers: usize,
    tx: mpsc::Sender<Work>,
    rx: Mutex<mpsc::Receiver<Work>>,
    started: AtomicBool,
}

impl Engine {
    /// Create an engine that routes through `broker`
    ///
    /// Uses [`RandomMatcher`] and discards metrics until configured
    /// otherwise. Workers do not run until [`start`](Self::start).
    pub fn new(broker: Arc<Broker>, config: EngineConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            broker,
            strategy: Arc::new(RandomMatcher),
            metrics: Arc::new(NoopRecorder),
            workers: config.workers.max(1),
            tx,
            rx: Mutex::new(rx),
            started: AtomicBool::new(false),
        }
    }

    /// Replace the match strategy
    pub fn with_strategy(mut self, strategy: Arc<dyn MatchStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Report drops through `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Spawn the worker pool
    ///
    /// Workers run until `shutdown` is cancelled. Calling this a second time
    /// spawns nothing and returns an empty pool.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> WorkerPool {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!("Matching engine already started");
            return WorkerPool {
                handles: Vec::new(),
            };
        }

        let handles = (0..self.workers)
            .map(|id| {
                let engine = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(
                    async move { engine.run_worker(shutdown).await }
                        .instrument(tracing::debug_span!("matching_worker", worker = id)),
                )
            })
            .collect();

        tracing::info!(workers = self.workers, "Matching engine started");
        WorkerPool { handles }
    }

    /// Queue an envelope for processing
    ///
    /// Never waits: if the queue is full or the engine has stopped the
    /// envelope is dropped and counted.
    pub fn submit(&self, session: &Arc<Session>, envelope: ClientEnvelope) {
        let work = Work {
            session: Arc::clone(session),
            envelope,
        };

        match self.tx.try_send(work) {
            Ok(()) => {}
            Err(TrySendError::Full(work)) => {
                self.metrics.dropped(DropReason::IngressSaturated);
                tracing::warn!(
                    user_id = %work.session.user_id(),
                    kind = work.envelope.label(),
                    "Ingress queue saturated"
                );
            }
            Err(TrySendError::Closed(work)) => {
                self.metrics.dropped(DropReason::EngineStopped);
                tracing::debug!(
                    user_id = %work.session.user_id(),
                    "Engine stopped, envelope dropped"
                );
            }
        }
    }

    /// Classify and route one envelope
    ///
    /// Returns the number of messages delivered to mailboxes as a result.
    pub fn process(&self, session: &Session, envelope: &ClientEnvelope) -> usize {
        match envelope {
            ClientEnvelope::Heartbeat(_) => {
                session.touch();
                0
            }
            ClientEnvelope::LocationUpdate(update) => self.handle_location(session, update),
            ClientEnvelope::RideStatusUpdate(status) => self.handle_status(session, status),
            ClientEnvelope::Unknown => {
                self.metrics.dropped(DropReason::Unroutable);
                tracing::debug!(session_id = %session.id(), "Discarding envelope");
                0
            }
        }
    }

    /// Fan a position out to other users hashed into the same zone bucket
    fn handle_location(&self, session: &Session, update: &LocationUpdate) -> usize {
        let zone = zone_key(update.latitude, update.longitude);
        let bucket = zone_bucket(&zone);
        let payload = LocationPayload::from(update).encode();
        let lamport = lamport_or_now(update.sequence);
        let sender = session.user_id();

        self.broker.broadcast(
            |target| target.user_id() != sender && user_bucket(target.user_id()) == bucket,
            |_| {
                ServerEnvelope::new(
                    uuid::Uuid::new_v4().to_string(),
                    lamport,
                    ServerBody::BroadcastEvent(BroadcastEvent {
                        topic: zone.clone(),
                        payload: payload.clone(),
                    }),
                )
            },
        )
    }

    /// Match on `Looking`, then acknowledge the update
    fn handle_status(&self, session: &Session, status: &RideStatusUpdate) -> usize {
        let user_id = session.user_id();
        let mut delivered = 0;

        if status.status == RideStatus::Looking {
            let event = self.strategy.propose(&status.ride_id, user_id);
            let msg = ServerEnvelope::new(
                status.ride_id.clone(),
                unix_nanos(),
                ServerBody::MatchEvent(event),
            );
            delivered += self.broker.send(user_id, msg);
        }

        let ack = ServerEnvelope::new(
            status.ride_id.clone(),
            lamport_or_now(status.sent_at_ms),
            ServerBody::Ack(Ack {
                correlation_id: status.ride_id.clone(),
                success: true,
                detail: "status applied".into(),
            }),
        );
        delivered + self.broker.send(user_id, ack)
    }

    async fn run_worker(&self, shutdown: CancellationToken) {
        loop {
            let work = tokio::select! {
                _ = shutdown.cancelled() => break,
                work = self.next_work() => work,
            };
            let Some(work) = work else {
                break;
            };
            self.process(&work.session, &work.envelope);
        }

        // Later submits observe a closed queue instead of filling it, and
        // anything still queued releases its session now.
        let mut rx = self.rx.lock().await;
        rx.close();
        while rx.try_recv().is_ok() {}
        tracing::debug!("Matching worker stopped");
    }

    async fn next_work(&self) -> Option<Work> {
        self.rx.lock().await.recv().await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("workers", &self.workers)
            .field("queue_capacity", &self.tx.max_capacity())
            .field("queued", &(self.tx.max_capacity() - self.tx.capacity()))
            .finish()
    }
}

/// Handles to running matching workers
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Number of workers spawned
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Matching worker panicked");
            }
        }
    }
}

/// Use `seed` as the ordering token, or the current time when unset
fn lamport_or_now(seed: i64) -> i64 {
    if seed == 0 {
        unix_nanos()
    } else {
        seed
    }
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}
