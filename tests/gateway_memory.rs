//! Gateway tests over in-process channels

use std::sync::Arc;
use std::time::Duration;

use ride_stream::protocol::{Heartbeat, RideStatus, RideStatusUpdate};
use ride_stream::{
    Broker, ClientEnvelope, Engine, EngineConfig, Gateway, GatewayMetrics, Outgoing,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Stack {
    broker: Arc<Broker>,
    gateway: Gateway,
    metrics: Arc<GatewayMetrics>,
    root: CancellationToken,
}

fn stack(max_sessions: usize) -> Stack {
    let metrics = Arc::new(GatewayMetrics::new());
    let broker = Arc::new(Broker::with_metrics(8, max_sessions, metrics.clone()));
    let engine = Arc::new(
        Engine::new(Arc::clone(&broker), EngineConfig::default().workers(4))
            .with_metrics(metrics.clone()),
    );
    let root = CancellationToken::new();
    engine.start(root.clone());
    let gateway = Gateway::new(Arc::clone(&broker), engine, root.clone())
        .with_metrics(metrics.clone())
        .mailbox_capacity(16);

    Stack {
        broker,
        gateway,
        metrics,
        root,
    }
}

async fn settle(broker: &Broker, n: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while broker.session_count() != n {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("session count never settled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_connections_detach_exactly_once() {
    let stack = stack(1000);
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut tasks = Vec::new();

    for i in 0..50 {
        let (in_tx, in_rx) = mpsc::channel::<ClientEnvelope>(4);
        let (out_tx, out_rx) = mpsc::channel::<Outgoing>(4);
        let gateway = stack.gateway.clone();
        // Several connections share each user ID
        let user = format!("rider-{}", i % 10);
        tasks.push(tokio::spawn(async move { gateway.serve(&user, in_rx, out_tx).await }));
        inputs.push(in_tx);
        outputs.push(out_rx);
    }
    settle(&stack.broker, 50).await;
    assert_eq!(stack.broker.sessions_of("rider-3").len(), 5);

    // Half end from the client side, half fail on the first write
    let mut open_inputs = Vec::new();
    let mut open_outputs = Vec::new();
    for (i, (input, output)) in inputs.into_iter().zip(outputs).enumerate() {
        if i % 2 == 0 {
            drop(input);
            open_outputs.push(output);
        } else {
            drop(output);
            input
                .send(ClientEnvelope::RideStatusUpdate(RideStatusUpdate {
                    ride_id: format!("r{}", i),
                    user_id: String::new(),
                    status: RideStatus::Completed,
                    sent_at_ms: 0,
                }))
                .await
                .unwrap();
            open_inputs.push(input);
        }
    }

    for task in tasks {
        let _ = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("serve did not return")
            .unwrap();
    }

    assert_eq!(stack.broker.session_count(), 0);
    assert_eq!(stack.broker.indexed_sessions(), 0);
    let snapshot = stack.metrics.snapshot();
    assert_eq!(snapshot.sessions_total, 50);
    assert_eq!(snapshot.sessions_closed, 50);
    assert_eq!(snapshot.active_sessions, 0);
    stack.root.cancel();
}

#[tokio::test]
async fn test_reaper_closes_silent_connection() {
    let stack = stack(10);
    let (_in_tx, in_rx) = mpsc::channel::<ClientEnvelope>(4);
    let (out_tx, _out_rx) = mpsc::channel::<Outgoing>(4);

    let gateway = stack.gateway.clone();
    let task = tokio::spawn(async move { gateway.serve("rider-1", in_rx, out_tx).await });
    settle(&stack.broker, 1).await;

    let reaper = stack.broker.spawn_reaper(
        Duration::from_millis(10),
        Duration::from_millis(30),
        stack.root.clone(),
    );

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("reaped session did not end serve")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(stack.broker.session_count(), 0);

    let snapshot = stack.metrics.snapshot();
    assert_eq!(snapshot.heartbeat_misses, 1);
    assert_eq!(snapshot.sessions_closed, 1);

    stack.root.cancel();
    reaper.await.unwrap();
}

#[tokio::test]
async fn test_heartbeats_keep_connection_alive() {
    let stack = stack(10);
    let (in_tx, in_rx) = mpsc::channel::<ClientEnvelope>(4);
    let (out_tx, _out_rx) = mpsc::channel::<Outgoing>(4);

    let gateway = stack.gateway.clone();
    let task = tokio::spawn(async move { gateway.serve("rider-1", in_rx, out_tx).await });
    settle(&stack.broker, 1).await;

    let reaper = stack.broker.spawn_reaper(
        Duration::from_millis(10),
        Duration::from_millis(80),
        stack.root.clone(),
    );

    for seq in 0..10 {
        in_tx
            .send(ClientEnvelope::Heartbeat(Heartbeat {
                user_id: "rider-1".into(),
                seq,
                sent_at_ms: 0,
            }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(stack.broker.session_count(), 1);
    assert_eq!(stack.metrics.snapshot().heartbeat_misses, 0);
    assert_eq!(stack.metrics.snapshot().ingress_of("heartbeat"), 10);

    stack.root.cancel();
    task.await.unwrap().unwrap();
    reaper.await.unwrap();
}
