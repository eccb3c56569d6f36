//! Broadcast hub tests
//!
//! These drive the registry, lifecycle hooks and dispatcher directly, using the
//! outbound channels a real connection task would drain into its socket.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use sync_relay::connection_manager::{ConnectionHandle, ConnectionManager};
use sync_relay::relay::{self, CloseReason, RelayDispatcher};
use sync_relay::websocket::{close_code, Outbound, RelayFrame};

fn create_hub() -> (Arc<ConnectionManager>, RelayDispatcher) {
    let cm = Arc::new(ConnectionManager::new());
    let dispatcher = RelayDispatcher::new(cm.clone());
    (cm, dispatcher)
}

fn open(cm: &ConnectionManager, buffer: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(buffer);
    (relay::on_open(cm, tx).expect("registration should succeed"), rx)
}

fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<RelayFrame> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Outbound::Frame(frame) = msg {
            frames.push(frame);
        }
    }
    frames
}

fn sequence_number(frame: &RelayFrame) -> u32 {
    match frame {
        RelayFrame::Binary(bytes) => u32::from_be_bytes(bytes[..4].try_into().unwrap()),
        RelayFrame::Text(_) => panic!("unexpected text frame"),
    }
}

// =============================================================================
// Registry
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_get_distinct_ids() {
    let cm = Arc::new(ConnectionManager::new());
    let mut tasks = Vec::new();

    for _ in 0..16 {
        let cm = cm.clone();
        tasks.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            let mut receivers = Vec::new();
            for _ in 0..64 {
                let (tx, rx) = mpsc::channel(1);
                ids.push(cm.register(tx).unwrap().id);
                receivers.push(rx);
            }
            ids
        }));
    }

    let mut all = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(all.insert(id), "duplicate id {}", id);
        }
    }
    assert_eq!(all.len(), 16 * 64);
    assert_eq!(cm.len(), 16 * 64);
}

#[test]
fn unregister_twice_is_harmless() {
    let (cm, _dispatcher) = create_hub();
    let (a, _ra) = open(&cm, 4);
    let (b, _rb) = open(&cm, 4);

    assert!(relay::on_close(&cm, a.id, CloseReason::PeerClosed));
    assert!(!relay::on_close(&cm, a.id, CloseReason::PeerClosed));
    assert!(cm.unregister(a.id).is_none());

    assert_eq!(cm.len(), 1);
    assert!(cm.contains(b.id));
}

// =============================================================================
// Dispatch
// =============================================================================

#[test]
fn sender_is_excluded_from_broadcast() {
    let (cm, dispatcher) = create_hub();
    let (a, mut ra) = open(&cm, 8);
    let (_b, mut rb) = open(&cm, 8);
    let (_c, mut rc) = open(&cm, 8);

    let m = RelayFrame::text(r#"{"type":"drag","from":1,"to":3}"#);
    let result = dispatcher.dispatch(a.id, m.clone());

    assert_eq!(result.recipients, 2);
    assert_eq!(result.delivered, 2);
    assert_eq!(drain(&mut rb), vec![m.clone()]);
    assert_eq!(drain(&mut rc), vec![m]);
    assert!(drain(&mut ra).is_empty());
}

#[test]
fn closed_connection_receives_nothing() {
    let (cm, dispatcher) = create_hub();
    let (a, _ra) = open(&cm, 8);
    let (b, mut rb) = open(&cm, 8);
    let (_c, mut rc) = open(&cm, 8);

    relay::on_close(&cm, b.id, CloseReason::PeerClosed);

    let m2 = RelayFrame::binary(vec![0xde, 0xad, 0xbe, 0xef]);
    let result = dispatcher.dispatch(a.id, m2.clone());

    assert_eq!(result.recipients, 1);
    assert_eq!(drain(&mut rc), vec![m2]);
    assert!(drain(&mut rb).is_empty());
}

#[test]
fn frames_from_one_sender_arrive_in_order() {
    let (cm, dispatcher) = create_hub();
    let (a, _ra) = open(&cm, 256);
    let (_b, mut rb) = open(&cm, 256);

    let sent: Vec<RelayFrame> = (0..100).map(|i| RelayFrame::text(format!("m{}", i))).collect();
    for frame in &sent {
        dispatcher.dispatch(a.id, frame.clone());
    }

    assert_eq!(drain(&mut rb), sent);
}

#[test]
fn failed_recipient_does_not_affect_others() {
    let (cm, dispatcher) = create_hub();
    let (a, mut ra) = open(&cm, 8);
    let (b, rb) = open(&cm, 8);
    let (_c, mut rc) = open(&cm, 8);

    // B's writer is gone: sends to it fail
    drop(rb);

    let m = RelayFrame::text("rate:5");
    let result = dispatcher.dispatch(a.id, m.clone());

    assert_eq!(result.delivered, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.evicted, 1);
    assert_eq!(drain(&mut rc), vec![m]);
    assert!(drain(&mut ra).is_empty());
    assert!(!cm.contains(b.id));
    assert!(b.close_requested());

    // Later dispatches no longer address B
    let next = dispatcher.dispatch(a.id, RelayFrame::text("rate:4"));
    assert_eq!(next.recipients, 1);
    assert_eq!(next.failed, 0);
}

#[tokio::test]
async fn stalled_recipient_does_not_delay_later_frames() {
    let (cm, dispatcher) = create_hub();
    let dispatcher = Arc::new(dispatcher);
    let (a, _ra) = open(&cm, 8);
    let (stalled, _rs) = open(&cm, 1);
    let (_c, mut rc) = open(&cm, 8);

    // Fills the stalled peer's only slot; nobody drains it
    dispatcher.dispatch(a.id, RelayFrame::text("fill"));
    assert_eq!(rc.recv().await, Some(Outbound::Frame(RelayFrame::text("fill"))));

    // Consecutive frames from A, each dispatched after the previous one returns
    let sender_loop = {
        let dispatcher = dispatcher.clone();
        let sender_id = a.id;
        tokio::spawn(async move {
            let first = dispatcher.dispatch(sender_id, RelayFrame::text("m1"));
            let second = dispatcher.dispatch(sender_id, RelayFrame::text("m2"));
            (first, second)
        })
    };

    for expected in ["m1", "m2"] {
        let received = tokio::time::timeout(Duration::from_millis(100), rc.recv())
            .await
            .expect("C should not wait for the stalled peer");
        assert_eq!(received, Some(Outbound::Frame(RelayFrame::text(expected))));
    }

    let (first, second) = sender_loop.await.unwrap();
    assert_eq!(first.evicted, 1);
    assert_eq!(second.recipients, 1);
    assert_eq!(second.failed, 0);
    assert!(!cm.contains(stalled.id));
    assert_eq!(stalled.close_code(), Some(close_code::POLICY));
}

// =============================================================================
// Churn
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn churn_during_broadcast_keeps_registry_consistent() {
    let (cm, dispatcher) = create_hub();
    let dispatcher = Arc::new(dispatcher);
    let (a, _ra) = open(&cm, 8);
    let (_b, mut rb) = open(&cm, 512);

    // Closed before any dispatch: must never see a frame
    let (gone, mut rgone) = open(&cm, 512);
    relay::on_close(&cm, gone.id, CloseReason::PeerClosed);

    let sender = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            for i in 0..200u32 {
                dispatcher.dispatch(a.id, RelayFrame::binary(i.to_be_bytes().to_vec()));
                tokio::task::yield_now().await;
            }
        })
    };

    let mut churners = Vec::new();
    for _ in 0..4 {
        let cm = cm.clone();
        churners.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..50 {
                let (h, mut rx) = open(&cm, 512);
                tokio::task::yield_now().await;
                relay::on_close(&cm, h.id, CloseReason::PeerClosed);
                // Racing close triggers collapse into one removal
                assert!(!relay::on_close(&cm, h.id, CloseReason::TransportError));
                seen.push(drain(&mut rx));
            }
            seen
        }));
    }

    sender.await.unwrap();
    for churner in churners {
        for frames in churner.await.unwrap() {
            let seq: Vec<u32> = frames.iter().map(sequence_number).collect();
            assert!(
                seq.windows(2).all(|w| w[0] < w[1]),
                "duplicate or reordered delivery: {:?}",
                seq
            );
        }
    }

    let received = drain(&mut rb);
    let expected: Vec<RelayFrame> = (0..200u32)
        .map(|i| RelayFrame::binary(i.to_be_bytes().to_vec()))
        .collect();
    assert_eq!(received, expected);
    assert!(drain(&mut rgone).is_empty());

    // Only the two long-lived connections remain
    assert_eq!(cm.len(), 2);
}
