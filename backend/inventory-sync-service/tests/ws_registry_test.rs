//! Connection registry behavior: registration acks, channel fan-out and
//! heartbeat pruning, driven through in-process channels.

use axum::extract::ws::Message;
use chrono::Utc;
use inventory_sync_service::error::AppError;
use inventory_sync_service::websocket::{
    ClientIdentity, ConnectionRegistry, Envelope, SessionState,
};
use serde_json::json;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

async fn connect(registry: &ConnectionRegistry) -> (Uuid, UnboundedReceiver<Message>) {
    let (tx, rx) = unbounded_channel();
    let client_id = registry.register(tx, ClientIdentity::default()).await;
    (client_id, rx)
}

/// Drain the next JSON envelope, skipping protocol frames like pings.
fn next_envelope(rx: &mut UnboundedReceiver<Message>) -> Option<Envelope> {
    loop {
        match rx.try_recv() {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(text.as_str()).expect("valid envelope"))
            }
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

fn drain(rx: &mut UnboundedReceiver<Message>) {
    while rx.try_recv().is_ok() {}
}

#[tokio::test]
async fn register_acknowledges_with_client_id() {
    let registry = ConnectionRegistry::new();
    let (client_id, mut rx) = connect(&registry).await;

    let ack = next_envelope(&mut rx).expect("connection ack");
    assert_eq!(ack.kind, "connection");
    assert_eq!(
        ack.data.get("client_id").and_then(|v| v.as_str()),
        Some(client_id.to_string().as_str())
    );
    assert_eq!(ack.data.get("status").and_then(|v| v.as_str()), Some("connected"));
    assert_eq!(registry.connection_count().await, 1);
}

#[tokio::test]
async fn broadcast_reaches_only_subscribers() {
    let registry = ConnectionRegistry::new();
    let (alice, mut alice_rx) = connect(&registry).await;
    let (_bob, mut bob_rx) = connect(&registry).await;

    registry.subscribe(alice, "inventory").await.unwrap();
    let ack = next_envelope(&mut alice_rx).unwrap();
    // First frame was the connection ack.
    let ack = if ack.kind == "connection" {
        next_envelope(&mut alice_rx).unwrap()
    } else {
        ack
    };
    assert_eq!(ack.kind, "subscribed");
    assert_eq!(ack.channel(), Some("inventory"));
    drain(&mut bob_rx);

    let delivered = registry
        .broadcast("inventory", &Envelope::new("stock", json!({ "n": 1 })))
        .await;
    assert_eq!(delivered, 1);

    let received = next_envelope(&mut alice_rx).expect("subscriber message");
    assert_eq!(received.kind, "stock");
    assert!(next_envelope(&mut bob_rx).is_none(), "non-subscriber stays quiet");
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let registry = ConnectionRegistry::new();
    let (alice, mut rx) = connect(&registry).await;
    registry.subscribe(alice, "inventory").await.unwrap();
    registry.unsubscribe(alice, "inventory").await.unwrap();
    drain(&mut rx);

    let delivered = registry
        .broadcast("inventory", &Envelope::new("stock", json!({})))
        .await;
    assert_eq!(delivered, 0);
    assert!(next_envelope(&mut rx).is_none());
}

#[tokio::test]
async fn broadcast_all_ignores_subscriptions() {
    let registry = ConnectionRegistry::new();
    let (_alice, mut alice_rx) = connect(&registry).await;
    let (_bob, mut bob_rx) = connect(&registry).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    let delivered = registry
        .broadcast_all(&Envelope::new("announcement", json!({})))
        .await;
    assert_eq!(delivered, 2);
    assert_eq!(next_envelope(&mut alice_rx).unwrap().kind, "announcement");
    assert_eq!(next_envelope(&mut bob_rx).unwrap().kind, "announcement");
}

#[tokio::test]
async fn send_to_unknown_client_is_connection_gone() {
    let registry = ConnectionRegistry::new();
    let err = registry
        .send(Uuid::new_v4(), &Envelope::pong())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConnectionGone(_)));
}

#[tokio::test]
async fn dead_peer_is_pruned_without_breaking_fanout() {
    let registry = ConnectionRegistry::new();
    let (alice, mut alice_rx) = connect(&registry).await;
    let (bob, bob_rx) = connect(&registry).await;
    registry.subscribe(alice, "inventory").await.unwrap();
    registry.subscribe(bob, "inventory").await.unwrap();
    drain(&mut alice_rx);
    drop(bob_rx);

    let delivered = registry
        .broadcast("inventory", &Envelope::new("stock", json!({})))
        .await;
    assert_eq!(delivered, 1, "live subscriber still served");
    assert_eq!(registry.connection_count().await, 1);
    assert!(registry.session_state(bob).await.is_none());
}

#[tokio::test]
async fn heartbeat_prunes_after_two_missed_probes() {
    let registry = ConnectionRegistry::new();
    let (client_id, mut rx) = connect(&registry).await;
    registry.subscribe(client_id, "inventory").await.unwrap();

    // First sweep probes; the session is awaiting its ack.
    let pruned = registry.sweep(Utc::now()).await;
    assert!(pruned.is_empty());
    assert_eq!(
        registry.session_state(client_id).await,
        Some(SessionState::PendingAck)
    );

    // Second sweep fires with the probe still unacknowledged.
    let pruned = registry.sweep(Utc::now()).await;
    assert_eq!(pruned, vec![client_id]);
    assert!(registry.session_state(client_id).await.is_none());

    drain(&mut rx);
    let delivered = registry
        .broadcast("inventory", &Envelope::new("stock", json!({})))
        .await;
    assert_eq!(delivered, 0, "pruned session receives no further broadcasts");
}

#[tokio::test]
async fn acknowledged_probe_keeps_session_alive() {
    let registry = ConnectionRegistry::new();
    let (client_id, _rx) = connect(&registry).await;

    for _ in 0..3 {
        let pruned = registry.sweep(Utc::now()).await;
        assert!(pruned.is_empty());
        registry.mark_alive(client_id, Utc::now()).await;
        assert_eq!(
            registry.session_state(client_id).await,
            Some(SessionState::Open)
        );
    }
}

#[tokio::test]
async fn subscriptions_tracked_per_session() {
    let registry = ConnectionRegistry::new();
    let (client_id, _rx) = connect(&registry).await;

    registry.subscribe(client_id, "inventory").await.unwrap();
    registry.subscribe(client_id, "inventory:sku-1").await.unwrap();

    let channels = registry.session_channels(client_id).await.unwrap();
    assert!(channels.contains("inventory"));
    assert!(channels.contains("inventory:sku-1"));
    assert_eq!(registry.subscriber_count("inventory").await, 1);
    assert_eq!(registry.subscriber_count("inventory:sku-1").await, 1);
    assert_eq!(registry.subscriber_count("orders").await, 0);
}
