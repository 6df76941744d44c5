//! Engine + registry collaboration: applied updates fan out to subscribed
//! connections, alerts reach the alert channel, and websocket-borne updates
//! flow through the domain dispatcher.

use std::sync::Arc;

use axum::extract::ws::Message;
use inventory_sync_service::models::{InventoryUpdate, Operation};
use inventory_sync_service::services::{EngineConfig, InventoryEngine, TracingTelemetry};
use inventory_sync_service::storage::MemoryStore;
use inventory_sync_service::websocket::{
    ClientIdentity, ConnectionRegistry, DomainHandler, Envelope, MessageDispatcher,
};
use serde_json::json;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

fn build_engine(registry: ConnectionRegistry) -> Arc<InventoryEngine> {
    Arc::new(InventoryEngine::new(
        Arc::new(MemoryStore::new()),
        registry,
        Arc::new(TracingTelemetry),
        EngineConfig::default(),
    ))
}

async fn connect(registry: &ConnectionRegistry) -> (Uuid, UnboundedReceiver<Message>) {
    let (tx, rx) = unbounded_channel();
    let client_id = registry.register(tx, ClientIdentity::default()).await;
    (client_id, rx)
}

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

fn update(product_id: &str, quantity: i64, operation: Operation) -> InventoryUpdate {
    InventoryUpdate {
        product_id: product_id.into(),
        quantity,
        operation,
        reason: "test".into(),
        actor: "tester".into(),
        order_ref: None,
    }
}

#[tokio::test]
async fn apply_delivers_exactly_one_update_to_inventory_subscriber() {
    let registry = ConnectionRegistry::new();
    let engine = build_engine(registry.clone());
    engine.create("sku-1", 20, Some(2), "seed").await.unwrap();

    let (client_id, mut rx) = connect(&registry).await;
    registry.subscribe(client_id, "inventory").await.unwrap();
    drain(&mut rx);

    engine.apply(update("sku-1", 3, Operation::Add)).await.unwrap();

    let env = next_envelope(&mut rx).expect("inventory update frame");
    assert_eq!(env.kind, "inventory_update");
    assert_eq!(
        env.data.pointer("/item/product_id").and_then(|v| v.as_str()),
        Some("sku-1")
    );
    assert_eq!(
        env.data.pointer("/update/operation").and_then(|v| v.as_str()),
        Some("add")
    );
    assert!(
        next_envelope(&mut rx).is_none(),
        "exactly one frame per update on this channel"
    );
}

#[tokio::test]
async fn per_product_channel_receives_only_its_product() {
    let registry = ConnectionRegistry::new();
    let engine = build_engine(registry.clone());
    engine.create("sku-1", 20, None, "seed").await.unwrap();
    engine.create("sku-2", 20, None, "seed").await.unwrap();

    let (client_id, mut rx) = connect(&registry).await;
    registry.subscribe(client_id, "inventory:sku-1").await.unwrap();
    drain(&mut rx);

    engine.apply(update("sku-2", 1, Operation::Add)).await.unwrap();
    assert!(next_envelope(&mut rx).is_none(), "other product is silent");

    engine.apply(update("sku-1", 1, Operation::Add)).await.unwrap();
    let env = next_envelope(&mut rx).expect("own product update");
    assert_eq!(
        env.data.pointer("/item/product_id").and_then(|v| v.as_str()),
        Some("sku-1")
    );
}

#[tokio::test]
async fn low_stock_alert_broadcasts_on_alert_channel() {
    let registry = ConnectionRegistry::new();
    let engine = build_engine(registry.clone());
    engine.create("sku-1", 5, Some(3), "seed").await.unwrap();

    let (client_id, mut rx) = connect(&registry).await;
    registry.subscribe(client_id, "inventory_alerts").await.unwrap();
    drain(&mut rx);

    engine.apply(update("sku-1", 3, Operation::Reserve)).await.unwrap();

    let env = next_envelope(&mut rx).expect("alert frame");
    assert_eq!(env.kind, "inventory_alert");
    assert_eq!(
        env.data.pointer("/alert/product_id").and_then(|v| v.as_str()),
        Some("sku-1")
    );
    assert_eq!(
        env.data.pointer("/alert/kind").and_then(|v| v.as_str()),
        Some("low_stock")
    );
}

#[tokio::test]
async fn rejected_reserve_broadcasts_nothing() {
    let registry = ConnectionRegistry::new();
    let engine = build_engine(registry.clone());
    engine.create("sku-1", 2, None, "seed").await.unwrap();

    let (client_id, mut rx) = connect(&registry).await;
    registry.subscribe(client_id, "inventory").await.unwrap();
    drain(&mut rx);

    assert!(engine.apply(update("sku-1", 5, Operation::Reserve)).await.is_err());
    assert!(next_envelope(&mut rx).is_none(), "no fan-out on rejection");
}

#[tokio::test]
async fn dispatcher_routes_inventory_updates_from_the_wire() {
    let registry = ConnectionRegistry::new();
    let engine = build_engine(registry.clone());
    engine.create("sku-1", 10, None, "seed").await.unwrap();
    let dispatcher = MessageDispatcher::new().register(engine.clone());

    let envelope = Envelope::new(
        "inventory_update",
        json!({
            "product_id": "sku-1",
            "quantity": 4,
            "operation": "reserve",
            "reason": "checkout",
            "actor": "cart-service",
            "order_ref": "order-99"
        }),
    );

    let handler = dispatcher.get("inventory_update").expect("registered");
    handler.handle(Uuid::new_v4(), envelope).await.unwrap();

    let record = engine.get("sku-1").await.unwrap();
    assert_eq!(record.reserved, 4);
    assert_eq!(record.available, 6);

    let history = engine.history("sku-1").await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.order_ref.as_deref(), Some("order-99"));
    assert_eq!(last.delta, 4);
}

#[tokio::test]
async fn malformed_domain_payload_is_invalid_operation() {
    let registry = ConnectionRegistry::new();
    let engine = build_engine(registry.clone());
    let dispatcher = MessageDispatcher::new().register(engine.clone());

    let handler = dispatcher.get("inventory_update").unwrap();
    let err = handler
        .handle(
            Uuid::new_v4(),
            Envelope::new("inventory_update", json!({ "product_id": "sku-1" })),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        inventory_sync_service::error::AppError::InvalidOperation(_)
    ));
}

#[tokio::test]
async fn checkout_saga_with_compensation() {
    // reserve -> downstream failure -> release leaves stock untouched
    let registry = ConnectionRegistry::new();
    let engine = build_engine(registry.clone());
    engine.create("sku-1", 10, None, "seed").await.unwrap();

    engine.apply(update("sku-1", 4, Operation::Reserve)).await.unwrap();
    let released = engine.apply(update("sku-1", 4, Operation::Release)).await.unwrap();

    assert_eq!(released.quantity, 10);
    assert_eq!(released.reserved, 0);
    assert_eq!(released.available, 10);
}
