//! Per-product inventory state engine.
//!
//! All mutations for one product execute strictly one-at-a-time: `apply`
//! holds a per-product mutex across the whole read-modify-write cycle
//! against the persistence adapter, which otherwise offers no atomicity.
//! Updates for different products proceed concurrently.
//!
//! Side effects after the primary write are best-effort: a failed history
//! append or broadcast is logged and swallowed, never rolled back.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    Alert, AlertKind, InventoryChangeRecord, InventoryRecord, InventoryUpdate, Operation,
};
use crate::services::alerts;
use crate::services::telemetry::TelemetrySink;
use crate::storage::{self, KvStore};
use crate::supervisor::TaskSupervisor;
use crate::websocket::{ConnectionRegistry, DomainHandler, Envelope};

/// Channel carrying every inventory update.
pub const CHANNEL_INVENTORY: &str = "inventory";
/// Channel carrying stock alerts.
pub const CHANNEL_ALERTS: &str = "inventory_alerts";

/// Per-product update channel.
pub fn product_channel(product_id: &str) -> String {
    format!("inventory:{product_id}")
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_low_stock_threshold: i64,
    pub history_retention_days: i64,
    pub history_max_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_low_stock_threshold: 10,
            history_retention_days: 30,
            history_max_entries: 200,
        }
    }
}

impl From<&crate::config::Config> for EngineConfig {
    fn from(cfg: &crate::config::Config) -> Self {
        Self {
            default_low_stock_threshold: cfg.default_low_stock_threshold,
            history_retention_days: cfg.history_retention_days,
            history_max_entries: cfg.history_max_entries,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepSummary {
    pub checked: usize,
    pub low_stock: usize,
    pub out_of_stock: usize,
}

pub struct InventoryEngine {
    store: Arc<dyn KvStore>,
    registry: ConnectionRegistry,
    telemetry: Arc<dyn TelemetrySink>,
    config: EngineConfig,
    /// Active alerts, keyed by (product, kind). In-memory only; recomputed
    /// from persisted records at startup rather than restored from a
    /// snapshot.
    active_alerts: RwLock<HashMap<(String, AlertKind), Alert>>,
    /// Per-product guards serializing read-modify-write cycles. Grows with
    /// the tracked catalog, which is bounded.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InventoryEngine {
    pub fn new(
        store: Arc<dyn KvStore>,
        registry: ConnectionRegistry,
        telemetry: Arc<dyn TelemetrySink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            telemetry,
            config,
            active_alerts: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a product. Fails if the product already has a record.
    pub async fn create(
        &self,
        product_id: &str,
        quantity: i64,
        low_stock_threshold: Option<i64>,
        actor: &str,
    ) -> AppResult<InventoryRecord> {
        if product_id.trim().is_empty() {
            return Err(AppError::Validation("product_id must not be empty".into()));
        }
        if quantity < 0 {
            return Err(AppError::Validation("quantity must be non-negative".into()));
        }
        if low_stock_threshold.is_some_and(|t| t < 0) {
            return Err(AppError::Validation("low_stock_threshold must be non-negative".into()));
        }

        let lock = self.lock_for(product_id).await;
        let _guard = lock.lock().await;

        if self.load(product_id).await?.is_some() {
            return Err(AppError::Validation(format!(
                "product {product_id} is already tracked"
            )));
        }

        let record = InventoryRecord::new(
            product_id,
            quantity,
            low_stock_threshold.unwrap_or(self.config.default_low_stock_threshold),
            actor,
        );
        self.persist(&record).await?;

        if let Err(e) = self.index_add(product_id).await {
            tracing::warn!(product_id, error = %e, "product index update failed");
        }
        self.append_history(InventoryChangeRecord {
            product_id: record.product_id.clone(),
            delta: quantity,
            operation: Operation::Set,
            reason: "tracking started".into(),
            actor: actor.into(),
            order_ref: None,
            timestamp: record.last_updated,
        })
        .await;
        self.refresh_alert(&record, true).await;

        self.telemetry
            .record(
                "inventory.tracked",
                json!({ "product_id": product_id, "quantity": quantity }),
            )
            .await;
        Ok(record)
    }

    /// Fetch the current record for a product.
    pub async fn get(&self, product_id: &str) -> AppResult<InventoryRecord> {
        self.load(product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(product_id.to_string()))
    }

    /// The bounded change history for a product, oldest first.
    pub async fn history(&self, product_id: &str) -> AppResult<Vec<InventoryChangeRecord>> {
        // Surface unknown products the same way `get` does.
        self.get(product_id).await?;
        let raw = self.store.get(&storage::history_key(product_id)).await?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Apply one update. On success the record is durably persisted and the
    /// new state has been offered to every subscriber of `inventory` and
    /// `inventory:<product_id>`. On failure no state was mutated.
    pub async fn apply(&self, update: InventoryUpdate) -> AppResult<InventoryRecord> {
        if update.quantity < 0 {
            return Err(AppError::Validation("quantity must be non-negative".into()));
        }

        let lock = self.lock_for(&update.product_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .load(&update.product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(update.product_id.clone()))?;

        let quantity_before = record.quantity;
        let reserved_before = record.reserved;
        let available_before = record.available;
        let n = update.quantity;

        match update.operation {
            Operation::Add => record.quantity += n,
            Operation::Subtract => record.quantity = (record.quantity - n).max(0),
            Operation::Reserve => {
                if n > available_before {
                    metrics::INVENTORY_UPDATES_TOTAL
                        .with_label_values(&[update.operation.as_str(), "rejected"])
                        .inc();
                    return Err(AppError::InvalidOperation(format!(
                        "cannot reserve {n} of {}: only {available_before} available",
                        update.product_id
                    )));
                }
                record.reserved += n;
            }
            Operation::Release => record.reserved = (record.reserved - n).max(0),
            Operation::Set => record.quantity = n,
            // Atomic reserve-consumption: decrement both sides in one
            // serialized step so no compensating call is needed.
            Operation::Fulfill => {
                record.reserved = (record.reserved - n).max(0);
                record.quantity = (record.quantity - n).max(0);
            }
        }
        record.recompute_available();
        record.last_updated = Utc::now();
        record.last_updated_by = update.actor.clone();

        // Primary write: a failure here fails the whole operation and no
        // partial state survives.
        if let Err(e) = self.persist(&record).await {
            metrics::INVENTORY_UPDATES_TOTAL
                .with_label_values(&[update.operation.as_str(), "error"])
                .inc();
            return Err(e);
        }

        // Secondary steps are best-effort from here on.
        let delta = match update.operation {
            Operation::Add | Operation::Subtract | Operation::Set | Operation::Fulfill => {
                record.quantity - quantity_before
            }
            Operation::Reserve | Operation::Release => record.reserved - reserved_before,
        };
        self.append_history(InventoryChangeRecord {
            product_id: update.product_id.clone(),
            delta,
            operation: update.operation,
            reason: update.reason.clone(),
            actor: update.actor.clone(),
            order_ref: update.order_ref.clone(),
            timestamp: record.last_updated,
        })
        .await;
        self.refresh_alert(&record, true).await;
        let recipients = self.broadcast_update(&record, &update).await;

        metrics::INVENTORY_UPDATES_TOTAL
            .with_label_values(&[update.operation.as_str(), "applied"])
            .inc();
        self.telemetry
            .record(
                "inventory.update.applied",
                json!({
                    "product_id": update.product_id,
                    "operation": update.operation.as_str(),
                    "delta": delta,
                    "available": record.available,
                    "recipients": recipients,
                }),
            )
            .await;

        Ok(record)
    }

    /// Snapshot of active alerts, ordered by product id.
    pub async fn active_alerts(&self) -> Vec<Alert> {
        let active = self.active_alerts.read().await;
        let mut alerts: Vec<Alert> = active.values().cloned().collect();
        alerts.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        alerts
    }

    /// Recompute active alerts from persisted records. Called once at
    /// startup; stored alert snapshots are never trusted.
    pub async fn recover_alerts(&self) -> AppResult<usize> {
        let index = self.load_index().await?;
        for product_id in &index {
            match self.load(product_id).await {
                Ok(Some(record)) => self.refresh_alert(&record, false).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(%product_id, error = %e, "alert recovery skipped product")
                }
            }
        }
        let count = self.active_alerts.read().await.len();
        self.telemetry
            .record(
                "inventory.alerts.recovered",
                json!({ "tracked": index.len(), "active": count }),
            )
            .await;
        Ok(count)
    }

    /// One alert-condition pass over every tracked record. Reads only; the
    /// records themselves are never mutated here.
    pub async fn sweep(&self) -> AppResult<SweepSummary> {
        let index = self.load_index().await?;
        let mut summary = SweepSummary::default();
        for product_id in &index {
            match self.load(product_id).await {
                Ok(Some(record)) => {
                    summary.checked += 1;
                    if record.available == 0 {
                        summary.out_of_stock += 1;
                    } else if record.available <= record.low_stock_threshold {
                        summary.low_stock += 1;
                    }
                    self.refresh_alert(&record, false).await;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%product_id, error = %e, "sweep skipped product"),
            }
        }
        self.telemetry
            .record("inventory.sweep.completed", json!(summary))
            .await;
        Ok(summary)
    }

    /// Spawn the fixed-interval alert sweep.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> TaskSupervisor {
        let engine = Arc::clone(self);
        TaskSupervisor::spawn("alert-sweep", interval, move || {
            let engine = engine.clone();
            async move {
                if let Err(e) = engine.sweep().await {
                    tracing::warn!(error = %e, "alert sweep failed");
                }
            }
        })
    }

    async fn lock_for(&self, product_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(product_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, product_id: &str) -> AppResult<Option<InventoryRecord>> {
        let raw = self.store.get(&storage::item_key(product_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn persist(&self, record: &InventoryRecord) -> AppResult<()> {
        let json = serde_json::to_string(record)?;
        self.store
            .set(&storage::item_key(&record.product_id), &json, None)
            .await?;
        Ok(())
    }

    async fn load_index(&self) -> AppResult<BTreeSet<String>> {
        let raw = self.store.get(storage::INDEX_KEY).await?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(BTreeSet::new()),
        }
    }

    async fn index_add(&self, product_id: &str) -> AppResult<()> {
        let mut index = self.load_index().await?;
        if index.insert(product_id.to_string()) {
            let json = serde_json::to_string(&index)?;
            self.store.set(storage::INDEX_KEY, &json, None).await?;
        }
        Ok(())
    }

    async fn append_history(&self, entry: InventoryChangeRecord) {
        let product_id = entry.product_id.clone();
        if let Err(e) = self.try_append_history(entry).await {
            tracing::warn!(
                %product_id,
                error = %e,
                "history append failed; primary update already durable"
            );
        }
    }

    async fn try_append_history(&self, entry: InventoryChangeRecord) -> AppResult<()> {
        let key = storage::history_key(&entry.product_id);
        let mut entries: Vec<InventoryChangeRecord> = match self.store.get(&key).await? {
            Some(json) => serde_json::from_str(&json).unwrap_or_default(),
            None => Vec::new(),
        };
        entries.push(entry);

        let cutoff = Utc::now() - ChronoDuration::days(self.config.history_retention_days);
        entries.retain(|e| e.timestamp >= cutoff);
        if entries.len() > self.config.history_max_entries {
            let excess = entries.len() - self.config.history_max_entries;
            entries.drain(..excess);
        }

        let ttl = (self.config.history_retention_days.max(1) as u64) * 24 * 60 * 60;
        self.store
            .set(&key, &serde_json::to_string(&entries)?, Some(ttl))
            .await?;
        Ok(())
    }

    /// Reconcile the alert map with a record's current state and, when the
    /// alert is new or escalated, broadcast it.
    async fn refresh_alert(&self, record: &InventoryRecord, broadcast: bool) {
        let desired = alerts::evaluate(record, Utc::now());
        let product = record.product_id.clone();
        let mut to_broadcast: Option<Alert> = None;

        {
            let mut active = self.active_alerts.write().await;
            match desired {
                Some(alert) => {
                    let superseded = match alert.kind {
                        AlertKind::LowStock => AlertKind::OutOfStock,
                        AlertKind::OutOfStock => AlertKind::LowStock,
                    };
                    active.remove(&(product.clone(), superseded));

                    let key = (product.clone(), alert.kind);
                    let changed = active
                        .get(&key)
                        .map(|existing| existing.severity != alert.severity)
                        .unwrap_or(true);
                    active.insert(key, alert.clone());
                    if changed {
                        to_broadcast = Some(alert);
                    }
                }
                None => {
                    let cleared = active.remove(&(product.clone(), AlertKind::LowStock)).is_some()
                        | active.remove(&(product.clone(), AlertKind::OutOfStock)).is_some();
                    if cleared {
                        tracing::info!(product_id = %product, "stock alert cleared");
                    }
                }
            }

            let low = active.keys().filter(|(_, k)| *k == AlertKind::LowStock).count();
            let out = active.keys().filter(|(_, k)| *k == AlertKind::OutOfStock).count();
            metrics::ACTIVE_ALERTS
                .with_label_values(&["low_stock"])
                .set(low as i64);
            metrics::ACTIVE_ALERTS
                .with_label_values(&["out_of_stock"])
                .set(out as i64);
        }

        if broadcast {
            if let Some(alert) = to_broadcast {
                let delivered = self
                    .registry
                    .broadcast(CHANNEL_ALERTS, &Envelope::inventory_alert(&alert))
                    .await;
                tracing::info!(
                    product_id = %alert.product_id,
                    kind = ?alert.kind,
                    severity = ?alert.severity,
                    delivered,
                    "stock alert raised"
                );
            }
        }
    }

    async fn broadcast_update(&self, record: &InventoryRecord, update: &InventoryUpdate) -> usize {
        let envelope = Envelope::inventory_update(record, update);
        let mut recipients = self.registry.broadcast(CHANNEL_INVENTORY, &envelope).await;
        recipients += self
            .registry
            .broadcast(&product_channel(&record.product_id), &envelope)
            .await;
        recipients
    }
}

#[async_trait]
impl DomainHandler for InventoryEngine {
    fn message_type(&self) -> &'static str {
        "inventory_update"
    }

    async fn handle(&self, client_id: Uuid, envelope: Envelope) -> AppResult<()> {
        let update: InventoryUpdate = serde_json::from_value(envelope.data)
            .map_err(|e| AppError::InvalidOperation(format!("malformed inventory update: {e}")))?;
        tracing::debug!(
            %client_id,
            product_id = %update.product_id,
            operation = update.operation.as_str(),
            "inventory update via websocket"
        );
        self.apply(update).await?;
        Ok(())
    }
}
