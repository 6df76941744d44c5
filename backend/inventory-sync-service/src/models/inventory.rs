//! Inventory state and update types.
//!
//! `available` is always derived from `quantity` and `reserved`; nothing in
//! this crate assigns it directly. All arithmetic is integer and clamps at
//! zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A quantity/reservation mutation kind.
///
/// `Fulfill` is the atomic variant of the reserve-then-subtract saga: it
/// consumes a prior reservation and decrements on-hand stock in one
/// serialized step, so callers no longer need to compensate manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Add,
    Subtract,
    Reserve,
    Release,
    Set,
    Fulfill,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Reserve => "reserve",
            Operation::Release => "release",
            Operation::Set => "set",
            Operation::Fulfill => "fulfill",
        }
    }
}

/// Current per-product stock state, as persisted under
/// `inventory:item:<product_id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: String,
    /// On-hand quantity.
    pub quantity: i64,
    /// Stock held against pending orders.
    pub reserved: i64,
    /// Derived: `max(0, quantity - reserved)`.
    pub available: i64,
    pub low_stock_threshold: i64,
    pub last_updated: DateTime<Utc>,
    pub last_updated_by: String,
}

impl InventoryRecord {
    pub fn new(product_id: impl Into<String>, quantity: i64, threshold: i64, actor: impl Into<String>) -> Self {
        let mut record = Self {
            product_id: product_id.into(),
            quantity,
            reserved: 0,
            available: 0,
            low_stock_threshold: threshold,
            last_updated: Utc::now(),
            last_updated_by: actor.into(),
        };
        record.recompute_available();
        record
    }

    pub fn recompute_available(&mut self) {
        self.available = (self.quantity - self.reserved).max(0);
    }
}

/// A requested mutation, as submitted over the admin API or an
/// `inventory_update` websocket envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub product_id: String,
    pub quantity: i64,
    pub operation: Operation,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_ref: Option<String>,
}

/// Append-only history entry, persisted as a bounded list under
/// `inventory:history:<product_id>`.
///
/// `delta` is the signed change of the field the operation touches:
/// on-hand quantity for `add`/`subtract`/`set`/`fulfill`, reserved stock for
/// `reserve`/`release`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryChangeRecord {
    pub product_id: String,
    pub delta: i64,
    pub operation: Operation,
    pub reason: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_derives_available() {
        let record = InventoryRecord::new("sku-1", 10, 3, "test");
        assert_eq!(record.quantity, 10);
        assert_eq!(record.reserved, 0);
        assert_eq!(record.available, 10);
    }

    #[test]
    fn available_clamps_at_zero() {
        let mut record = InventoryRecord::new("sku-1", 2, 3, "test");
        record.reserved = 5;
        record.recompute_available();
        assert_eq!(record.available, 0);
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = InventoryRecord::new("sku-42", 17, 5, "warehouse");
        let json = serde_json::to_string(&record).unwrap();
        let reloaded: InventoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, reloaded);
    }

    #[test]
    fn operation_names_use_snake_case() {
        let json = serde_json::to_string(&Operation::Reserve).unwrap();
        assert_eq!(json, "\"reserve\"");
        let parsed: Operation = serde_json::from_str("\"fulfill\"").unwrap();
        assert_eq!(parsed, Operation::Fulfill);
    }

    #[test]
    fn unrecognized_operation_fails_to_parse() {
        let parsed = serde_json::from_str::<Operation>("\"increment\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn update_accepts_missing_optional_fields() {
        let update: InventoryUpdate =
            serde_json::from_str(r#"{"product_id":"sku-1","quantity":3,"operation":"add"}"#)
                .unwrap();
        assert_eq!(update.quantity, 3);
        assert!(update.order_ref.is_none());
        assert!(update.reason.is_empty());
    }
}
