//! Alert condition evaluation.
//!
//! Pure derivation from a record's current state:
//! `available == 0` is a critical out-of-stock; `0 < available <= threshold`
//! is a low-stock whose severity escalates as available approaches zero;
//! anything above threshold clears.

use chrono::{DateTime, Utc};

use crate::models::{Alert, AlertKind, AlertSeverity, InventoryRecord};

pub fn evaluate(record: &InventoryRecord, now: DateTime<Utc>) -> Option<Alert> {
    if record.available == 0 {
        return Some(Alert {
            product_id: record.product_id.clone(),
            kind: AlertKind::OutOfStock,
            severity: AlertSeverity::Critical,
            message: format!("{} is out of stock", record.product_id),
            actionable: true,
            created_at: now,
        });
    }

    if record.available <= record.low_stock_threshold {
        let severity = if record.available * 2 <= record.low_stock_threshold {
            AlertSeverity::High
        } else {
            AlertSeverity::Warning
        };
        return Some(Alert {
            product_id: record.product_id.clone(),
            kind: AlertKind::LowStock,
            severity,
            message: format!(
                "{} low on stock: {} available (threshold {})",
                record.product_id, record.available, record.low_stock_threshold
            ),
            actionable: true,
            created_at: now,
        });
    }

    None
}
