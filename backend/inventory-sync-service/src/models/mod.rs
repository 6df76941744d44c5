pub mod alert;
pub mod inventory;

pub use alert::{Alert, AlertKind, AlertSeverity};
pub use inventory::{InventoryChangeRecord, InventoryRecord, InventoryUpdate, Operation};
