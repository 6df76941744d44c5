pub mod alerts;
pub mod inventory_engine;
pub mod telemetry;

pub use inventory_engine::{EngineConfig, InventoryEngine, SweepSummary};
pub use telemetry::{TelemetrySink, TracingTelemetry};
