//! Telemetry sink boundary.
//!
//! The engine reports named, timestamped events with JSON metadata. The
//! sink itself is an external collaborator; the default implementation
//! writes structured log lines under the `telemetry` target.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: &str, metadata: Value);
}

#[derive(Default)]
pub struct TracingTelemetry;

#[async_trait]
impl TelemetrySink for TracingTelemetry {
    async fn record(&self, event: &str, metadata: Value) {
        tracing::info!(
            target: "telemetry",
            event,
            timestamp = Utc::now().timestamp_millis(),
            metadata = %metadata,
        );
    }
}
