//! Domain message dispatch.
//!
//! Pluggable handlers for domain envelope types, registered once at startup.
//! The builder style mirrors the processor registry of the message bus this
//! service grew out of.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::websocket::message_types::Envelope;

/// A handler for one domain envelope type (e.g. `inventory_update`).
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// The envelope `type` this handler consumes.
    fn message_type(&self) -> &'static str;

    /// Process one inbound envelope from `client_id`. Errors are reported
    /// back to the sender as an `error{message}` envelope; the connection
    /// stays open.
    async fn handle(&self, client_id: Uuid, envelope: Envelope) -> AppResult<()>;
}

#[derive(Default)]
pub struct MessageDispatcher {
    handlers: HashMap<&'static str, Arc<dyn DomainHandler>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn DomainHandler>) -> Self {
        self.handlers.insert(handler.message_type(), handler);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn DomainHandler>> {
        self.handlers.get(kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DomainHandler for CountingHandler {
        fn message_type(&self) -> &'static str {
            "test_event"
        }

        async fn handle(&self, _client_id: Uuid, _envelope: Envelope) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = MessageDispatcher::new().register(handler.clone());

        let found = dispatcher.get("test_event").expect("handler registered");
        found
            .handle(Uuid::new_v4(), Envelope::new("test_event", serde_json::Value::Null))
            .await
            .unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(dispatcher.get("unknown_event").is_none());
    }

    struct FailingHandler;

    #[async_trait]
    impl DomainHandler for FailingHandler {
        fn message_type(&self) -> &'static str {
            "boom"
        }

        async fn handle(&self, _client_id: Uuid, _envelope: Envelope) -> AppResult<()> {
            Err(AppError::InvalidOperation("boom".into()))
        }
    }

    #[tokio::test]
    async fn handler_errors_surface_to_caller() {
        let dispatcher = MessageDispatcher::new().register(Arc::new(FailingHandler));
        let handler = dispatcher.get("boom").unwrap();
        let err = handler
            .handle(Uuid::new_v4(), Envelope::new("boom", serde_json::Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidOperation(_)));
    }
}
