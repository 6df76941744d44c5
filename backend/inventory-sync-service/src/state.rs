use std::sync::Arc;

use crate::config::Config;
use crate::services::InventoryEngine;
use crate::websocket::{ConnectionRegistry, MessageDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub engine: Arc<InventoryEngine>,
    pub dispatcher: Arc<MessageDispatcher>,
}
