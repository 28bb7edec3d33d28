use crate::{config::Config, store::ReceiptStore, websocket::ConnectionRegistry};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReceiptStore>,
    pub registry: ConnectionRegistry,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn ReceiptStore>, config: Arc<Config>) -> Self {
        Self {
            store,
            registry: ConnectionRegistry::new(),
            config,
        }
    }
}
