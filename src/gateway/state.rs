//! Shared gateway state

use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Kept alongside the dispatcher for health probes
    pub store: Arc<dyn LedgerStore>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, store: Arc<dyn LedgerStore>) -> Self {
        Self { dispatcher, store }
    }
}
