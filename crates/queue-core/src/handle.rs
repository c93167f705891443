//! The shared, cheaply-cloneable handle every `Job`, `Worker`, `Promoter`
//! and the `Queue` facade itself hold onto: one store connection-factory
//! and the event bus. Mirrors how the teacher's `Engine`/`EngineHandle`
//! split keeps a single `Arc`'d core shared across every spawned task.

use std::sync::Arc;

use crate::events::EventBus;
use crate::store::Store;

/// Shared core referenced by every `Job`, `Worker` and `Promoter`.
pub struct QueueHandle {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) bus: Arc<EventBus>,
}

impl QueueHandle {
    pub fn new(store: Arc<dyn Store>, process_id: impl Into<String>) -> Arc<Self> {
        let bus = Arc::new(EventBus::new(store.clone(), process_id));
        Arc::new(Self { store, bus })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}
