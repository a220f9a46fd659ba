use crate::broker::{BrokerConnection, LinkStatus};
use crate::ingestion::{IngestionCounters, IngestionStats};
use crate::simulation::registry::SessionRegistry;
use crate::store::StoreConnection;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct BridgeHealth {
    pub uptime_seconds: u64,
    pub broker_status: LinkStatus,
    pub broker_last_error: Option<String>,
    pub broker_clients_created: u64,
    pub store_connected: bool,
    pub sessions_open: usize,
    pub simulations_running: usize,
    pub ingestion: IngestionCounters,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    broker: BrokerConnection,
    store: StoreConnection,
    registry: SessionRegistry,
    ingestion: Arc<IngestionStats>,
}

impl HealthTracker {
    pub fn new(
        broker: BrokerConnection,
        store: StoreConnection,
        registry: SessionRegistry,
        ingestion: Arc<IngestionStats>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            broker,
            store,
            registry,
            ingestion,
        }
    }

    pub fn get_health(&self) -> BridgeHealth {
        BridgeHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            broker_status: self.broker.status(),
            broker_last_error: self.broker.last_error(),
            broker_clients_created: self.broker.clients_created(),
            store_connected: self.store.is_connected(),
            sessions_open: self.registry.session_count(),
            simulations_running: self.registry.running_count(),
            ingestion: self.ingestion.snapshot(),
        }
    }
}
