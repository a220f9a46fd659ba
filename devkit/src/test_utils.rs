/*!
Test Harness du bridge

Assemble le cœur complet (broker, base, ingestion, sessions, health) sur les
doubles du devkit, avec des helpers pour piloter des sessions de test.
*/

use crate::mqtt_stub::MockBrokerConnector;
use crate::store_stub::{MemoryStore, MockStoreConnector};
use std::sync::Arc;
use std::time::Duration;
use telemetry_bridge::broker::BrokerConnection;
use telemetry_bridge::health::HealthTracker;
use telemetry_bridge::ingestion::{IngestionError, IngestionPipeline};
use telemetry_bridge::simulation::protocol::SessionEvent;
use telemetry_bridge::simulation::registry::{SessionId, SessionRegistry};
use telemetry_bridge::simulation::SimulationScheduler;
use telemetry_bridge::store::StoreConnection;
use tokio::sync::mpsc;

pub const TEST_TOPIC: &str = "readings";
pub const TEST_COLLECTION: &str = "readings";
pub const TEST_PERIOD: Duration = Duration::from_millis(5_000);

pub struct TestHarness {
    pub broker_connector: MockBrokerConnector,
    pub store_connector: MockStoreConnector,
    pub broker: BrokerConnection,
    pub store: StoreConnection,
    pub registry: SessionRegistry,
    pub scheduler: SimulationScheduler,
    pub pipeline: IngestionPipeline,
    pub health: HealthTracker,
}

/// Une session ouverte et la file de ses événements sortants
pub struct TestSession {
    pub id: SessionId,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl TestSession {
    /// Tous les événements déjà émis, dans l'ordre
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_connector(MockBrokerConnector::new())
    }

    /// Harness dont les clients broker se connectent d'eux-mêmes
    pub fn auto_connecting() -> Self {
        Self::with_connector(MockBrokerConnector::auto_connecting())
    }

    fn with_connector(broker_connector: MockBrokerConnector) -> Self {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();

        let store_connector = MockStoreConnector::new();
        let broker = BrokerConnection::new(broker_connector.clone());
        let store = StoreConnection::new(store_connector.clone());
        let registry = SessionRegistry::new();
        let scheduler = SimulationScheduler::new(broker.clone(), registry.clone(), TEST_TOPIC, TEST_PERIOD);
        let pipeline = IngestionPipeline::new(broker.clone(), store.clone(), TEST_TOPIC, TEST_COLLECTION);
        let health = HealthTracker::new(broker.clone(), store.clone(), registry.clone(), pipeline.stats());

        Self {
            broker_connector,
            store_connector,
            broker,
            store,
            registry,
            scheduler,
            pipeline,
            health,
        }
    }

    pub fn memory_store(&self) -> Arc<MemoryStore> {
        self.store_connector.store()
    }

    pub async fn start_ingestion(&self) -> Result<(), IngestionError> {
        self.pipeline.start().await
    }

    /// Crée le client broker si besoin et le déclare connecté
    pub fn connect_broker(&self) {
        self.broker.get_client();
        self.broker_connector.connect_last();
    }

    pub fn open_session(&self) -> TestSession {
        let (tx, events) = mpsc::unbounded_channel();
        let id = self.scheduler.open_session(tx);
        TestSession { id, events }
    }

    pub fn send(&self, session: &TestSession, raw: &str) {
        self.scheduler.handle_text(session.id, raw);
    }

    pub fn start_stations(&self, session: &TestSession, stations: &[&str], params: serde_json::Value) {
        let command = serde_json::json!({
            "action": "start",
            "payload": { "stations": stations, "params": params },
        });
        self.send(session, &command.to_string());
    }

    pub fn stop(&self, session: &TestSession) {
        self.send(session, r#"{"action":"stop"}"#);
    }

    /// Laisse tourner les tasks prêtes (handlers de messages, rejouage des souscriptions)
    pub async fn settle(&self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    /// Avance l'horloge (runtime en pause) puis laisse les tasks s'exécuter
    pub async fn advance(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
        self.settle().await;
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
