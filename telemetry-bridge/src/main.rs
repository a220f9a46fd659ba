/**
 * TELEMETRY BRIDGE - Point d'entrée du service
 *
 * RÔLE : Orchestration : config → connexions broker/base → ingestion →
 * sessions de simulation → API HTTP/WebSocket.
 *
 * Toute erreur de démarrage (config, base injoignable, souscription, bind)
 * est fatale. Arrêt sur SIGINT/SIGTERM avec libération des connexions.
 */

use anyhow::Context;
use std::net::SocketAddr;
use telemetry_bridge::broker::mqtt::MqttConnector;
use telemetry_bridge::broker::BrokerConnection;
use telemetry_bridge::config::BridgeConfig;
use telemetry_bridge::health::HealthTracker;
use telemetry_bridge::http::{self, AppState, StationsProxy};
use telemetry_bridge::ingestion::IngestionPipeline;
use telemetry_bridge::shutdown;
use telemetry_bridge::simulation::registry::SessionRegistry;
use telemetry_bridge::simulation::SimulationScheduler;
use telemetry_bridge::store::mongo::MongoConnector;
use telemetry_bridge::store::StoreConnection;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = BridgeConfig::from_env().context("invalid configuration")?;

    // connexions paresseuses partagées
    let connector = MqttConnector::new(cfg.broker.settings()).context("failed to prepare MQTT connector")?;
    let broker = BrokerConnection::new(connector);
    let store = StoreConnection::new(MongoConnector::new(cfg.mongodb_uri.clone()));

    // ingestion : base injoignable ou souscription refusée → arrêt
    let pipeline = IngestionPipeline::new(broker.clone(), store.clone(), cfg.broker.topic.clone(), cfg.collection.clone());
    pipeline.start().await.context("failed to start data ingestion")?;

    let registry = SessionRegistry::new();
    let scheduler = SimulationScheduler::new(
        broker.clone(),
        registry.clone(),
        cfg.broker.topic.clone(),
        cfg.simulation_period,
    );
    let health = HealthTracker::new(broker.clone(), store.clone(), registry, pipeline.stats());

    let app_state = AppState {
        scheduler,
        health,
        stations: cfg.stations_upstream.clone().map(StationsProxy::new),
    };
    let app = http::build_router(app_state, &cfg.test_generator_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for_signal())
        .await
        .context("http server error")?;

    shutdown::release(&store, &broker).await;
    info!("telemetry bridge stopped");
    Ok(())
}
