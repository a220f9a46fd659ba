/**
 * TELEMETRY BRIDGE - Passerelle broker MQTT ⇄ base documentaire
 *
 * RÔLE :
 * - Ingestion : topic MQTT configuré → documents dans une collection
 * - Simulation : sessions WebSocket de la page de test qui publient de la
 *   télémétrie synthétique sur ce même topic
 *
 * Les connexions broker et base sont des singletons paresseux derrière des
 * traits (`BrokerConnector`, `StoreConnector`) pour que le devkit puisse les
 * remplacer par des doubles en mémoire.
 */

pub mod broker;
pub mod config;
pub mod health;
pub mod http;
pub mod ingestion;
pub mod shutdown;
pub mod simulation;
pub mod store;
pub mod ws;
