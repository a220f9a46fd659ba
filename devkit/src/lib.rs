/*!
# Bridge DevKit - Doubles et utilitaires de test

Permet d'exercer le bridge sans broker ni base réels :
- Broker simulé, événements du lien pilotés par le test
- Base documentaire en mémoire
- Harness qui assemble ingestion, sessions et health
*/

pub mod mqtt_stub;
pub mod store_stub;
pub mod test_utils;

pub use mqtt_stub::{MockBrokerClient, MockBrokerConnector, PublishedMessage};
pub use store_stub::{MemoryStore, MockStoreConnector, StoredDocument};
pub use test_utils::{TestHarness, TestSession};
