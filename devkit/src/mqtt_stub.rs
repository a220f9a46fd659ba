/*!
Mock broker pour tests sans broker MQTT

`MockBrokerConnector` remplace le connecteur rumqttc : chaque client créé
enregistre ses publications et souscriptions, et le test pilote lui-même les
événements du lien (connected / error / closed / message entrant) du dernier
client créé.
*/

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_bridge::broker::{BrokerClient, BrokerConnector, BrokerError, LinkHandle, SharedClient};

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub generation: u64,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

#[derive(Default)]
struct Recorder {
    published: Mutex<Vec<PublishedMessage>>,
    fail_publish: AtomicBool,
    publish_delay: Mutex<Option<Duration>>,
    reject_subscriptions: AtomicBool,
}

/// Client simulé ; partage l'enregistreur de son connecteur
pub struct MockBrokerClient {
    generation: u64,
    recorder: Arc<Recorder>,
    subscriptions: Mutex<Vec<String>>,
    disconnected: AtomicBool,
}

impl MockBrokerClient {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl BrokerClient for MockBrokerClient {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let delay = *self.recorder.publish_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.recorder.fail_publish.load(Ordering::SeqCst) {
                return Err(BrokerError::Request("mock publish failure".into()));
            }
            tracing::debug!(%topic, bytes = payload.len(), "[mock] published");
            self.recorder.published.lock().push(PublishedMessage {
                generation: self.generation,
                topic,
                payload,
            });
            Ok(())
        })
    }

    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            if self.recorder.reject_subscriptions.load(Ordering::SeqCst) {
                tracing::debug!(%topic, "[mock] subscription rejected");
                return Err(BrokerError::SubscriptionRejected { topic });
            }
            tracing::debug!(%topic, "[mock] subscribed");
            self.subscriptions.lock().push(topic);
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.disconnected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Connecteur simulé, clonable : le test garde une copie après l'avoir
/// donné à la `BrokerConnection`
#[derive(Clone, Default)]
pub struct MockBrokerConnector {
    recorder: Arc<Recorder>,
    clients: Arc<Mutex<Vec<(LinkHandle, Arc<MockBrokerClient>)>>>,
    auto_connect: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
}

impl MockBrokerConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chaque nouveau client signale `connected` depuis une task séparée
    pub fn auto_connecting() -> Self {
        let connector = Self::default();
        connector.auto_connect.store(true, Ordering::SeqCst);
        connector
    }

    pub fn clients_created(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_client(&self) -> Option<Arc<MockBrokerClient>> {
        self.clients.lock().last().map(|(_, client)| client.clone())
    }

    pub fn link(&self, index: usize) -> Option<LinkHandle> {
        self.clients.lock().get(index).map(|(link, _)| link.clone())
    }

    fn last_link(&self) -> Option<LinkHandle> {
        self.clients.lock().last().map(|(link, _)| link.clone())
    }

    /// Signale la connexion établie du dernier client ; faux si aucun client
    pub fn connect_last(&self) -> bool {
        self.last_link().map(|link| link.connected()).is_some()
    }

    pub fn fail_last(&self, reason: &str) -> bool {
        self.last_link().map(|link| link.error(reason)).is_some()
    }

    pub fn close_last(&self) -> bool {
        self.last_link().map(|link| link.closed()).is_some()
    }

    /// Livre un message entrant comme s'il venait du broker
    pub fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.last_link().map(|link| link.message(topic, payload.into())).is_some()
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.recorder.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Chaque publication attend `delay` avant d'aboutir
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        *self.recorder.publish_delay.lock() = delay;
    }

    /// Le broker refuse les souscriptions (SubAck en échec)
    pub fn set_reject_subscriptions(&self, reject: bool) {
        self.recorder.reject_subscriptions.store(reject, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.recorder.published.lock().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published().into_iter().filter(|m| m.topic == topic).collect()
    }

    pub fn clear(&self) {
        self.recorder.published.lock().clear();
    }
}

impl BrokerConnector for MockBrokerConnector {
    fn connect(&self, link: LinkHandle) -> SharedClient {
        let client = Arc::new(MockBrokerClient {
            generation: link.generation(),
            recorder: self.recorder.clone(),
            subscriptions: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        });
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.clients.lock().push((link.clone(), client.clone()));

        if self.auto_connect.load(Ordering::SeqCst) {
            tokio::spawn(async move { link.connected() });
        }
        client
    }
}
