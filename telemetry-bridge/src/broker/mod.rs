/**
 * BROKER CONNECTION - Client broker unique, paresseux et auto-invalidant
 *
 * RÔLE :
 * Détient l'unique client vers le broker de messages partagé par l'ingestion
 * et le générateur de simulation. Le client est créé à la première demande.
 *
 * FONCTIONNEMENT :
 * - `get_client()` retourne le client courant ou en crée un (état Connecting)
 * - Le connecteur signale les événements du lien via un `LinkHandle` :
 *   connected → Connected, error → Failed (client terminé), closed → Absent
 * - Aucune reconnexion proactive : le prochain `get_client()` recrée le client
 * - Chaque client porte une génération ; les événements d'un client remplacé
 *   n'affectent jamais son successeur
 * - Les topics souscrits et le handler de messages appartiennent à la
 *   connexion, pas au client : ils sont rejoués sur chaque nouveau client
 *
 * CONCURRENCE :
 * Toutes les transitions passent par un seul `Mutex` : deux appelants
 * concurrents observent le même client en cours de connexion.
 */

pub mod mqtt;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Erreurs remontées par un client broker
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Request(String),
    #[error("TLS configuration failed: {0}")]
    Tls(String),
    #[error("broker rejected subscription to '{topic}'")]
    SubscriptionRejected { topic: String },
}

/// État observable de la connexion broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Absent,
    Connecting,
    Connected,
    Failed,
}

/// Message reçu du broker sur un topic souscrit
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Opérations qu'un client broker expose au reste du service
pub trait BrokerClient: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> BoxFuture<'_, Result<(), BrokerError>>;
    /// Résout quand le broker a acquitté (ou refusé) la souscription
    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<(), BrokerError>>;
    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

pub type SharedClient = Arc<dyn BrokerClient>;

/// Fabrique de clients broker.
///
/// `connect` est appelé sous le verrou de la connexion : l'implémentation doit
/// retourner immédiatement et ne jamais signaler d'événement sur le `LinkHandle`
/// de manière synchrone (la connexion réelle se termine en tâche de fond).
pub trait BrokerConnector: Send + Sync {
    fn connect(&self, link: LinkHandle) -> SharedClient;
}

pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

struct Slot {
    status: LinkStatus,
    generation: u64,
    client: Option<SharedClient>,
    last_error: Option<String>,
}

struct Inner {
    connector: Box<dyn BrokerConnector>,
    slot: Mutex<Slot>,
    topics: Mutex<Vec<String>>,
    handler: Mutex<Option<MessageHandler>>,
    clients_created: AtomicU64,
}

/// Gestionnaire de l'unique client broker du processus
#[derive(Clone)]
pub struct BrokerConnection {
    inner: Arc<Inner>,
}

impl BrokerConnection {
    pub fn new<C: BrokerConnector + 'static>(connector: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector: Box::new(connector),
                slot: Mutex::new(Slot {
                    status: LinkStatus::Absent,
                    generation: 0,
                    client: None,
                    last_error: None,
                }),
                topics: Mutex::new(Vec::new()),
                handler: Mutex::new(None),
                clients_created: AtomicU64::new(0),
            }),
        }
    }

    /// Retourne le client courant, en créant un nouveau si aucun n'existe.
    /// Le client retourné peut être encore en cours de connexion.
    pub fn get_client(&self) -> SharedClient {
        let mut slot = self.inner.slot.lock();
        if let Some(client) = &slot.client {
            return client.clone();
        }

        slot.generation += 1;
        let generation = slot.generation;
        let link = LinkHandle {
            generation,
            inner: Arc::downgrade(&self.inner),
        };
        let client = self.inner.connector.connect(link);
        slot.client = Some(client.clone());
        slot.status = LinkStatus::Connecting;
        drop(slot);

        self.inner.clients_created.fetch_add(1, Ordering::Relaxed);
        info!(generation, "broker client created");
        self.replay_subscriptions(client.clone());
        client
    }

    /// Client courant uniquement s'il est connecté
    pub fn connected_client(&self) -> Option<SharedClient> {
        let slot = self.inner.slot.lock();
        match slot.status {
            LinkStatus::Connected => slot.client.clone(),
            _ => None,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.inner.slot.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == LinkStatus::Connected
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.slot.lock().last_error.clone()
    }

    pub fn clients_created(&self) -> u64 {
        self.inner.clients_created.load(Ordering::Relaxed)
    }

    /// Installe le handler appelé pour chaque message entrant, quel que soit
    /// le client qui l'a reçu.
    pub fn set_message_handler(&self, handler: MessageHandler) {
        *self.inner.handler.lock() = Some(handler);
    }

    /// Souscrit au topic sur le client courant et le mémorise pour les
    /// clients créés ensuite.
    pub async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        let client = self.get_client();
        {
            let mut topics = self.inner.topics.lock();
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
        client.subscribe(topic).await
    }

    /// Déconnecte et oublie le client courant. Sans effet si absent.
    pub async fn shutdown(&self) {
        let client = {
            let mut slot = self.inner.slot.lock();
            // invalide les événements tardifs du client fermé
            slot.generation += 1;
            slot.status = LinkStatus::Absent;
            slot.client.take()
        };

        if let Some(client) = client {
            match client.disconnect().await {
                Ok(()) => info!("broker client disconnected"),
                Err(e) => warn!(error = %e, "broker disconnect failed"),
            }
        }
    }

    fn replay_subscriptions(&self, client: SharedClient) {
        let topics = self.inner.topics.lock().clone();
        if topics.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for topic in topics {
                match client.subscribe(&topic).await {
                    Ok(()) => debug!(%topic, "subscription replayed on new client"),
                    Err(e) => warn!(%topic, error = %e, "failed to replay subscription"),
                }
            }
        });
    }
}

impl Inner {
    fn on_connected(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.generation != generation || slot.client.is_none() {
            debug!(generation, "ignoring connect from stale broker client");
            return;
        }
        slot.status = LinkStatus::Connected;
        slot.last_error = None;
        info!(generation, "connected to MQTT broker");
    }

    fn on_error(&self, generation: u64, reason: String) {
        let failed = {
            let mut slot = self.slot.lock();
            if slot.generation != generation || slot.client.is_none() {
                debug!(generation, %reason, "ignoring error from stale broker client");
                return;
            }
            slot.status = LinkStatus::Failed;
            slot.last_error = Some(reason.clone());
            slot.client.take()
        };

        error!(generation, %reason, "MQTT connection error, client dropped");
        if let Some(client) = failed {
            tokio::spawn(async move {
                if let Err(e) = client.disconnect().await {
                    debug!(error = %e, "terminating failed broker client");
                }
            });
        }
    }

    fn on_closed(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return;
        }
        slot.client = None;
        slot.status = LinkStatus::Absent;
        info!(generation, "disconnected from MQTT broker");
    }

    fn on_message(&self, message: InboundMessage) {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(message),
            None => debug!(topic = %message.topic, "no handler for inbound message"),
        }
    }
}

/// Canal par lequel un client signale les événements de son lien
#[derive(Clone)]
pub struct LinkHandle {
    generation: u64,
    inner: Weak<Inner>,
}

impl LinkHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connected(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_connected(self.generation);
        }
    }

    pub fn error(&self, reason: impl Into<String>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_error(self.generation, reason.into());
        }
    }

    pub fn closed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_closed(self.generation);
        }
    }

    pub fn message(&self, topic: impl Into<String>, payload: Vec<u8>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_message(InboundMessage {
                topic: topic.into(),
                payload,
            });
        }
    }

    /// Faux dès qu'un client plus récent a été créé ou que la connexion a disparu
    pub fn is_current(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.slot.lock().generation == self.generation,
            None => false,
        }
    }
}
