use super::{BrokerClient, BrokerConnector, BrokerError, LinkHandle, SharedClient};
use futures::future::BoxFuture;
use rumqttc::{
    AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS, SubscribeReasonCode,
    Transport,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Paramètres de connexion au broker MQTT
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: bool,
    pub ca_cert_path: Option<PathBuf>,
    pub client_id_prefix: String,
    pub keep_alive: Duration,
}

/// Connecteur rumqttc : un `AsyncClient` par création, event loop dans une task
pub struct MqttConnector {
    settings: MqttSettings,
    transport: Option<Transport>,
}

impl MqttConnector {
    pub fn new(settings: MqttSettings) -> Result<Self, BrokerError> {
        let transport = if let Some(path) = &settings.ca_cert_path {
            let ca = std::fs::read(path)
                .map_err(|e| BrokerError::Tls(format!("{}: {e}", path.display())))?;
            Some(Transport::tls(ca, None, None))
        } else if settings.tls {
            Some(Transport::tls_with_default_config())
        } else {
            None
        };

        Ok(Self { settings, transport })
    }

    fn options(&self) -> MqttOptions {
        let client_id = format!("{}-{}", self.settings.client_id_prefix, Uuid::new_v4().simple());
        let mut opts = MqttOptions::new(client_id, &self.settings.host, self.settings.port);
        opts.set_keep_alive(self.settings.keep_alive);
        opts.set_clean_session(true);
        if !self.settings.username.is_empty() {
            opts.set_credentials(&self.settings.username, &self.settings.password);
        }
        if let Some(transport) = &self.transport {
            opts.set_transport(transport.clone());
        }
        opts
    }
}

impl BrokerConnector for MqttConnector {
    fn connect(&self, link: LinkHandle) -> SharedClient {
        let (client, eventloop) = AsyncClient::new(self.options(), 10);
        info!(
            host = %self.settings.host,
            port = self.settings.port,
            generation = link.generation(),
            "connecting to MQTT broker"
        );
        let acks = Arc::new(SubAckTracker::default());
        tokio::spawn(drive_event_loop(eventloop, link, acks.clone()));
        Arc::new(MqttClient {
            client,
            acks,
            subscribe_order: tokio::sync::Mutex::new(()),
        })
    }
}

/// Relie chaque SUBSCRIBE à son SubAck.
///
/// rumqttc attribue le pkid au moment de l'envoi : les demandes attendent
/// dans `queued` (ordre d'envoi), passent dans `in_flight` à l'événement
/// `Outgoing::Subscribe(pkid)`, puis sont résolues par le SubAck.
#[derive(Default)]
struct SubAckTracker {
    queued: Mutex<VecDeque<oneshot::Sender<bool>>>,
    in_flight: Mutex<HashMap<u16, oneshot::Sender<bool>>>,
}

impl SubAckTracker {
    fn enqueue(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.queued.lock().push_back(tx);
        rx
    }

    fn dequeue_last(&self) {
        self.queued.lock().pop_back();
    }

    fn sent(&self, pkid: u16) {
        if let Some(tx) = self.queued.lock().pop_front() {
            self.in_flight.lock().insert(pkid, tx);
        }
    }

    fn acknowledged(&self, pkid: u16, accepted: bool) {
        if let Some(tx) = self.in_flight.lock().remove(&pkid) {
            let _ = tx.send(accepted);
        }
    }

    /// Fin de l'event loop : les souscriptions en attente échouent
    fn abandon(&self) {
        self.queued.lock().clear();
        self.in_flight.lock().clear();
    }
}

/// Pompe l'event loop rumqttc et traduit ses événements pour la connexion.
/// S'arrête à la première erreur : pas de reconnexion implicite ici.
async fn drive_event_loop(mut eventloop: EventLoop, link: LinkHandle, acks: Arc<SubAckTracker>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => link.connected(),
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                link.message(p.topic.clone(), p.payload.to_vec());
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => acks.sent(pkid),
            Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                let accepted = !ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if !accepted {
                    error!(pkid = ack.pkid, "broker rejected subscription");
                }
                acks.acknowledged(ack.pkid, accepted);
            }
            Ok(Event::Incoming(Incoming::Disconnect)) | Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                link.closed();
                break;
            }
            Ok(_) => {}
            Err(e) => {
                link.error(e.to_string());
                break;
            }
        }

        if !link.is_current() {
            debug!(generation = link.generation(), "broker client superseded, stopping event loop");
            break;
        }
    }
    // plus aucune requête ne peut partir : on libère les souscriptions en attente
    drop(eventloop);
    acks.abandon();
}

struct MqttClient {
    client: AsyncClient,
    acks: Arc<SubAckTracker>,
    // garde l'ordre file d'attente == ordre des requêtes rumqttc
    subscribe_order: tokio::sync::Mutex<()>,
}

impl BrokerClient for MqttClient {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.client
                .publish(topic, QoS::AtMostOnce, false, payload)
                .await
                .map_err(|e| BrokerError::Request(e.to_string()))
        })
    }

    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let ack = {
                let _order = self.subscribe_order.lock().await;
                let ack = self.acks.enqueue();
                if let Err(e) = self.client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                    self.acks.dequeue_last();
                    return Err(BrokerError::Request(e.to_string()));
                }
                ack
            };

            match ack.await {
                Ok(true) => Ok(()),
                Ok(false) => Err(BrokerError::SubscriptionRejected { topic }),
                Err(_) => Err(BrokerError::Request(format!(
                    "connection ended before subscription to '{topic}' was acknowledged"
                ))),
            }
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.client
                .disconnect()
                .await
                .map_err(|e| BrokerError::Request(e.to_string()))
        })
    }
}
