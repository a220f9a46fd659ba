/**
 * SIMULATION SCHEDULER - Générateur de télémétrie synthétique par session
 *
 * RÔLE :
 * Transforme les commandes d'une session (start/stop) en une boucle de
 * publication périodique, bornée et annulable, vers le topic configuré.
 *
 * FONCTIONNEMENT :
 * - Machine à états par session : Idle ⇄ Running
 * - start : annule le job existant, assainit les params, lance une task
 *   périodique (premier tick après une période complète)
 * - tick : broker déconnecté → le job s'arrête de lui-même avec un statut ;
 *   sinon publication d'un message par station, dans l'ordre fourni
 * - stop / fermeture de session : annulation immédiate via CancellationToken
 */

pub mod protocol;
pub mod registry;

use crate::broker::BrokerConnection;
use protocol::{SessionCommand, SessionEvent, StartRequest};
use registry::{EventSender, SessionId, SessionRegistry, SimulationJob};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct SimulationScheduler {
    broker: BrokerConnection,
    registry: SessionRegistry,
    topic: Arc<str>,
    period: Duration,
    next_job_id: Arc<AtomicU64>,
}

impl SimulationScheduler {
    pub fn new(broker: BrokerConnection, registry: SessionRegistry, topic: impl Into<String>, period: Duration) -> Self {
        Self {
            broker,
            registry,
            topic: Arc::from(topic.into()),
            period,
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Enregistre une nouvelle session et lui envoie le message d'accueil
    pub fn open_session(&self, events: EventSender) -> SessionId {
        let session = self.registry.open(events);
        info!(%session, "test generator client connected");
        self.registry.emit(session, SessionEvent::info(protocol::MSG_CONNECTED));
        session
    }

    /// Fermeture de session : même annulation que stop, sans événement
    pub fn close_session(&self, session: SessionId) {
        if self.registry.close(session) {
            info!(%session, "test generator client disconnected");
        }
    }

    /// Traite un message texte brut reçu de la session
    pub fn handle_text(&self, session: SessionId, raw: &str) {
        match protocol::parse_command(raw) {
            Ok(SessionCommand::Start(request)) => {
                self.start(session, request);
            }
            Ok(SessionCommand::Stop) => self.stop(session),
            Ok(SessionCommand::Unknown(action)) => {
                debug!(%session, ?action, "unknown session action");
                self.registry.emit(session, SessionEvent::status(protocol::MSG_UNKNOWN_ACTION));
            }
            Err(e) => {
                warn!(%session, error = %e, "invalid message received on test generator socket");
                self.registry.emit(session, SessionEvent::status(protocol::MSG_INVALID_PAYLOAD));
            }
        }
    }

    /// Démarre (ou remplace) le job de la session. Faux si rien n'a été lancé.
    pub fn start(&self, session: SessionId, request: StartRequest) -> bool {
        if request.stations.is_empty() {
            self.registry.emit(session, SessionEvent::status(protocol::MSG_NO_STATIONS));
            return false;
        }

        // crée le client si besoin : il aura une période pour se connecter
        self.broker.get_client();

        let params = protocol::sanitize_params(&request.params);
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let job = SimulationJob::new(job_id, request.stations, params, cancel.clone());
        let stations = job.stations.clone();
        let params = job.params.clone();

        if !self.registry.install_job(session, job) {
            debug!(%session, "session closed before simulation start");
            return false;
        }

        info!(%session, job_id, stations = stations.len(), "simulation started");
        tokio::spawn(self.clone().run_job(session, job_id, stations, params, cancel));
        self.registry.emit(session, SessionEvent::status(protocol::MSG_STARTED));
        true
    }

    /// Arrête le job de la session s'il existe ; émet toujours le statut
    pub fn stop(&self, session: SessionId) {
        if self.registry.cancel_job(session) {
            info!(%session, "simulation stopped");
        }
        self.registry.emit(session, SessionEvent::status(protocol::MSG_STOPPED));
    }

    async fn run_job(
        self,
        session: SessionId,
        job_id: u64,
        stations: Vec<String>,
        params: Map<String, Value>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.tick(session, job_id, &stations, &params, &cancel).await {
                break;
            }
        }
        debug!(%session, job_id, "simulation task finished");
    }

    /// Un tick de publication ; faux quand le job doit s'arrêter
    async fn tick(
        &self,
        session: SessionId,
        job_id: u64,
        stations: &[String],
        params: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(client) = self.broker.connected_client() else {
            if self.registry.finish_job(session, job_id) {
                warn!(%session, job_id, "broker disconnected, cancelling simulation");
                self.registry.emit(session, SessionEvent::status(protocol::MSG_BROKER_DISCONNECTED));
            }
            return false;
        };

        for station in stations {
            if cancel.is_cancelled() {
                return false;
            }

            let reading = protocol::synthesize_reading(params, station, OffsetDateTime::now_utc().unix_timestamp());
            let serialized = match serde_json::to_string(&reading) {
                Ok(s) => s,
                Err(e) => {
                    warn!(%station, error = %e, "failed to serialize synthetic reading");
                    continue;
                }
            };

            if let Err(e) = client.publish(&self.topic, serialized.clone().into_bytes()).await {
                warn!(%station, topic = %self.topic, error = %e, "synthetic publish failed");
                continue;
            }
            // stop ou nouveau start pendant la publication : plus rien vers la session
            if cancel.is_cancelled() {
                return false;
            }
            self.registry
                .emit(session, SessionEvent::log(protocol::log_line(&self.topic, &serialized)));
        }
        true
    }
}
