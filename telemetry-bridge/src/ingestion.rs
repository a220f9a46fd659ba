/**
 * INGESTION PIPELINE - Topic MQTT → collection documentaire
 *
 * RÔLE :
 * Souscrit au topic configuré et persiste chaque payload JSON reçu comme
 * document, enrichi du champ `topic`.
 *
 * FONCTIONNEMENT :
 * - `start()` : handle base (fail-fast) → handler de messages → souscription
 * - Chaque message est traité dans sa propre task (invocations indépendantes)
 * - Payload malformé : loggé puis ignoré, la souscription continue
 * - Échec d'insertion : loggé puis ignoré (au plus une fois, sans retry)
 */

use crate::broker::{BrokerConnection, BrokerError, InboundMessage};
use crate::store::{Document, StoreConnection, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("failed to subscribe to topic '{topic}': {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BrokerError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Résultat du traitement d'un message entrant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(String),
    Malformed,
    Dropped,
}

/// Compteurs exposés par le health
#[derive(Debug, Default)]
pub struct IngestionStats {
    received: AtomicU64,
    stored: AtomicU64,
    malformed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct IngestionCounters {
    pub received: u64,
    pub stored: u64,
    pub malformed: u64,
    pub failed: u64,
}

impl IngestionStats {
    pub fn snapshot(&self) -> IngestionCounters {
        IngestionCounters {
            received: self.received.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Construit le document à insérer : champs du payload ∪ {topic}
pub fn build_document(topic: &str, payload: &[u8]) -> Result<Document, PayloadError> {
    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(mut fields) => {
            fields.insert("topic".to_string(), Value::String(topic.to_string()));
            Ok(fields)
        }
        _ => Err(PayloadError::NotAnObject),
    }
}

#[derive(Clone)]
pub struct IngestionPipeline {
    broker: BrokerConnection,
    store: StoreConnection,
    topic: String,
    collection: String,
    stats: Arc<IngestionStats>,
}

impl IngestionPipeline {
    pub fn new(
        broker: BrokerConnection,
        store: StoreConnection,
        topic: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            store,
            topic: topic.into(),
            collection: collection.into(),
            stats: Arc::new(IngestionStats::default()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn stats(&self) -> Arc<IngestionStats> {
        self.stats.clone()
    }

    /// Démarre l'ingestion. Toute erreur retournée est fatale pour le service.
    pub async fn start(&self) -> Result<(), IngestionError> {
        info!(topic = %self.topic, collection = %self.collection, "starting data ingestion service");

        self.store.get_handle().await?;

        let pipeline = self.clone();
        self.broker.set_message_handler(Arc::new(move |message: InboundMessage| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline.handle_message(&message.topic, &message.payload).await;
            });
        }));

        self.broker
            .subscribe(&self.topic)
            .await
            .map_err(|source| IngestionError::Subscribe {
                topic: self.topic.clone(),
                source,
            })?;
        info!(topic = %self.topic, "subscribed to topic");
        Ok(())
    }

    /// Traite un message entrant ; ne panique jamais et ne remonte aucune erreur.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> IngestOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        debug!(%topic, bytes = payload.len(), "message received");

        let document = match build_document(topic, payload) {
            Ok(document) => document,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    %topic,
                    payload = %String::from_utf8_lossy(payload),
                    error = %e,
                    "received malformed payload"
                );
                return IngestOutcome::Malformed;
            }
        };

        let inserted = match self.store.get_handle().await {
            Ok(handle) => handle.insert_one(&self.collection, document).await,
            Err(e) => Err(e),
        };

        match inserted {
            Ok(id) => {
                self.stats.stored.fetch_add(1, Ordering::Relaxed);
                info!(collection = %self.collection, %id, "reading inserted");
                IngestOutcome::Stored(id)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(%topic, error = %e, "failed to insert message");
                IngestOutcome::Dropped
            }
        }
    }
}
