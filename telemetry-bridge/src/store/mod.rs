/**
 * STORE CONNECTION - Handle unique vers la base documentaire
 *
 * RÔLE :
 * Détient l'unique handle de base partagé par l'ingestion. La connexion est
 * établie à la première demande puis réutilisée pendant toute la vie du
 * processus ; seul `close()` la libère (arrêt ordonné).
 *
 * FONCTIONNEMENT :
 * - `DocumentStore` = interface commune d'écriture (insert + close)
 * - `StoreConnector` = fabrique du handle (MongoDB en production, mémoire en test)
 * - Échec de connexion : l'erreur remonte, l'appelant au démarrage la traite
 *   comme fatale (pas de mode dégradé)
 */

pub mod mongo;

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Document à schéma ouvert, tel qu'inséré dans une collection
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Erreurs possibles lors des opérations sur la base
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connect(String),
    #[error("insert into '{collection}' failed: {reason}")]
    Insert { collection: String, reason: String },
    #[error("document encoding failed: {0}")]
    Encoding(String),
}

/// Interface commune que toute base documentaire doit implémenter
pub trait DocumentStore: Send + Sync {
    /// Insère un document et retourne l'identité attribuée par la base
    fn insert_one(&self, collection: &str, document: Document) -> BoxFuture<'_, Result<String, StoreError>>;

    /// Libère les ressources du handle
    fn close(&self) -> BoxFuture<'_, ()>;
}

pub type StoreHandle = Arc<dyn DocumentStore>;

/// Fabrique de handles de base
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<StoreHandle, StoreError>>;
}

struct Inner {
    connector: Box<dyn StoreConnector>,
    handle: Mutex<Option<StoreHandle>>,
    connected: AtomicBool,
}

/// Gestionnaire de l'unique handle de base du processus
#[derive(Clone)]
pub struct StoreConnection {
    inner: Arc<Inner>,
}

impl StoreConnection {
    pub fn new<C: StoreConnector + 'static>(connector: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector: Box::new(connector),
                handle: Mutex::new(None),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Retourne le handle courant, en se connectant une seule fois si absent.
    /// Les appelants concurrents attendent la même tentative de connexion.
    pub async fn get_handle(&self) -> Result<StoreHandle, StoreError> {
        let mut slot = self.inner.handle.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        info!("creating new database client");
        match self.inner.connector.connect().await {
            Ok(handle) => {
                *slot = Some(handle.clone());
                self.inner.connected.store(true, Ordering::Relaxed);
                info!("database connected");
                Ok(handle)
            }
            Err(e) => {
                error!(error = %e, "failed to connect to the database");
                Err(e)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Libère le handle et revient à l'état absent. Sans effet si déjà fermé.
    pub async fn close(&self) {
        let handle = self.inner.handle.lock().await.take();
        let Some(handle) = handle else {
            return;
        };

        self.inner.connected.store(false, Ordering::Relaxed);
        info!("disconnecting from database");
        handle.close().await;
        info!("database disconnected");
    }
}
