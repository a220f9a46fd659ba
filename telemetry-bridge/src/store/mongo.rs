use super::{Document, DocumentStore, StoreConnector, StoreError, StoreHandle};
use futures::future::BoxFuture;
use mongodb::bson::{self, doc, Bson};
use mongodb::{Client, Database};
use std::sync::Arc;
use tracing::debug;

/// Base utilisée quand la chaîne de connexion n'en nomme aucune
const FALLBACK_DATABASE: &str = "test";

/// Connecteur MongoDB à partir d'une chaîne de connexion
pub struct MongoConnector {
    uri: String,
}

impl MongoConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

impl StoreConnector for MongoConnector {
    fn connect(&self) -> BoxFuture<'_, Result<StoreHandle, StoreError>> {
        Box::pin(async move {
            let client = Client::with_uri_str(&self.uri)
                .await
                .map_err(|e| StoreError::Connect(e.to_string()))?;
            let database = client
                .default_database()
                .unwrap_or_else(|| client.database(FALLBACK_DATABASE));

            // le driver est paresseux : ping pour échouer au démarrage
            database
                .run_command(doc! { "ping": 1 })
                .await
                .map_err(|e| StoreError::Connect(e.to_string()))?;
            debug!(database = database.name(), "mongodb ping ok");

            let handle: StoreHandle = Arc::new(MongoStore { client, database });
            Ok(handle)
        })
    }
}

struct MongoStore {
    client: Client,
    database: Database,
}

impl DocumentStore for MongoStore {
    fn insert_one(&self, collection: &str, document: Document) -> BoxFuture<'_, Result<String, StoreError>> {
        let name = collection.to_string();
        Box::pin(async move {
            let encoded = bson::to_document(&document).map_err(|e| StoreError::Encoding(e.to_string()))?;
            let result = self
                .database
                .collection::<bson::Document>(&name)
                .insert_one(encoded)
                .await
                .map_err(|e| StoreError::Insert {
                    collection: name.clone(),
                    reason: e.to_string(),
                })?;

            Ok(match result.inserted_id {
                Bson::ObjectId(oid) => oid.to_hex(),
                other => other.to_string(),
            })
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        let client = self.client.clone();
        Box::pin(async move {
            client.shutdown().await;
        })
    }
}
