/*!
Base documentaire en mémoire

`MemoryStore` garde les documents insérés par collection ; `MockStoreConnector`
peut refuser la connexion ou faire échouer les insertions.
*/

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use telemetry_bridge::store::{Document, DocumentStore, StoreConnector, StoreError, StoreHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub collection: String,
    pub document: Document,
}

#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<Vec<StoredDocument>>,
    fail_inserts: AtomicBool,
    closes: AtomicUsize,
}

impl MemoryStore {
    pub fn documents(&self) -> Vec<StoredDocument> {
        self.documents.lock().clone()
    }

    pub fn documents_in(&self, collection: &str) -> Vec<Document> {
        self.documents
            .lock()
            .iter()
            .filter(|stored| stored.collection == collection)
            .map(|stored| stored.document.clone())
            .collect()
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl DocumentStore for MemoryStore {
    fn insert_one(&self, collection: &str, document: Document) -> BoxFuture<'_, Result<String, StoreError>> {
        let collection = collection.to_string();
        Box::pin(async move {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(StoreError::Insert {
                    collection,
                    reason: "mock insert failure".into(),
                });
            }
            let mut documents = self.documents.lock();
            let id = format!("mem-{}", documents.len() + 1);
            documents.push(StoredDocument {
                id: id.clone(),
                collection,
                document,
            });
            Ok(id)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}

#[derive(Clone, Default)]
pub struct MockStoreConnector {
    store: Arc<MemoryStore>,
    fail_connect: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
}

impl MockStoreConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl StoreConnector for MockStoreConnector {
    fn connect(&self) -> BoxFuture<'_, Result<StoreHandle, StoreError>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(StoreError::Connect("mock store unreachable".into()));
            }
            Ok(self.store.clone() as StoreHandle)
        })
    }
}
