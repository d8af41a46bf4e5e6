// SPDX-License-Identifier: AGPL-3.0-or-later

//! The process-wide document table: component C's "get or create" surface plus the bounded
//! retention policy from §9's design notes.
//!
//! The table itself (`doc_id -> DocumentActorHandle`) is the only process-wide mutable state
//! (§5); it is guarded by a plain `std::sync::Mutex` since lookups and inserts are
//! short, non-blocking critical sections. Once a handle is obtained, all further coordination
//! happens inside that document's own actor, with no further locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::error::SessionError;
use crate::session::DocumentActorHandle;

#[derive(Clone, Default)]
pub struct DocumentRegistry {
    documents: Arc<Mutex<HashMap<String, DocumentActorHandle>>>,
}

/// Result of an explicit [`DocumentRegistry::delete`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// Refused: the document still has at least one live connection (§3 lifecycle).
    StillConnected,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        DocumentRegistry::default()
    }

    /// `get_or_create(doc_id)` (§4.3): spawn a fresh empty document actor the first time an id
    /// is referenced, otherwise return the existing handle.
    pub fn get_or_create(&self, doc_id: &str) -> DocumentActorHandle {
        let mut documents = self.documents.lock().expect("document registry poisoned");
        documents
            .entry(doc_id.to_string())
            .or_insert_with(|| {
                info!(doc_id, "creating document");
                DocumentActorHandle::spawn(doc_id.to_string())
            })
            .clone()
    }

    /// `read_only(doc_id)` (§4.3): look up without creating. Used by the REST-shaped query
    /// surface (`GET /document/{id}` is out of scope per §1; this is the library call that
    /// would back it).
    pub async fn read_only(
        &self,
        doc_id: &str,
    ) -> Result<(crate::document::DocumentSnapshot, crate::document::DocumentStats), SessionError> {
        let handle = {
            let documents = self.documents.lock().expect("document registry poisoned");
            documents.get(doc_id).cloned()
        };
        match handle {
            Some(handle) => Ok(handle.read_only().await),
            None => Err(SessionError::UnknownDocument {
                doc_id: doc_id.to_string(),
            }),
        }
    }

    /// `POST /document`-equivalent (§6): allocate a fresh, empty document under a
    /// server-generated id and return it.
    pub fn create(&self) -> String {
        let doc_id = format!("doc-{:08x}", rand::random::<u32>());
        self.get_or_create(&doc_id);
        doc_id
    }

    /// All known document ids, the Rust analogue of `DocumentManager.list_documents` in
    /// `document_manager.py`. Order is unspecified.
    pub fn list(&self) -> Vec<String> {
        let documents = self.documents.lock().expect("document registry poisoned");
        documents.keys().cloned().collect()
    }

    /// Explicitly remove a document, but only once it has no live connections (§3 lifecycle:
    /// "never deleted during a live session — deletion requires no active connections").
    pub async fn delete(&self, doc_id: &str) -> DeleteOutcome {
        let handle = {
            let documents = self.documents.lock().expect("document registry poisoned");
            documents.get(doc_id).cloned()
        };
        let Some(handle) = handle else {
            return DeleteOutcome::NotFound;
        };
        let stats = handle.stats().await;
        if stats.connection_count > 0 {
            return DeleteOutcome::StillConnected;
        }
        let mut documents = self.documents.lock().expect("document registry poisoned");
        documents.remove(doc_id);
        DeleteOutcome::Deleted
    }

    /// Evict every document with no live connections whose idle duration exceeds `ttl`
    /// (§9: "bounded retention: LRU eviction when no connections and TTL elapsed"). Dropping
    /// the registry's handle is what lets the actor's mailbox close and its task exit.
    pub async fn reap_idle(&self, ttl: Duration) {
        let candidates: Vec<(String, DocumentActorHandle)> = {
            let documents = self.documents.lock().expect("document registry poisoned");
            documents
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        let mut to_evict = Vec::new();
        for (doc_id, handle) in candidates {
            let stats = handle.stats().await;
            if stats.connection_count == 0 {
                if let Some(idle_since) = stats.idle_since {
                    if idle_since.elapsed() >= ttl {
                        to_evict.push(doc_id);
                    }
                }
            }
        }

        if to_evict.is_empty() {
            return;
        }
        let mut documents = self.documents.lock().expect("document registry poisoned");
        for doc_id in &to_evict {
            documents.remove(doc_id);
            info!(doc_id, "evicted idle document");
        }
    }
}

/// Background task: periodically sweep the registry for idle documents (§10.1's
/// `--idle-ttl-secs`/`--reaper-interval-secs` flags).
pub async fn run_reaper(registry: DocumentRegistry, ttl: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        registry.reap_idle(ttl).await;
    }
}
