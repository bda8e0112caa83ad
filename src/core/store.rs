//! Persistent record store (spec §6 external collaborator): CRUD on
//! [`ServerTarget`] and append/query on [`SyncResult`], grounded on the
//! teacher's `HttpMonitor::write_state_atomic`/`load_state_internal`
//! atomic temp-file-then-rename pattern.

use crate::core::error::StoreError;
use crate::core::types::{ServerTarget, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// CRUD on server records plus append/query on sync history. At-least-once
/// write semantics are sufficient (spec §6) — the engine never relies on
/// a store transaction spanning more than one call.
pub trait ServerStore: Send + Sync {
    fn get(&self, id: &str) -> Option<ServerTarget>;
    fn list(&self) -> Vec<ServerTarget>;
    fn add(&self, url: &str) -> Result<ServerTarget, StoreError>;
    fn delete(&self, id: &str) -> Result<(), StoreError>;
    fn append_result(&self, server_id: &str, result: SyncResult);
    fn history(&self, server_id: &str, since_ms: Option<i64>, limit: Option<usize>) -> Vec<SyncResult>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    servers: HashMap<String, ServerTarget>,
    history: HashMap<String, Vec<SyncResult>>,
}

/// JSON-file-backed store. Every mutation is applied to an in-memory copy
/// under a mutex, then the whole document is serialized to a temp file and
/// renamed over the real path — the same single-writer atomic pattern the
/// teacher uses for its monitoring-state JSON.
pub struct JsonServerStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
}

impl JsonServerStore {
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let doc = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            StoreDocument::default()
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    fn persist(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(doc)?;
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl ServerStore for JsonServerStore {
    fn get(&self, id: &str) -> Option<ServerTarget> {
        self.doc.lock().unwrap().servers.get(id).cloned()
    }

    fn list(&self) -> Vec<ServerTarget> {
        self.doc.lock().unwrap().servers.values().cloned().collect()
    }

    fn add(&self, url: &str) -> Result<ServerTarget, StoreError> {
        url::Url::parse(url)
            .map_err(|e| StoreError::NotFound(format!("invalid URL {url}: {e}")))?;

        let target = ServerTarget::new(uuid::Uuid::new_v4().to_string(), url.to_string());
        let mut doc = self.doc.lock().unwrap();
        doc.servers.insert(target.id.clone(), target.clone());
        self.persist(&doc).ok();
        Ok(target)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().unwrap();
        if doc.servers.remove(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        doc.history.remove(id);
        self.persist(&doc)
    }

    fn append_result(&self, server_id: &str, result: SyncResult) {
        let mut doc = self.doc.lock().unwrap();
        if let Some(target) = doc.servers.get_mut(server_id) {
            target.cached_offset_ms = Some(result.total_offset_ms);
        }
        doc.history
            .entry(server_id.to_string())
            .or_insert_with(Vec::new)
            .push(result);
        self.persist(&doc).ok();
    }

    fn history(&self, server_id: &str, since_ms: Option<i64>, limit: Option<usize>) -> Vec<SyncResult> {
        let doc = self.doc.lock().unwrap();
        let mut results: Vec<SyncResult> = doc
            .history
            .get(server_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|r| since_ms.map(|since| r.synced_at_ms >= since).unwrap_or(true))
            .collect();
        results.sort_by(|a, b| b.synced_at_ms.cmp(&a.synced_at_ms));
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        results
    }
}
