//! Versioned key-value store shared by all managers.
//!
//! The store is the single source of truth for one task's lifetime: every
//! manager holds a reference to it and derives all views from it. Writes are
//! append-only; `get` is latest-wins, while `query` matches across the full
//! write history by metadata (the audit-trail behavior downstream debugging
//! tools rely on).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved metadata field tagging every entry with the key it was set under.
pub const KEY_FIELD: &str = "variable_name";

/// Cooperative cancellation flag.
///
/// Cancellation is advisory and silent: an operation that observes a cancelled
/// token performs no state change and returns an empty/absent result instead
/// of raising an error.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Content kind tag for stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeKind {
    Text,
    Json,
    Binary,
}

/// One versioned write. Entries are never edited or removed except by `clear`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEntry {
    pub key: String,
    pub value: Value,
    pub metadata: BTreeMap<String, String>,
    pub mime_kind: MimeKind,
    pub insertion_order: u64,
    pub timestamp: String,
}

/// One historical version of a key in the exported layout (see
/// [`KeyValueStore::export`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedVersion {
    pub value: Value,
    pub metadata: BTreeMap<String, String>,
    pub mime_kind: MimeKind,
    pub timestamp: String,
}

/// In-memory versioned key-value store.
///
/// Interior mutability keeps the API `&self`; single-writer-at-a-time per key
/// is all the orchestration loop requires.
#[derive(Debug, Default)]
pub struct KeyValueStore {
    entries: Mutex<Vec<StoreEntry>>,
}

impl KeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<StoreEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a new versioned entry for `key`. The content kind is inferred
    /// from the value (strings are text, everything else JSON).
    pub fn set(
        &self,
        key: &str,
        value: Value,
        metadata: Option<BTreeMap<String, String>>,
        cancel: Option<&CancelToken>,
    ) {
        let kind = match &value {
            Value::String(_) => MimeKind::Text,
            _ => MimeKind::Json,
        };
        self.set_with_kind(key, value, kind, metadata, cancel);
    }

    /// Append a new versioned entry with an explicit content kind.
    pub fn set_with_kind(
        &self,
        key: &str,
        value: Value,
        mime_kind: MimeKind,
        metadata: Option<BTreeMap<String, String>>,
        cancel: Option<&CancelToken>,
    ) {
        if is_cancelled(cancel) {
            tracing::warn!(key, "set cancelled");
            return;
        }
        let mut item_metadata = metadata.unwrap_or_default();
        item_metadata.insert(KEY_FIELD.to_string(), key.to_string());

        let mut entries = self.entries();
        let entry = StoreEntry {
            key: key.to_string(),
            value,
            metadata: item_metadata,
            mime_kind,
            insertion_order: entries.len() as u64,
            timestamp: Utc::now().to_rfc3339(),
        };
        entries.push(entry);
        tracing::debug!(key, store_size = entries.len(), "set");
    }

    /// Latest value written for `key`, or absent.
    pub fn get(&self, key: &str, cancel: Option<&CancelToken>) -> Option<Value> {
        self.get_with_details(key, cancel).map(|entry| entry.value)
    }

    /// Latest entry written for `key` with its full details, or absent.
    pub fn get_with_details(&self, key: &str, cancel: Option<&CancelToken>) -> Option<StoreEntry> {
        if is_cancelled(cancel) {
            tracing::warn!(key, "get cancelled");
            return None;
        }
        self.entries()
            .iter()
            .rev()
            .find(|entry| entry.key == key)
            .cloned()
    }

    /// Every historical entry whose metadata is a superset of `filter`, in
    /// insertion order. Matches across all versions of all keys, not only the
    /// latest per key.
    pub fn query(
        &self,
        filter: &BTreeMap<String, String>,
        cancel: Option<&CancelToken>,
    ) -> Vec<StoreEntry> {
        if is_cancelled(cancel) {
            tracing::warn!("query cancelled");
            return Vec::new();
        }
        self.entries()
            .iter()
            .filter(|entry| {
                filter
                    .iter()
                    .all(|(k, v)| entry.metadata.get(k) == Some(v))
            })
            .cloned()
            .collect()
    }

    /// Discard all entries and reset to empty.
    pub fn clear(&self, cancel: Option<&CancelToken>) {
        if is_cancelled(cancel) {
            tracing::warn!("clear cancelled");
            return;
        }
        self.entries().clear();
        tracing::info!("store cleared");
    }

    /// Unique keys in first-insertion order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let entries = self.entries();
        for entry in &*entries {
            if !keys.contains(&entry.key) {
                keys.push(entry.key.clone());
            }
        }
        keys
    }

    /// Total number of historical entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// The persisted/interchange layout: a flat map from key to the ordered
    /// list of its historical versions. This is the only exported artifact of
    /// the engine and is stable for inspection and debugging tools.
    pub fn export(&self) -> BTreeMap<String, Vec<ExportedVersion>> {
        let mut exported: BTreeMap<String, Vec<ExportedVersion>> = BTreeMap::new();
        let entries = self.entries();
        for entry in &*entries {
            exported
                .entry(entry.key.clone())
                .or_default()
                .push(ExportedVersion {
                    value: entry.value.clone(),
                    metadata: entry.metadata.clone(),
                    mime_kind: entry.mime_kind,
                    timestamp: entry.timestamp.clone(),
                });
        }
        exported
    }
}

fn is_cancelled(cancel: Option<&CancelToken>) -> bool {
    cancel.is_some_and(CancelToken::is_cancelled)
}
